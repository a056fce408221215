//! Onboarding HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/oauth/callback` | Complete a WordPress.com authorization |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! `/oauth/callback` answers in plain text: `401` when the owner denied
//! access (`error=` present), `400` without a `code`, `500` when the
//! exchange, dataset creation, or store write fails.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::oauth::Onboarding;

#[derive(Clone)]
struct AppState {
    onboarding: Onboarding,
}

pub fn router(onboarding: Onboarding) -> Router {
    Router::new()
        .route("/oauth/callback", get(handle_callback))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { onboarding })
}

/// Serve on `bind` until `shutdown` fires, then drain in-flight requests.
pub async fn run_server(
    bind: &str,
    onboarding: Onboarding,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "onboarding server listening");
    axum::serve(listener, router(onboarding))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    error: Option<String>,
}

async fn handle_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    if let Some(error) = params.error.filter(|e| !e.is_empty()) {
        tracing::warn!(%error, "authorization denied");
        return (StatusCode::UNAUTHORIZED, "User denied access").into_response();
    }
    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "No code provided").into_response();
    };

    match state.onboarding.complete(&code).await {
        Ok(done) => {
            let verb = if done.reused { "reconnected" } else { "connected" };
            (
                StatusCode::OK,
                format!("Site {}: {} (dataset: {})", verb, done.blog_url, done.dataset_id),
            )
                .into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "onboarding failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Onboarding failed").into_response()
        }
    }
}
