//! OAuth callback handling through the axum router.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use press_sync::destination::CollectionAdmin;
use press_sync::error::DestinationError;
use press_sync::kv::MemoryKv;
use press_sync::models::SiteRecord;
use press_sync::oauth::{OAuthError, Onboarding, TokenExchanger, TokenResponse};
use press_sync::server::router;
use press_sync::sites::SiteStore;
use tower::ServiceExt;

struct FakeExchanger;

#[async_trait]
impl TokenExchanger for FakeExchanger {
    async fn exchange(&self, code: &str) -> Result<TokenResponse, OAuthError> {
        match code {
            "bad" => Err(OAuthError::Status {
                status: 400,
                body: "invalid_grant".into(),
            }),
            _ => Ok(TokenResponse {
                access_token: format!("token-for-{code}"),
                blog_id: "555".into(),
                blog_url: "https://five.example".into(),
                token_type: "bearer".into(),
            }),
        }
    }
}

#[derive(Default)]
struct FakeCollections {
    existing: Mutex<Vec<String>>,
    created: AtomicUsize,
    fail_create: bool,
}

#[async_trait]
impl CollectionAdmin for FakeCollections {
    async fn create_collection(&self, name: &str) -> Result<String, DestinationError> {
        if self.fail_create {
            return Err(DestinationError::Status {
                status: 403,
                body: "quota".into(),
            });
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("ds-{n}-{}", name.len());
        self.existing.lock().unwrap().push(id.clone());
        Ok(id)
    }

    async fn collection_exists(&self, collection_id: &str) -> Result<bool, DestinationError> {
        Ok(self
            .existing
            .lock()
            .unwrap()
            .iter()
            .any(|id| id == collection_id))
    }
}

fn setup(collections: FakeCollections) -> (axum::Router, SiteStore, Arc<FakeCollections>) {
    let store = SiteStore::new(Arc::new(MemoryKv::new()));
    let collections = Arc::new(collections);
    let onboarding = Onboarding::new(Arc::new(FakeExchanger), collections.clone(), store.clone());
    (router(onboarding), store, collections)
}

async fn call(app: axum::Router, uri: &str) -> (StatusCode, String) {
    let resp = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&bytes).to_string())
}

#[tokio::test]
async fn test_health() {
    let (app, _, _) = setup(FakeCollections::default());
    let (status, body) = call(app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    let value: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(value["status"], "ok");
    assert_eq!(value["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_denied_access() {
    let (app, store, _) = setup(FakeCollections::default());
    let (status, _) = call(app, "/oauth/callback?error=access_denied").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_code() {
    let (app, _, _) = setup(FakeCollections::default());
    let (status, _) = call(app, "/oauth/callback").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_new_site_is_registered() {
    let (app, store, collections) = setup(FakeCollections::default());
    let (status, body) = call(app, "/oauth/callback?code=abc").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("https://five.example"), "{body}");

    let record = store.get("555").await.unwrap();
    assert_eq!(record.access_credential, "token-for-abc");
    assert_eq!(record.source_collection_ref, "https://five.example");
    assert_eq!(record.destination_collection_id, "ds-1-20");
    assert!(record.item_to_document.is_empty());
    assert_eq!(collections.created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_reauthorized_site_keeps_dataset_and_mapping() {
    let collections = FakeCollections::default();
    collections.existing.lock().unwrap().push("ds-old".into());
    let (app, store, collections) = setup(collections);

    let mut existing = SiteRecord::new("555", "stale", "https://five.example", "ds-old");
    existing.item_to_document.insert(1, "doc-1".into());
    store.add(&existing).await.unwrap();

    let (status, body) = call(app, "/oauth/callback?code=fresh").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("reconnected"), "{body}");

    let record = store.get("555").await.unwrap();
    assert_eq!(record.access_credential, "token-for-fresh");
    assert_eq!(record.destination_collection_id, "ds-old");
    assert_eq!(record.item_to_document.len(), 1);
    assert_eq!(collections.created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_known_site_with_deleted_dataset_starts_over() {
    let (app, store, collections) = setup(FakeCollections::default());
    let mut existing = SiteRecord::new("555", "stale", "https://five.example", "ds-gone");
    existing.item_to_document.insert(1, "doc-1".into());
    store.add(&existing).await.unwrap();

    let (status, _) = call(app, "/oauth/callback?code=x").await;
    assert_eq!(status, StatusCode::OK);

    let record = store.get("555").await.unwrap();
    assert_ne!(record.destination_collection_id, "ds-gone");
    assert!(record.item_to_document.is_empty());
    assert_eq!(collections.created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_exchange_failure() {
    let (app, store, _) = setup(FakeCollections::default());
    let (status, _) = call(app, "/oauth/callback?code=bad").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_dataset_creation_failure() {
    let (app, store, _) = setup(FakeCollections {
        fail_create: true,
        ..FakeCollections::default()
    });
    let (status, _) = call(app, "/oauth/callback?code=abc").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(store.get("555").await.is_err());
}
