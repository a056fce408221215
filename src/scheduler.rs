//! Periodic sync trigger for `psync serve`.
//!
//! Passes run inline in the timer loop, so a pass that outlasts the period
//! delays the next tick instead of overlapping with it; missed ticks are
//! skipped, not replayed.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::reconcile::Reconciler;

/// Call `pass` every `period` until `cancel` fires. The first pass runs one
/// period after start. Returns how many passes completed.
///
/// A pass in progress is not interrupted by the loop itself; passes are
/// expected to watch `cancel` on their own.
pub async fn run_periodic<F, Fut>(period: Duration, cancel: CancellationToken, mut pass: F) -> usize
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut completed = 0;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                pass().await;
                completed += 1;
            }
        }
    }
    completed
}

/// Spawn the background sync-all loop. Returns `None` when `interval_secs`
/// is zero.
pub fn spawn_sync_all(
    reconciler: Reconciler,
    interval_secs: u64,
    cancel: CancellationToken,
) -> Option<JoinHandle<usize>> {
    if interval_secs == 0 {
        return None;
    }
    let period = Duration::from_secs(interval_secs);
    tracing::info!(interval_secs, "periodic sync enabled");

    Some(tokio::spawn(async move {
        let pass_cancel = cancel.clone();
        run_periodic(period, cancel, move || {
            let reconciler = reconciler.clone();
            let cancel = pass_cancel.clone();
            async move {
                match reconciler.sync_all(&cancel).await {
                    Ok(outcomes) => {
                        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
                        tracing::info!(sites = outcomes.len(), failed, "periodic sync finished");
                    }
                    Err(err) => tracing::error!(error = %err, "periodic sync could not list sites"),
                }
            }
        })
        .await
    }))
}
