//! Heartbeat loop: keep this instance registered and adopt work from dead ones

use crate::queue::{QueueInner, HEARTBEAT_INTERVAL};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Runs until shutdown is signaled
///
/// Startup adoption is left to `recover`, so the first beat comes one interval in.
/// An adoption blocked on a full channel is abandoned on shutdown; the operations
/// it had not pushed yet are orphaned again once the instance deregisters.
pub(crate) async fn run(inner: Arc<QueueInner>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let adopted = tokio::select! {
            adopted = inner.adopt_orphans() => adopted,
            _ = shutdown.changed() => break,
        };

        if let Err(e) = adopted {
            tracing::warn!("Heartbeat for instance {} failed: {}", inner.instance_id, e);
        }
    }

    tracing::debug!("Heartbeat for instance {} stopped", inner.instance_id);
}
