//! Optional background purge of expired sessions.
//!
//! Expiry is always enforced lazily at lookup; this task only reclaims space.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::SessionLifecycle;

/// Shortest interval the sweeper runs at; smaller values are raised to it.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Handle to stop and join the sweeper.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl SweeperHandle {
    /// Request shutdown and wait for the task to stop.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.join.await {
            warn!(error = %e, "session sweeper ended abnormally");
        }
    }
}

/// Spawn a task that calls [`SessionLifecycle::purge_expired`] every `every`.
pub fn spawn_session_sweeper(lifecycle: Arc<SessionLifecycle>, every: Duration) -> SweeperHandle {
    if every < MIN_SWEEP_INTERVAL {
        warn!(
            requested_ms = every.as_millis() as u64,
            "sweep interval below minimum; using {}ms",
            MIN_SWEEP_INTERVAL.as_millis()
        );
    }
    let every = every.max(MIN_SWEEP_INTERVAL);
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_ms = every.as_millis() as u64, "session sweeper started");

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = ticker.tick() => match lifecycle.purge_expired().await {
                    Ok(0) => debug!("no expired sessions"),
                    Ok(purged) => info!(purged, "expired sessions purged"),
                    Err(e) => warn!(error = %e, "session sweep failed"),
                },
            }
        }
        info!("session sweeper stopped");
    });

    SweeperHandle {
        shutdown: shutdown_tx,
        join,
    }
}
