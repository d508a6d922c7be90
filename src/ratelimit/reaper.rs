//! Background removal of idle keys.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::clock::Clock;
use super::engine::AdmissionEngine;

/// Handle to a running reaper task.
///
/// Dropping the handle also stops the task, at its next poll.
pub struct ReaperHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Stop the reaper and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        let _ = self.task.await;
    }
}

/// Spawn a tokio task that calls [`AdmissionEngine::reap_idle`] every
/// `interval`.
///
/// Must be called from within a tokio runtime.
pub fn spawn_reaper<C>(engine: Arc<AdmissionEngine<C>>, interval: Duration) -> ReaperHandle
where
    C: Clock + 'static,
{
    let (tx, mut rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?interval, "Idle key reaper started");

        loop {
            tokio::select! {
                // Fires on an explicit shutdown and when the handle is dropped.
                _ = &mut rx => break,
                _ = ticker.tick() => {
                    let removed = engine.reap_idle();
                    debug!(removed, tracked = engine.tracked_keys(), "Reaper pass complete");
                }
            }
        }

        info!("Idle key reaper stopped");
    });

    ReaperHandle { shutdown: tx, task }
}
