//! Recurring liveness checks while a protected view is mounted.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::controller::WeakController;

/// Spawn a task that runs a session check every `period`.
///
/// The first check runs one period after spawning; mounting a view already
/// runs one immediately. The task ends on its own once the controller is
/// gone or a check reports the session lost. Returns a handle that can be
/// used to abort the task.
pub(crate) fn spawn_check_scheduler(controller: WeakController, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            let Some(controller) = controller.upgrade() else {
                debug!("Session controller dropped, stopping checks");
                break;
            };

            if !controller.check().await {
                info!("Session lost, stopping checks");
                break;
            }
        }
    })
}
