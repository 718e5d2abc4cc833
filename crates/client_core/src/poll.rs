use std::{sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::warn;

use shared::domain::RideId;

use crate::{gateway::RideGateway, RideLifecycleController};

/// Redundancy path next to the push channel: read the ride status on a fixed
/// interval and feed it into the same reducer. The first read happens
/// immediately so a missed push frame is caught quickly.
pub(crate) fn spawn_status_poller(
    controller: Arc<RideLifecycleController>,
    rides: Arc<dyn RideGateway>,
    ride_id: RideId,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match rides.ride_status(ride_id).await {
                Ok(record) => {
                    let _ = controller.apply_remote_update(record).await;
                }
                Err(err) => {
                    warn!(ride_id = ride_id.0, "poll: ride status read failed: {err}");
                }
            }
        }
    })
}
