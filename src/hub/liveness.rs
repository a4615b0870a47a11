use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::hub::net::connection::Connection;
use crate::hub::registry::TopicRegistry;
use crate::hub::types::TopicKey;
use crate::wire::message::probe;

/// Starts a background task that probes `conn` every `every`.
///
/// The first failed probe removes the connection from `topic` and ends the
/// task. There is no retry.
pub fn start_monitor(
    registry: Arc<TopicRegistry>,
    topic: TopicKey,
    conn: Arc<dyn Connection>,
    every: Duration,
) -> JoinHandle<()> {
    info!("Starting liveness monitor for {} on {}", conn.id(), topic);

    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let frame = probe();

        loop {
            ticker.tick().await;

            match conn.send(&frame) {
                Ok(()) => debug!("Probe sent to {}", conn.id()),
                Err(e) => {
                    warn!("Probe to {} failed, evicting from {}: {}", conn.id(), topic, e);
                    registry.leave(topic, conn.id());
                    conn.close();
                    break;
                }
            }
        }

        debug!("Liveness monitor for {} stopped", conn.id());
    })
}
