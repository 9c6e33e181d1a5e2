use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::session::Shared;
use crate::transport::{Connection as _, Connector};

/// Last-observed-liveness clock for one connection epoch.
///
/// Touched by the transport's acknowledgement hook, read by the monitor's
/// timeout check. Seeded with the current time on creation so a fresh
/// connection never times out before its first probe round-trip.
#[derive(Debug)]
pub(crate) struct LivenessState {
    last_seen: RwLock<Instant>,
}

impl LivenessState {
    pub(crate) fn new() -> Self {
        Self {
            last_seen: RwLock::new(Instant::now()),
        }
    }

    pub(crate) fn touch(&self) {
        *self
            .last_seen
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.last_seen
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }
}

/// Liveness monitor for a single connection epoch.
///
/// One instance per epoch, spawned by the reconnect coordinator after each
/// successful dial and aborted before the next epoch starts. The monitor
/// never outlives its connection: any failure it detects raises one drop
/// signal and ends the task.
pub(crate) struct HeartbeatMonitor<C: Connector> {
    pub(crate) conn: Arc<C::Conn>,
    pub(crate) liveness: Arc<LivenessState>,
    pub(crate) shared: Arc<Shared<C>>,
    pub(crate) interval: Duration,
    pub(crate) timeout: Duration,
}

impl<C: Connector> HeartbeatMonitor<C> {
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut ticker = interval(self.interval);
        // the first tick completes immediately; probe right away
        ticker.tick().await;

        loop {
            if !self.shared.status.is_connected() {
                break;
            }

            if let Err(error) = self.conn.send_probe().await {
                #[cfg(feature = "tracing")]
                tracing::warn!(%error, "liveness probe failed, dropping connection");
                #[cfg(not(feature = "tracing"))]
                let _ = &error;

                self.shared.drop_connection();
                break;
            }

            // give the acknowledgement one full tick to arrive before judging
            ticker.tick().await;

            let silence = self.liveness.elapsed();
            if silence > self.timeout {
                #[cfg(feature = "tracing")]
                tracing::warn!(?silence, "liveness timeout, dropping connection");

                self.shared.drop_connection();
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn touch_resets_elapsed() {
        let liveness = LivenessState::new();

        thread::sleep(Duration::from_millis(20));
        assert!(liveness.elapsed() >= Duration::from_millis(20));

        liveness.touch();
        assert!(liveness.elapsed() < Duration::from_millis(20));
    }
}
