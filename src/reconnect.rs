//! Reconnect coordinator: the only code path allowed to (re)establish the
//! transport.

use std::sync::Arc;
use std::time::Instant;

use backoff::backoff::{Backoff as _, Constant};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::ReconnectExhausted;
use crate::heartbeat::{HeartbeatMonitor, LivenessState};
use crate::session::Shared;
use crate::transport::{Connection as _, Connector, FrameKind};
use crate::writer::PendingWrite;

/// Session lifecycle state.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created but not started
    Idle,
    /// A reconnect cycle is dialing
    Dialing {
        /// Current dial attempt number within the cycle
        attempt: u32,
    },
    /// Successfully connected
    Connected {
        /// When the connection was established
        since: Instant,
    },
    /// Retry attempts exhausted; the session is permanently disconnected
    Exhausted,
}

impl SessionState {
    /// Check if the session currently holds a usable connection.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

enum Dialed<T> {
    Connected(T),
    Exhausted,
    Cancelled,
}

/// Owns the reconnect state machine and the only dial loop in the session.
///
/// Consumes the capacity-1 drop-signal channel: concurrent drop emissions
/// collapse into the single buffered slot, so at most one cycle runs at a
/// time and a signal raised mid-cycle forces exactly one further cycle once
/// the current one finishes.
pub(crate) struct Coordinator<C: Connector> {
    pub(crate) shared: Arc<Shared<C>>,
    pub(crate) connector: Arc<C>,
    pub(crate) endpoint: String,
    pub(crate) config: Config,
    pub(crate) write_tx: mpsc::UnboundedSender<PendingWrite>,
    pub(crate) state_tx: watch::Sender<SessionState>,
    pub(crate) reconnect_tx: broadcast::Sender<()>,
    pub(crate) fatal_tx: watch::Sender<Option<ReconnectExhausted>>,
    pub(crate) shutdown: CancellationToken,
}

impl<C: Connector> Coordinator<C> {
    pub(crate) async fn run(self, mut signals: mpsc::Receiver<()>) {
        let mut heartbeat: Option<JoinHandle<()>> = None;

        loop {
            let signal = tokio::select! {
                () = self.shutdown.cancelled() => None,
                signal = signals.recv() => signal,
            };
            if signal.is_none() {
                break;
            }

            // tear down the previous epoch before dialing: the old monitor
            // must never overlap its successor, and the old handle is
            // discarded, not reused
            if let Some(handle) = heartbeat.take() {
                handle.abort();
            }
            if let Some(old) = self.shared.take_conn() {
                old.close();
            }

            match self.dial_with_retry().await {
                Dialed::Connected(conn) => {
                    let conn = Arc::new(conn);

                    // fresh liveness clock per epoch
                    let liveness = Arc::new(LivenessState::new());
                    let ack_state = Arc::clone(&liveness);
                    conn.set_liveness_ack(Arc::new(move || ack_state.touch()));

                    self.shared.install_conn(Arc::clone(&conn));
                    self.shared.status.set(true);
                    _ = self.state_tx.send(SessionState::Connected {
                        since: Instant::now(),
                    });

                    heartbeat = Some(
                        HeartbeatMonitor {
                            conn,
                            liveness,
                            shared: Arc::clone(&self.shared),
                            interval: self.config.heartbeat_interval,
                            timeout: self.config.heartbeat_timeout,
                        }
                        .spawn(),
                    );

                    self.replay_ledger().await;

                    _ = self.reconnect_tx.send(());
                }
                Dialed::Exhausted => {
                    _ = self.state_tx.send(SessionState::Exhausted);
                    _ = self.fatal_tx.send(Some(ReconnectExhausted {
                        attempts: self.config.retry.max_attempts,
                    }));
                    break;
                }
                Dialed::Cancelled => break,
            }
        }

        if let Some(handle) = heartbeat.take() {
            handle.abort();
        }
        if let Some(conn) = self.shared.take_conn() {
            conn.close();
        }
    }

    /// Dial until success or the attempt ceiling, pacing attempts with the
    /// configured policy. Dial errors stay internal to the loop.
    async fn dial_with_retry(&self) -> Dialed<C::Conn> {
        let max_attempts = self.config.retry.max_attempts;
        let mut backoff: Constant = self.config.retry.clone().into();

        for attempt in 1..=max_attempts {
            _ = self.state_tx.send(SessionState::Dialing { attempt });

            let dialed = tokio::select! {
                () = self.shutdown.cancelled() => return Dialed::Cancelled,
                dialed = self.connector.dial(&self.endpoint, &self.config.request_headers) => dialed,
            };

            match dialed {
                Ok(conn) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(endpoint = %self.endpoint, attempt, "connected");
                    return Dialed::Connected(conn);
                }
                Err(error) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(%error, attempt, max_attempts, "dial failed");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &error;
                }
            }

            if attempt < max_attempts
                && let Some(delay) = backoff.next_backoff()
            {
                tokio::select! {
                    () = self.shutdown.cancelled() => return Dialed::Cancelled,
                    () = sleep(delay) => {}
                }
            }
        }

        Dialed::Exhausted
    }

    /// Write every ledger command, in insertion order, through the serializer
    /// so replay obeys the same ordering and failure handling as caller
    /// writes. A replay failure re-drops; there is no caller to propagate to.
    async fn replay_ledger(&self) {
        for command in self.shared.ledger.snapshot() {
            let (reply_tx, reply_rx) = oneshot::channel();
            let request = PendingWrite {
                kind: FrameKind::Text,
                payload: command.into_bytes(),
                reply: reply_tx,
            };
            if self.write_tx.send(request).is_err() {
                break;
            }

            match reply_rx.await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(%error, "recovery command replay failed, dropping connection");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &error;

                    self.shared.drop_connection();
                    break;
                }
                Err(_) => break,
            }
        }
    }
}
