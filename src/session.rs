use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::config::Config;
use crate::error::{Error, ReconnectExhausted};
use crate::ledger::RecoveryLedger;
use crate::reconnect::{Coordinator, SessionState};
use crate::transport::{Connection as _, Connector, FrameKind};
use crate::tungstenite::WsConnector;
use crate::writer::{PendingWrite, write_loop};

/// Broadcast capacity for reconnect pulses.
const RECONNECT_PULSE_CAPACITY: usize = 16;

/// Thread-safe connected/not-connected flag.
///
/// Read by every component before attempting I/O; set to `true` only by the
/// reconnect coordinator after a successful dial. True if and only if the
/// currently-held transport is believed usable.
#[derive(Debug)]
pub(crate) struct ConnectionStatus {
    connected: Mutex<bool>,
}

impl Default for ConnectionStatus {
    #[expect(
        clippy::mutex_atomic,
        reason = "Status writes must stay ordered with the drop-signal send they pair with"
    )]
    fn default() -> Self {
        Self {
            connected: Mutex::new(false),
        }
    }
}

impl ConnectionStatus {
    pub(crate) fn is_connected(&self) -> bool {
        *self
            .connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set(&self, connected: bool) {
        *self
            .connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = connected;
    }
}

/// State shared between the facade, the writer, the heartbeat monitor, and
/// the reconnect coordinator.
pub(crate) struct Shared<C: Connector> {
    pub(crate) status: ConnectionStatus,
    pub(crate) ledger: RecoveryLedger,
    conn: Mutex<Option<Arc<C::Conn>>>,
    drop_tx: mpsc::Sender<()>,
}

impl<C: Connector> Shared<C> {
    fn new(drop_tx: mpsc::Sender<()>) -> Self {
        Self {
            status: ConnectionStatus::default(),
            ledger: RecoveryLedger::default(),
            conn: Mutex::new(None),
            drop_tx,
        }
    }

    /// Clone the current epoch's handle out of the slot. The lock is released
    /// before the caller performs any I/O on the handle.
    pub(crate) fn current_conn(&self) -> Option<Arc<C::Conn>> {
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn install_conn(&self, conn: Arc<C::Conn>) {
        *self.conn.lock().unwrap_or_else(PoisonError::into_inner) = Some(conn);
    }

    pub(crate) fn take_conn(&self) -> Option<Arc<C::Conn>> {
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Declare the current epoch dead and request a reconnect.
    ///
    /// Safe to call from any component, any number of times: the signal
    /// channel holds one slot, so concurrent emissions collapse into a single
    /// cycle, and an emission while a cycle is running latches exactly one
    /// follow-up cycle. After the coordinator has exited (exhaustion or
    /// close) the send fails and the call is a no-op.
    pub(crate) fn drop_connection(&self) {
        self.status.set(false);
        _ = self.drop_tx.try_send(());
    }
}

/// Background-task handles not yet claimed by [`Session::start`].
struct PendingTasks {
    drop_rx: mpsc::Receiver<()>,
    write_rx: mpsc::UnboundedReceiver<PendingWrite>,
}

struct SessionInner<C: Connector> {
    endpoint: String,
    config: Config,
    connector: Arc<C>,
    shared: Arc<Shared<C>>,
    write_tx: mpsc::UnboundedSender<PendingWrite>,
    pending: Mutex<Option<PendingTasks>>,
    state_tx: watch::Sender<SessionState>,
    state_rx: watch::Receiver<SessionState>,
    reconnect_tx: broadcast::Sender<()>,
    fatal_tx: watch::Sender<Option<ReconnectExhausted>>,
    fatal_rx: watch::Receiver<Option<ReconnectExhausted>>,
    shutdown: CancellationToken,
}

impl<C: Connector> Drop for SessionInner<C> {
    fn drop(&mut self) {
        // last facade clone is gone; reap the background tasks
        self.shutdown.cancel();
    }
}

/// Resilient session over a persistent bidirectional message stream.
///
/// Presents a connection that appears continuously available: [`send`] and
/// [`receive`] report synchronous per-operation outcomes while the session
/// absorbs network drops underneath, reconnecting with bounded retries,
/// probing liveness on a heartbeat, and replaying registered recovery
/// commands after every successful reconnect.
///
/// Cloning is cheap and every clone drives the same underlying session.
///
/// # Example
///
/// ```no_run
/// use resilient_ws::{Config, FrameKind, Session};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let session = Session::new("wss://stream.example.com/feed", Config::default());
///     session.register_recovery_command("{\"op\":\"subscribe\",\"channel\":\"ticker\"}");
///     session.start();
///
///     session.send(FrameKind::Text, "{\"op\":\"ping\"}").await?;
///     let (_kind, payload) = session.receive().await?;
///     println!("received {} bytes", payload.len());
///
///     session.close();
///     Ok(())
/// }
/// ```
///
/// [`send`]: Session::send
/// [`receive`]: Session::receive
pub struct Session<C: Connector = WsConnector> {
    inner: Arc<SessionInner<C>>,
}

impl<C: Connector> Clone for Session<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Session<WsConnector> {
    /// Create a new, unstarted session that dials `endpoint` over WebSocket.
    ///
    /// Defaults: 10 reconnect attempts, 10 s between attempts, 5 s heartbeat
    /// interval and timeout, 1024-byte read/write buffer hints.
    #[must_use]
    pub fn new(endpoint: &str, config: Config) -> Self {
        let connector = WsConnector::new(config.read_buffer_size, config.write_buffer_size);
        Self::with_connector(endpoint, config, connector)
    }
}

impl<C: Connector> Session<C> {
    /// Create a new, unstarted session over a caller-supplied transport.
    #[must_use]
    pub fn with_connector(endpoint: &str, config: Config, connector: C) -> Self {
        let (drop_tx, drop_rx) = mpsc::channel(1);
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (reconnect_tx, _) = broadcast::channel(RECONNECT_PULSE_CAPACITY);
        let (fatal_tx, fatal_rx) = watch::channel(None);

        Self {
            inner: Arc::new(SessionInner {
                endpoint: endpoint.to_owned(),
                config,
                connector: Arc::new(connector),
                shared: Arc::new(Shared::new(drop_tx)),
                write_tx,
                pending: Mutex::new(Some(PendingTasks { drop_rx, write_rx })),
                state_tx,
                state_rx,
                reconnect_tx,
                fatal_tx,
                fatal_rx,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Begin background activities and dispatch the initial connection
    /// attempt. Returns immediately; the first dial completes (or exhausts
    /// its retries) asynchronously. Calling `start` again is a no-op.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn start(&self) {
        let Some(tasks) = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        let coordinator = Coordinator {
            shared: Arc::clone(&self.inner.shared),
            connector: Arc::clone(&self.inner.connector),
            endpoint: self.inner.endpoint.clone(),
            config: self.inner.config.clone(),
            write_tx: self.inner.write_tx.clone(),
            state_tx: self.inner.state_tx.clone(),
            reconnect_tx: self.inner.reconnect_tx.clone(),
            fatal_tx: self.inner.fatal_tx.clone(),
            shutdown: self.inner.shutdown.clone(),
        };
        tokio::spawn(coordinator.run(tasks.drop_rx));
        tokio::spawn(write_loop(
            Arc::clone(&self.inner.shared),
            tasks.write_rx,
            self.inner.shutdown.clone(),
        ));

        // the initial connection is an ordinary reconnect cycle
        self.inner.shared.drop_connection();
    }

    /// Write one message, blocking until the serializer reports the outcome.
    ///
    /// Fails fast with a `NotConnected` error while the session is
    /// disconnected; nothing is queued in that case. A transport failure is
    /// returned to this caller and simultaneously triggers a reconnect.
    pub async fn send<P: Into<Vec<u8>>>(&self, kind: FrameKind, payload: P) -> Result<()> {
        if !self.inner.shared.status.is_connected() {
            return Err(Error::not_connected());
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = PendingWrite {
            kind,
            payload: payload.into(),
            reply: reply_tx,
        };
        self.inner
            .write_tx
            .send(request)
            .map_err(|_| Error::not_connected())?;

        reply_rx.await.unwrap_or_else(|_| Err(Error::not_connected()))
    }

    /// Block until one message arrives.
    ///
    /// Fails fast with a `NotConnected` error while disconnected. A transport
    /// failure is returned to the caller and simultaneously triggers a
    /// reconnect. At most one task may call `receive` at a time; the
    /// underlying stream orders messages for a single reader only.
    pub async fn receive(&self) -> Result<(FrameKind, Vec<u8>)> {
        if !self.inner.shared.status.is_connected() {
            return Err(Error::not_connected());
        }
        let Some(conn) = self.inner.shared.current_conn() else {
            return Err(Error::not_connected());
        };

        match conn.read_frame().await {
            Ok(frame) => Ok(frame),
            Err(error) => {
                self.inner.shared.drop_connection();
                Err(error)
            }
        }
    }

    /// Register a command to be written, in registration order, after every
    /// successful reconnect. Never fails and has no immediate effect.
    pub fn register_recovery_command<S: Into<String>>(&self, command: S) {
        self.inner.shared.ledger.register(command.into());
    }

    /// Number of registered recovery commands.
    #[must_use]
    pub fn recovery_command_count(&self) -> usize {
        self.inner.shared.ledger.len()
    }

    /// Terminate background activities and release the transport immediately,
    /// without a protocol close handshake. The session is permanently
    /// disconnected afterwards: every subsequent operation reports
    /// `NotConnected`.
    pub fn close(&self) {
        self.inner.shared.status.set(false);
        self.inner.shutdown.cancel();
        if let Some(conn) = self.inner.shared.take_conn() {
            conn.close();
        }
    }

    /// Check if the session currently holds a usable connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.shared.status.is_connected()
    }

    /// Get the current session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.inner.state_rx.borrow()
    }

    /// Subscribe to session state changes.
    ///
    /// Returns a receiver that notifies on every lifecycle transition. Useful
    /// for observing dial progress and reconnections.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// Subscribe to reconnect notifications.
    ///
    /// The returned receiver yields one pulse per successful reconnect,
    /// delivered after the recovery ledger has been replayed.
    #[must_use]
    pub fn reconnect_receiver(&self) -> broadcast::Receiver<()> {
        self.inner.reconnect_tx.subscribe()
    }

    /// Subscribe to the fatal notification.
    ///
    /// The watched value transitions from `None` to `Some` at most once, when
    /// reconnect attempts are exhausted; no further reconnects are attempted
    /// afterwards.
    #[must_use]
    pub fn fatal_receiver(&self) -> watch::Receiver<Option<ReconnectExhausted>> {
        self.inner.fatal_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        reason = "Do not need additional syntax for setting up tests"
    )]

    use async_trait::async_trait;
    use tokio_tungstenite::tungstenite::http::HeaderMap;

    use super::*;
    use crate::transport::{AckHook, Connection};

    struct NeverConnector;
    struct NeverConnection;

    #[async_trait]
    impl Connector for NeverConnector {
        type Conn = NeverConnection;

        async fn dial(&self, _endpoint: &str, _headers: &HeaderMap) -> Result<Self::Conn> {
            Err(Error::not_connected())
        }
    }

    #[async_trait]
    impl Connection for NeverConnection {
        async fn write_frame(&self, _kind: FrameKind, _payload: Vec<u8>) -> Result<()> {
            unreachable!("never dialed")
        }

        async fn read_frame(&self) -> Result<(FrameKind, Vec<u8>)> {
            unreachable!("never dialed")
        }

        async fn send_probe(&self) -> Result<()> {
            unreachable!("never dialed")
        }

        fn set_liveness_ack(&self, _hook: AckHook) {}

        fn close(&self) {}
    }

    #[tokio::test]
    async fn concurrent_drop_signals_collapse_into_one() {
        let (drop_tx, mut drop_rx) = mpsc::channel(1);
        let shared: Arc<Shared<NeverConnector>> = Arc::new(Shared::new(drop_tx));

        let emitters: Vec<_> = (0..32)
            .map(|_| {
                let shared = Arc::clone(&shared);
                tokio::spawn(async move { shared.drop_connection() })
            })
            .collect();
        for emitter in emitters {
            emitter.await.unwrap();
        }

        // exactly one signal is pending, no matter how many were raised
        assert!(matches!(drop_rx.try_recv(), Ok(())), "one signal expected");
        assert!(drop_rx.try_recv().is_err(), "signals must collapse");
        assert!(!shared.status.is_connected());
    }

    #[tokio::test]
    async fn drop_during_cycle_latches_one_follow_up() {
        let (drop_tx, mut drop_rx) = mpsc::channel(1);
        let shared: Arc<Shared<NeverConnector>> = Arc::new(Shared::new(drop_tx));

        shared.drop_connection();
        // a cycle begins: the coordinator consumes the signal
        assert!(matches!(drop_rx.try_recv(), Ok(())), "cycle signal expected");

        // several more failures detected while the cycle runs
        shared.drop_connection();
        shared.drop_connection();
        shared.drop_connection();

        // exactly one follow-up cycle is owed
        assert!(matches!(drop_rx.try_recv(), Ok(())), "latched signal expected");
        assert!(drop_rx.try_recv().is_err(), "only one follow-up is owed");
    }

    #[tokio::test]
    async fn status_starts_disconnected() {
        let session: Session<NeverConnector> =
            Session::with_connector("ws://localhost:1", Config::default(), NeverConnector);

        assert!(!session.is_connected());
        assert_eq!(session.state(), SessionState::Idle);
    }
}
