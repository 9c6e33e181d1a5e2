//! Transport capability traits.
//!
//! The session core never touches a socket directly: everything it needs from
//! the wire is expressed as the [`Connector`] / [`Connection`] pair. The
//! production implementation lives in [`crate::tungstenite`]; tests substitute
//! scripted implementations.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_tungstenite::tungstenite::http::HeaderMap;

use crate::Result;

/// Callback invoked by a [`Connection`] whenever a liveness acknowledgement
/// frame arrives.
pub type AckHook = Arc<dyn Fn() + Send + Sync + 'static>;

/// Kind tag carried by each framed message.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// UTF-8 text payload
    Text,
    /// Opaque binary payload
    Binary,
}

/// Factory for establishing connections.
///
/// The session holds one connector for its whole lifetime and dials through
/// it on every reconnect cycle; each successful dial yields a fresh
/// [`Connection`] owned exclusively by that epoch.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connection type produced by this connector.
    type Conn: Connection;

    /// Establish a new connection to `endpoint`, presenting `headers` during
    /// the handshake.
    async fn dial(&self, endpoint: &str, headers: &HeaderMap) -> Result<Self::Conn>;
}

/// One established duplex framed-message channel.
///
/// Implementations must tolerate one concurrent reader and one concurrent
/// writer; interleaving of individual frame writes (including probes) is the
/// implementation's responsibility.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Write one framed message.
    async fn write_frame(&self, kind: FrameKind, payload: Vec<u8>) -> Result<()>;

    /// Block until one framed message arrives.
    async fn read_frame(&self) -> Result<(FrameKind, Vec<u8>)>;

    /// Send a protocol-level liveness probe.
    async fn send_probe(&self) -> Result<()>;

    /// Register the callback invoked when a liveness acknowledgement arrives.
    ///
    /// Replaces any previously registered hook.
    fn set_liveness_ack(&self, hook: AckHook);

    /// Release the connection immediately, without a protocol close
    /// handshake. Blocked reads and writes return an error.
    fn close(&self);
}
