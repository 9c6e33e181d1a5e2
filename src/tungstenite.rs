//! Production transport adapter backed by `tokio-tungstenite`.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::http::HeaderMap;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_with_config};
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::error::Error;
use crate::transport::{AckHook, Connection, Connector, FrameKind};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dials WebSocket connections with the session's buffer-size hints.
#[derive(Debug, Clone, Copy)]
pub struct WsConnector {
    read_buffer_size: usize,
    write_buffer_size: usize,
}

impl WsConnector {
    #[must_use]
    pub fn new(read_buffer_size: usize, write_buffer_size: usize) -> Self {
        Self {
            read_buffer_size,
            write_buffer_size,
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    type Conn = WsTransport;

    async fn dial(&self, endpoint: &str, headers: &HeaderMap) -> Result<Self::Conn> {
        let mut request = endpoint.into_client_request()?;
        request
            .headers_mut()
            .extend(headers.iter().map(|(name, value)| (name.clone(), value.clone())));

        let config = WebSocketConfig::default()
            .read_buffer_size(self.read_buffer_size)
            .write_buffer_size(self.write_buffer_size);

        let (stream, _response) = connect_async_with_config(request, Some(config), false).await?;
        let (write, read) = stream.split();

        Ok(WsTransport {
            write: Mutex::new(write),
            read: Mutex::new(read),
            ack_hook: RwLock::new(None),
            shutdown: CancellationToken::new(),
        })
    }
}

/// One established WebSocket connection.
///
/// The split halves each sit behind their own async lock, so one reader and
/// one writer proceed independently while individual frame writes (probes
/// included) stay atomic. Liveness acknowledgements are observed while a
/// caller is blocked reading; like the protocol pong handler itself, they
/// require an active reader to be seen.
pub struct WsTransport {
    write: Mutex<SplitSink<WsStream, Message>>,
    read: Mutex<SplitStream<WsStream>>,
    ack_hook: RwLock<Option<AckHook>>,
    shutdown: CancellationToken,
}

impl WsTransport {
    async fn next_data_frame(&self) -> Result<(FrameKind, Vec<u8>)> {
        let mut read = self.read.lock().await;
        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok((FrameKind::Text, text.as_bytes().to_vec()));
                }
                Some(Ok(Message::Binary(data))) => return Ok((FrameKind::Binary, data.into())),
                Some(Ok(Message::Pong(_))) => {
                    let hook = self
                        .ack_hook
                        .read()
                        .unwrap_or_else(PoisonError::into_inner)
                        .clone();
                    if let Some(hook) = hook {
                        hook();
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Err(Error::closed()),
                Some(Ok(_)) => {
                    // pings are answered by the protocol layer
                }
                Some(Err(error)) => return Err(error.into()),
            }
        }
    }
}

#[async_trait]
impl Connection for WsTransport {
    async fn write_frame(&self, kind: FrameKind, payload: Vec<u8>) -> Result<()> {
        let message = match kind {
            FrameKind::Text => {
                let text = String::from_utf8(payload)
                    .map_err(|_| Error::validation("text frame payload is not valid UTF-8"))?;
                Message::Text(text.into())
            }
            FrameKind::Binary => Message::Binary(payload.into()),
        };

        tokio::select! {
            () = self.shutdown.cancelled() => Err(Error::closed()),
            result = async {
                let mut write = self.write.lock().await;
                write.send(message).await
            } => result.map_err(Error::from),
        }
    }

    async fn read_frame(&self) -> Result<(FrameKind, Vec<u8>)> {
        tokio::select! {
            () = self.shutdown.cancelled() => Err(Error::closed()),
            frame = self.next_data_frame() => frame,
        }
    }

    async fn send_probe(&self) -> Result<()> {
        tokio::select! {
            () = self.shutdown.cancelled() => Err(Error::closed()),
            result = async {
                let mut write = self.write.lock().await;
                write.send(Message::Ping(Vec::new().into())).await
            } => result.map_err(Error::from),
        }
    }

    fn set_liveness_ack(&self, hook: AckHook) {
        *self
            .ack_hook
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(hook);
    }

    fn close(&self) {
        // no close handshake: unblock in-flight reads and writes and let the
        // socket drop with the last handle
        self.shutdown.cancel();
    }
}
