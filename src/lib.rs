#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod config;
pub mod error;
mod heartbeat;
mod ledger;
pub mod reconnect;
pub mod session;
pub mod transport;
pub mod tungstenite;
mod writer;

pub use config::{Config, RetryPolicy};
pub use error::{Error, Kind, ReconnectExhausted};
pub use reconnect::SessionState;
pub use session::Session;
pub use transport::{AckHook, Connection, Connector, FrameKind};
pub use tungstenite::WsConnector;

/// Header types, re-exported for building connection request headers.
pub use tokio_tungstenite::tungstenite::http::{HeaderMap, HeaderName, HeaderValue};

pub type Result<T> = std::result::Result<T, Error>;
