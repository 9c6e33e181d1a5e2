use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Operation attempted while the session is disconnected
    NotConnected,
    /// Error reading from or writing to the underlying transport
    Transport,
    /// Reconnect attempts reached the configured maximum
    Exhausted,
    /// Error related to invalid caller input
    Validation,
}

#[derive(Debug)]
pub struct Error {
    kind: Kind,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    backtrace: Backtrace,
}

impl Error {
    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
            backtrace: Backtrace::capture(),
        }
    }

    #[must_use]
    pub fn not_connected() -> Self {
        Self::with_source(Kind::NotConnected, NotConnected)
    }

    #[must_use]
    pub fn closed() -> Self {
        Self::with_source(Kind::Transport, ConnectionClosed)
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Validation {
            reason: message.into(),
        }
        .into()
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        let e = self.source.as_deref()?;
        e.downcast_ref::<E>()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => write!(f, "{:?}: {}", self.kind, src),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

/// Error returned whenever an operation is attempted while the session holds
/// no usable transport. Transient: the caller may retry after the session
/// reconnects.
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct NotConnected;

impl fmt::Display for NotConnected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not connected to the remote endpoint")
    }
}

impl StdError for NotConnected {}

impl From<NotConnected> for Error {
    fn from(err: NotConnected) -> Self {
        Error::with_source(Kind::NotConnected, err)
    }
}

/// The transport was closed underneath an in-flight operation.
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct ConnectionClosed;

impl fmt::Display for ConnectionClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection closed")
    }
}

impl StdError for ConnectionClosed {}

impl From<ConnectionClosed> for Error {
    fn from(err: ConnectionClosed) -> Self {
        Error::with_source(Kind::Transport, err)
    }
}

/// Terminal failure: every reconnect attempt up to the configured maximum
/// failed. Delivered once through the session's fatal notification channel;
/// the session is permanently disconnected afterwards.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectExhausted {
    /// How many dial attempts were made before giving up
    pub attempts: u32,
}

impl fmt::Display for ReconnectExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "could not reconnect to the remote endpoint after {} attempts",
            self.attempts
        )
    }
}

impl StdError for ReconnectExhausted {}

impl From<ReconnectExhausted> for Error {
    fn from(err: ReconnectExhausted) -> Self {
        Error::with_source(Kind::Exhausted, err)
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct Validation {
    pub reason: String,
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid: {}", self.reason)
    }
}

impl StdError for Validation {}

impl From<Validation> for Error {
    fn from(err: Validation) -> Self {
        Error::with_source(Kind::Validation, err)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::with_source(Kind::Transport, e)
    }
}
