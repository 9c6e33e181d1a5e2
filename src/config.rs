use std::time::Duration;

use backoff::backoff::Constant;
use tokio_tungstenite::tungstenite::http::HeaderMap;

const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
const DEFAULT_RECONNECT_DELAY_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_HEARTBEAT_INTERVAL_DURATION: Duration = Duration::from_secs(5);
const DEFAULT_HEARTBEAT_TIMEOUT_DURATION: Duration = Duration::from_secs(5);
const DEFAULT_READ_BUFFER_SIZE: usize = 1024;
const DEFAULT_WRITE_BUFFER_SIZE: usize = 1024;

/// Configuration for session behavior.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    /// Headers sent with the connection handshake on every dial
    pub request_headers: HeaderMap,
    /// Interval for sending liveness probes on an established connection
    pub heartbeat_interval: Duration,
    /// Maximum time without a liveness acknowledgement before the connection
    /// is considered dead
    pub heartbeat_timeout: Duration,
    /// Reconnection strategy configuration
    pub retry: RetryPolicy,
    /// Read buffer size hint handed to the transport dialer
    pub read_buffer_size: usize,
    /// Write buffer size hint handed to the transport dialer
    pub write_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_headers: HeaderMap::new(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL_DURATION,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT_DURATION,
            retry: RetryPolicy::default(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
        }
    }
}

/// Configuration for automatic reconnection behavior.
///
/// The policy is a fixed inter-attempt delay with an absolute attempt
/// ceiling. The reconnect loop consumes it through the [`backoff::backoff::Backoff`]
/// trait, so richer pacing strategies can be swapped in without touching the
/// state machine.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of dial attempts per reconnect cycle before giving up
    pub max_attempts: u32,
    /// Fixed delay between consecutive dial attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            delay: DEFAULT_RECONNECT_DELAY_DURATION,
        }
    }
}

impl From<RetryPolicy> for Constant {
    fn from(policy: RetryPolicy) -> Self {
        Constant::new(policy.delay)
    }
}
