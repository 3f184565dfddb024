//! Configuration for the wirebus client

use crate::codec::PROTOCOL_VERSION;
use semver::Version;
use std::time::Duration;

/// Default wait for a correlated reply
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Default pause between reconnect attempts
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1_000);

/// Default wait for the transport to confirm a close
pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Configuration for connecting to a broker
#[derive(Debug, Clone)]
pub struct WirebusConfig {
    /// Broker URL (e.g., "ws://localhost:8000")
    pub url: String,

    /// Whether to automatically reconnect after the transport closes
    pub auto_reconnect: bool,

    /// Flat delay before each reconnection attempt
    pub reconnect_delay: Duration,

    /// Give up after this many consecutive failed attempts; `None` never gives up
    pub max_reconnect_attempts: Option<u32>,

    /// Timeout for requests and correlated publishes without an explicit one
    pub request_timeout: Duration,

    /// Upper bound on waiting for the transport to confirm a close
    pub disconnect_timeout: Duration,

    /// Version stamped on outbound frames; inbound frames must share its major
    pub protocol_version: Version,
}

impl WirebusConfig {
    /// Create a new configuration for `url` with reconnection disabled
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auto_reconnect: false,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_attempts: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT,
            protocol_version: default_protocol_version(),
        }
    }

    /// Enable automatic reconnection with a flat `delay` between attempts
    pub fn reconnect(mut self, delay: Duration) -> Self {
        self.auto_reconnect = true;
        self.reconnect_delay = delay;
        self
    }

    /// Disable automatic reconnection
    pub fn no_reconnect(mut self) -> Self {
        self.auto_reconnect = false;
        self
    }

    /// Bound the number of consecutive reconnection attempts
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }

    /// Set the default request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set how long `disconnect` waits for the close to be confirmed
    pub fn disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = timeout;
        self
    }

    /// Set the protocol version spoken by this client
    pub fn protocol_version(mut self, version: Version) -> Self {
        self.protocol_version = version;
        self
    }
}

fn default_protocol_version() -> Version {
    Version::parse(PROTOCOL_VERSION).unwrap_or_else(|_| Version::new(1, 0, 0))
}
