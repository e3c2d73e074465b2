//! Configuration structures consumed by the shipper lifecycle.
//!
//! [`ShipperBuilder`](super::ShipperBuilder) constructs these values before
//! passing them to [`LogShipper`](super::LogShipper) for runtime use.

use std::time::Duration;

use crate::{rate_limited_warner::DEFAULT_WARN_INTERVAL, transport::TransportConfig};

/// Default limit on records accepted but not yet delivered.
pub const DEFAULT_BACKLOG_CAPACITY: usize = 1 << 16;
/// Default timeout applied to each record write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(20);
/// Default interval of the background flush.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
/// Default maximum encoded record size in bytes.
pub const DEFAULT_MAX_RECORD_SIZE: usize = 1 << 20; // 1 MiB
/// Default base delay for exponential reconnect backoff.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);
/// Default maximum delay for exponential reconnect backoff.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Everything the shipper needs besides the transport itself.
#[derive(Clone, Debug)]
pub struct ShipperConfig {
    /// Most records held at once, counting those still in transit to the
    /// worker and those waiting for a write acknowledgement. `ship` returns
    /// `QueueFull` beyond it.
    pub capacity: usize,
    pub write_timeout: Duration,
    /// Period of the background flush. `None` disables it.
    pub flush_interval: Option<Duration>,
    pub max_record_size: usize,
    /// Merged into every record built by `ship_json` and `ship_object`.
    pub token: Option<String>,
    /// Gate periodic reconnects after failures. `None` retries on every tick.
    pub backoff: Option<BackoffPolicy>,
    pub warn_interval: Duration,
    pub transport: TransportConfig,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BACKLOG_CAPACITY,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            flush_interval: Some(DEFAULT_FLUSH_INTERVAL),
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
            token: None,
            backoff: None,
            warn_interval: DEFAULT_WARN_INTERVAL,
            transport: TransportConfig::default(),
        }
    }
}

impl ShipperConfig {
    /// Override the transport configuration.
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }
}

/// Exponential backoff policy for reconnection attempts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BACKOFF_BASE,
            cap: DEFAULT_BACKOFF_CAP,
        }
    }
}
