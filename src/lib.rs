//! Client-side log shipping.
//!
//! Log events are flattened into JSON records, buffered in a tag-ordered
//! backlog and delivered as newline-delimited JSON to a Logstash-style TCP
//! input, optionally over TLS. A single dispatch worker owns the backlog and
//! the connection; records are removed only once their write completes, so
//! delivery is at least once.
//!
//! ```no_run
//! use std::time::Duration;
//! use logship::{Logger, ShipperBuilder, TrustPolicy};
//!
//! let shipper = ShipperBuilder::new()
//!     .with_tcp("logs.example.com", 6514)
//!     .with_tls(None, TrustPolicy::Strict)
//!     .with_token("abc123")
//!     .build()?;
//! let logger = Logger::new(shipper);
//! logger.info("service started")?;
//! logger.flush(Duration::from_secs(5))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod error;
pub mod file_config;
pub mod flatten;
pub mod level;
pub mod logger;
pub mod rate_limited_warner;
pub mod record;
pub mod shipper;
pub mod transport;

pub use error::{ShipError, TransportError};
pub use file_config::ConfigFileError;
pub use flatten::{TOKEN_KEY, flatten, parse_record, prepare_record};
pub use level::{ParseLevelError, ShipLevel};
pub use logger::Logger;
pub use rate_limited_warner::{DEFAULT_WARN_INTERVAL, RateLimitedWarner};
pub use record::{DeliveryTag, LogRecord};
pub use shipper::{
    BackoffOverrides, BackoffPolicy, BuildError, FlushCallback, LogShipper, ShipperBuilder,
    ShipperConfig, ShippingQueue,
};
pub use transport::{
    ConnectionState, EventSink, SessionEvent, TcpTransport, TlsOptions, Transport,
    TransportConfig, TransportEvent, TrustPolicy,
};
