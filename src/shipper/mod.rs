//! Buffered log shipping engine.
//!
//! [`LogShipper`] accepts flattened [`LogRecord`](crate::record::LogRecord)
//! values from any thread and hands them to a single dispatch worker. The
//! worker keeps every record in a tag-ordered backlog until the transport
//! confirms its write, connects on the periodic tick or on a forced flush,
//! writes the backlog as newline-delimited JSON and closes the connection
//! safely once the writes have drained. Records whose write never completes
//! stay queued and are retried on the next cycle.

pub(crate) mod backoff;
mod builder;
mod config;
mod handle;
pub(crate) mod queue;
mod serialise;
mod worker;


pub use builder::{BackoffOverrides, BuildError, ShipperBuilder};
pub use config::{
    BackoffPolicy, DEFAULT_BACKLOG_CAPACITY, DEFAULT_FLUSH_INTERVAL, DEFAULT_MAX_RECORD_SIZE,
    DEFAULT_WRITE_TIMEOUT, ShipperConfig,
};
pub use handle::LogShipper;
pub use queue::ShippingQueue;
pub use serialise::serialise_record;
pub use worker::FlushCallback;
