//! Error types surfaced by the shipping engine.

use std::{io, sync::Arc};

use thiserror::Error;

/// Failure of the connection to the collector.
///
/// Transport errors are delivered to every flush waiter of the failed
/// session, so they are cheap to clone and keep the originating
/// [`io::Error`] behind an [`Arc`].
#[derive(Clone, Debug, Error)]
pub enum TransportError {
    /// No address of the endpoint accepted a TCP connection.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: Arc<io::Error>,
    },
    /// The TLS handshake failed or timed out.
    #[error("tls handshake with {endpoint} failed: {message}")]
    Handshake { endpoint: String, message: String },
    /// Writing a record to the socket failed or exceeded its timeout.
    #[error("write failed: {source}")]
    Write {
        #[source]
        source: Arc<io::Error>,
    },
    /// The peer closed or reset the connection while records were being
    /// written.
    #[error("connection closed by peer")]
    Closed,
}

impl TransportError {
    pub(crate) fn connect(endpoint: impl Into<String>, source: io::Error) -> Self {
        Self::Connect {
            endpoint: endpoint.into(),
            source: Arc::new(source),
        }
    }

    /// Classify a failed write. Errors raised by a peer-side close map to
    /// [`Closed`](Self::Closed).
    pub(crate) fn write(source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof => Self::Closed,
            _ => Self::Write {
                source: Arc::new(source),
            },
        }
    }

    /// Whether the failure was a timeout rather than a refusal or reset.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Connect { source, .. } | Self::Write { source } => matches!(
                source.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            Self::Handshake { .. } | Self::Closed => false,
        }
    }
}

/// Outcome reported to flush callers.
#[derive(Clone, Debug, Error)]
pub enum ShipError {
    /// The connection dropped before the backlog was written.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Pending work was abandoned by `cancel_sending` or shutdown.
    #[error("sending was cancelled")]
    Cancelled,
    /// The payload handed to the shipper is not a JSON object.
    #[error("record is not a JSON object")]
    InvalidRecord,
    /// The backlog already holds `capacity` undelivered records.
    #[error("shipper queue is full")]
    QueueFull,
    /// The shipper has been closed.
    #[error("shipper is closed")]
    Closed,
    /// A blocking flush did not complete in time.
    #[error("timed out waiting for flush")]
    Timeout,
}
