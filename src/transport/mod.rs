//! Secure stream transport to the log collector.
//!
//! The dispatch worker never touches a socket directly. It drives a
//! [`Transport`] through `connect`, `write`, `disconnect_safely` and
//! `disconnect`, and learns about progress solely through
//! [`TransportEvent`]s delivered on an [`EventSink`]. [`TcpTransport`] is the
//! production implementation: it owns one TCP connection, optionally wrapped
//! in TLS, and performs blocking I/O on a dedicated session thread.

mod config;
mod connection;
mod tcp;

#[cfg(test)]
mod tests;

use std::time::Duration;

use crossbeam_channel::Sender;

use crate::{error::TransportError, record::DeliveryTag};

pub use config::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_PORT, TlsOptions, TransportConfig, TrustPolicy};
pub use tcp::TcpTransport;

/// Lifecycle of a single connection attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Securing,
    Connected,
    Disconnecting,
}

/// Notifications emitted by a transport to its owner.
#[derive(Clone, Debug)]
pub enum TransportEvent {
    /// The connection is established and, when TLS is enabled, the
    /// handshake has completed. Writing may start.
    Secured,
    /// The write carrying `tag` has been handed to the operating system.
    Wrote(DeliveryTag),
    /// The connection is gone. `None` means an orderly close.
    Disconnected(Option<TransportError>),
}

/// Event stamped with the connection session that produced it.
#[derive(Clone, Debug)]
pub struct SessionEvent {
    pub session: u64,
    pub event: TransportEvent,
}

/// Destination for the events of one connection session.
#[derive(Clone, Debug)]
pub struct EventSink {
    session: u64,
    tx: Sender<SessionEvent>,
}

impl EventSink {
    pub fn new(session: u64, tx: Sender<SessionEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    /// Deliver `event` to the owner. Returns `false` once the owner is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(SessionEvent {
                session: self.session,
                event,
            })
            .is_ok()
    }
}

/// Connection surface used by the dispatch worker.
///
/// None of the methods block on the network and none of them report
/// failures synchronously; outcomes arrive as [`TransportEvent`]s.
pub trait Transport: Send {
    /// Start connecting. Does nothing while a session is already connecting
    /// or connected.
    fn connect(&mut self, sink: EventSink);

    /// Queue `bytes` for transmission, correlated by `tag`.
    fn write(&mut self, bytes: Vec<u8>, tag: DeliveryTag, timeout: Duration);

    /// Close once every write issued so far has been flushed.
    fn disconnect_safely(&mut self);

    /// Tear the connection down immediately without further events.
    fn disconnect(&mut self);

    /// True once the connection is established and secured.
    fn is_connected(&self) -> bool;

    fn state(&self) -> ConnectionState;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn connect(&mut self, sink: EventSink) {
        (**self).connect(sink);
    }

    fn write(&mut self, bytes: Vec<u8>, tag: DeliveryTag, timeout: Duration) {
        (**self).write(bytes, tag, timeout);
    }

    fn disconnect_safely(&mut self) {
        (**self).disconnect_safely();
    }

    fn disconnect(&mut self) {
        (**self).disconnect();
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn state(&self) -> ConnectionState {
        (**self).state()
    }
}
