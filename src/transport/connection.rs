//! Blocking socket primitives used by the session thread.

use std::{
    io::{self, Write},
    net::{Shutdown, TcpStream},
    time::{Duration, Instant},
};

use native_tls::TlsStream;

use crate::error::TransportError;

use super::{ConnectionState, TransportConfig};

/// Active socket connection state.
pub(crate) enum ActiveConnection {
    PlainTcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl ActiveConnection {
    fn tcp(&self) -> &TcpStream {
        match self {
            ActiveConnection::PlainTcp(stream) => stream,
            ActiveConnection::Tls(stream) => stream.get_ref(),
        }
    }

    /// Write and flush `buf` within `timeout`.
    ///
    /// The deadline covers the whole record: each partial write only gets
    /// the time left, so a slowly reading peer cannot stretch it.
    pub(crate) fn send(&mut self, buf: &[u8], timeout: Duration) -> io::Result<()> {
        let deadline = Instant::now() + timeout;
        let mut written = 0;
        while written < buf.len() {
            self.arm_write_timeout(deadline)?;
            match self.write_some(&buf[written..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => written += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
        self.arm_write_timeout(deadline)?;
        match self {
            ActiveConnection::PlainTcp(stream) => stream.flush(),
            ActiveConnection::Tls(stream) => stream.flush(),
        }
    }

    fn write_some(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ActiveConnection::PlainTcp(stream) => stream.write(buf),
            ActiveConnection::Tls(stream) => stream.write(buf),
        }
    }

    fn arm_write_timeout(&self, deadline: Instant) -> io::Result<()> {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "write deadline exceeded",
            ));
        }
        self.tcp().set_write_timeout(Some(left))
    }

    /// Orderly close: TLS close_notify when applicable, then a write
    /// shutdown so the peer sees EOF after the last record.
    pub(crate) fn close(mut self) {
        if let ActiveConnection::Tls(stream) = &mut self {
            let _ = stream.shutdown();
        }
        let _ = self.tcp().shutdown(Shutdown::Write);
    }
}

fn connect_tcp(config: &TransportConfig) -> Result<TcpStream, TransportError> {
    let endpoint = config.endpoint();
    let addrs = config
        .socket_addrs()
        .map_err(|err| TransportError::connect(&endpoint, err))?;
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, config.connect_timeout) {
            Ok(stream) => {
                stream.set_nodelay(true).ok();
                return Ok(stream);
            }
            Err(err) => last_err = Some(err),
        }
    }
    let err = last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
    });
    Err(TransportError::connect(endpoint, err))
}

/// Establish the connection described by `config`.
///
/// `on_tcp` receives a clone of the raw stream as soon as TCP is up so the
/// owner can force it closed during the handshake. `on_state` observes the
/// move from connecting to securing.
pub(crate) fn open_connection(
    config: &TransportConfig,
    mut on_tcp: impl FnMut(&TcpStream),
    mut on_state: impl FnMut(ConnectionState),
) -> Result<ActiveConnection, TransportError> {
    let stream = connect_tcp(config)?;
    on_tcp(&stream);
    let Some(tls) = &config.tls else {
        return Ok(ActiveConnection::PlainTcp(stream));
    };

    on_state(ConnectionState::Securing);
    let endpoint = config.endpoint();
    let handshake_err = |message: String| TransportError::Handshake {
        endpoint: endpoint.clone(),
        message,
    };
    let connector = tls.connector().map_err(|err| handshake_err(err.to_string()))?;
    stream
        .set_read_timeout(Some(config.connect_timeout))
        .and_then(|()| stream.set_write_timeout(Some(config.connect_timeout)))
        .map_err(|err| handshake_err(err.to_string()))?;
    let stream = connector
        .connect(&tls.domain, stream)
        .map_err(|err| handshake_err(err.to_string()))?;
    let tcp_ref = stream.get_ref();
    tcp_ref
        .set_read_timeout(None)
        .and_then(|()| tcp_ref.set_write_timeout(None))
        .map_err(|err| handshake_err(err.to_string()))?;
    Ok(ActiveConnection::Tls(Box::new(stream)))
}
