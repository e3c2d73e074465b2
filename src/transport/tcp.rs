//! Threaded TCP/TLS implementation of [`Transport`].

use std::{
    net::{Shutdown, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::debug;
use parking_lot::Mutex;

use crate::{error::TransportError, record::DeliveryTag};

use super::{
    ConnectionState, EventSink, Transport, TransportConfig, TransportEvent,
    connection::open_connection,
};

enum IoCommand {
    Write {
        bytes: Vec<u8>,
        tag: DeliveryTag,
        timeout: Duration,
    },
    Close,
}

/// State shared between the owner and one session thread.
struct SessionShared {
    state: Mutex<ConnectionState>,
    aborted: AtomicBool,
    socket: Mutex<Option<TcpStream>>,
}

impl SessionShared {
    fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Connecting),
            aborted: AtomicBool::new(false),
            socket: Mutex::new(None),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
        self.set_state(ConnectionState::Disconnected);
        if let Some(socket) = self.socket.lock().take() {
            let _ = socket.shutdown(Shutdown::Both);
        }
    }

    fn remember_socket(&self, stream: &TcpStream) {
        let Ok(clone) = stream.try_clone() else {
            return;
        };
        let mut slot = self.socket.lock();
        if self.is_aborted() {
            let _ = clone.shutdown(Shutdown::Both);
        } else {
            *slot = Some(clone);
        }
    }
}

struct Session {
    tx: Sender<IoCommand>,
    shared: Arc<SessionShared>,
}

/// Stream-socket transport with optional TLS.
///
/// Each `connect` starts a session thread that owns the blocking socket.
/// Writes are handed to it over a channel and performed in issue order.
pub struct TcpTransport {
    config: TransportConfig,
    session: Option<Session>,
}

impl TcpTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn spawn_session(&mut self, sink: EventSink) {
        let (tx, rx) = unbounded();
        let shared = Arc::new(SessionShared::new());
        let config = self.config.clone();
        let thread_shared = Arc::clone(&shared);
        let thread_sink = sink.clone();
        let spawned = thread::Builder::new()
            .name(format!("logship-session-{}", sink.session()))
            .spawn(move || run_session(config, rx, thread_shared, thread_sink));
        match spawned {
            Ok(_) => self.session = Some(Session { tx, shared }),
            Err(err) => {
                sink.emit(TransportEvent::Disconnected(Some(TransportError::connect(
                    self.config.endpoint(),
                    err,
                ))));
            }
        }
    }

    fn send(&self, cmd: IoCommand) {
        if let Some(session) = &self.session {
            let _ = session.tx.send(cmd);
        }
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, sink: EventSink) {
        if self.state() != ConnectionState::Disconnected {
            return;
        }
        self.session = None;
        self.spawn_session(sink);
    }

    fn write(&mut self, bytes: Vec<u8>, tag: DeliveryTag, timeout: Duration) {
        self.send(IoCommand::Write {
            bytes,
            tag,
            timeout,
        });
    }

    fn disconnect_safely(&mut self) {
        self.send(IoCommand::Close);
    }

    fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            session.shared.abort();
        }
    }

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn state(&self) -> ConnectionState {
        self.session
            .as_ref()
            .map(|s| *s.shared.state.lock())
            .unwrap_or(ConnectionState::Disconnected)
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("endpoint", &self.config.endpoint())
            .field("state", &self.state())
            .finish()
    }
}

fn finish(shared: &SessionShared, sink: &EventSink, error: Option<TransportError>) {
    shared.set_state(ConnectionState::Disconnected);
    shared.socket.lock().take();
    if !shared.is_aborted() {
        sink.emit(TransportEvent::Disconnected(error));
    }
}

fn run_session(
    config: TransportConfig,
    rx: Receiver<IoCommand>,
    shared: Arc<SessionShared>,
    sink: EventSink,
) {
    let opened = open_connection(
        &config,
        |stream| shared.remember_socket(stream),
        |state| {
            if !shared.is_aborted() {
                shared.set_state(state);
            }
        },
    );
    let mut conn = match opened {
        Ok(conn) => conn,
        Err(err) => {
            debug!("logship: connection to {} failed: {err}", config.endpoint());
            finish(&shared, &sink, Some(err));
            return;
        }
    };
    if shared.is_aborted() {
        return;
    }
    shared.set_state(ConnectionState::Connected);
    sink.emit(TransportEvent::Secured);

    while let Ok(cmd) = rx.recv() {
        match cmd {
            IoCommand::Write {
                bytes,
                tag,
                timeout,
            } => match conn.send(&bytes, timeout) {
                Ok(()) => {
                    if shared.is_aborted() {
                        return;
                    }
                    sink.emit(TransportEvent::Wrote(tag));
                }
                Err(err) => {
                    debug!("logship: write of {tag} failed: {err}");
                    finish(&shared, &sink, Some(TransportError::write(err)));
                    return;
                }
            },
            IoCommand::Close => {
                shared.set_state(ConnectionState::Disconnecting);
                conn.close();
                finish(&shared, &sink, None);
                return;
            }
        }
    }
    // Owner dropped the session without a safe close.
    shared.set_state(ConnectionState::Disconnected);
}
