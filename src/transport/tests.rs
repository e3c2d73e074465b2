//! Tests for the TCP/TLS transport.

use std::{
    io::Read,
    net::{SocketAddr, TcpListener},
    sync::mpsc,
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, unbounded};
use native_tls::{Identity, TlsAcceptor};
use rstest::{fixture, rstest};

use crate::{error::TransportError, record::DeliveryTag};

use super::{
    ConnectionState, EventSink, SessionEvent, TcpTransport, Transport, TransportConfig,
    TransportEvent, TrustPolicy,
};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

#[fixture]
fn tcp_listener() -> TcpListener {
    TcpListener::bind(("127.0.0.1", 0)).expect("bind ephemeral listener")
}

fn sink(session: u64) -> (EventSink, Receiver<SessionEvent>) {
    let (tx, rx) = unbounded();
    (EventSink::new(session, tx), rx)
}

fn next_event(rx: &Receiver<SessionEvent>) -> SessionEvent {
    rx.recv_timeout(EVENT_TIMEOUT).expect("transport event")
}

fn config_for(addr: SocketAddr) -> TransportConfig {
    let mut config = TransportConfig::tcp(addr.ip().to_string(), addr.port());
    config.connect_timeout = Duration::from_millis(500);
    config
}

/// Accept one connection and return everything read until EOF.
fn spawn_reader(listener: TcpListener) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept connection");
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).expect("read until eof");
        tx.send(buf).expect("send payload");
    });
    rx
}

/// Self-signed certificate for `localhost` and `127.0.0.1`.
const TEST_CERT: &[u8] = include_bytes!("testdata/localhost.crt");
const TEST_KEY: &[u8] = include_bytes!("testdata/localhost.key");

/// Accept one TLS connection with the self-signed identity and return the
/// plaintext read until close, or the handshake error.
fn spawn_tls_reader(listener: TcpListener) -> mpsc::Receiver<Result<Vec<u8>, String>> {
    let identity = Identity::from_pkcs8(TEST_CERT, TEST_KEY).expect("load test identity");
    let acceptor = TlsAcceptor::new(identity).expect("build acceptor");
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept connection");
        let outcome = acceptor
            .accept(stream)
            .map_err(|err| err.to_string())
            .and_then(|mut tls| {
                let mut buf = Vec::new();
                tls.read_to_end(&mut buf).map_err(|err| err.to_string())?;
                Ok(buf)
            });
        let _ = tx.send(outcome);
    });
    rx
}

fn tls_config_for(addr: SocketAddr, trust: TrustPolicy) -> TransportConfig {
    let mut config = config_for(addr).with_tls(trust);
    config.connect_timeout = Duration::from_secs(2);
    if let Some(tls) = config.tls.as_mut() {
        tls.domain = "localhost".into();
    }
    config
}

#[rstest]
fn writes_are_acknowledged_and_safe_close_reports_clean_disconnect(tcp_listener: TcpListener) {
    let addr = tcp_listener.local_addr().expect("listener address");
    let received = spawn_reader(tcp_listener);
    let mut transport = TcpTransport::new(config_for(addr));
    let (sink, events) = sink(1);

    transport.connect(sink);
    assert!(matches!(next_event(&events).event, TransportEvent::Secured));
    assert!(transport.is_connected());

    transport.write(b"first\n".to_vec(), DeliveryTag(1), Duration::from_secs(1));
    transport.write(b"second\n".to_vec(), DeliveryTag(2), Duration::from_secs(1));
    transport.disconnect_safely();

    let mut wrote = Vec::new();
    loop {
        let event = next_event(&events);
        assert_eq!(event.session, 1);
        match event.event {
            TransportEvent::Wrote(tag) => wrote.push(tag),
            TransportEvent::Disconnected(err) => {
                assert!(err.is_none(), "safe close must be clean: {err:?}");
                break;
            }
            TransportEvent::Secured => panic!("unexpected second secured event"),
        }
    }
    assert_eq!(wrote, vec![DeliveryTag(1), DeliveryTag(2)]);
    assert_eq!(transport.state(), ConnectionState::Disconnected);

    let bytes = received.recv_timeout(EVENT_TIMEOUT).expect("peer saw eof");
    assert_eq!(bytes, b"first\nsecond\n");
}

#[rstest]
fn refused_connection_reports_error(tcp_listener: TcpListener) {
    let addr = tcp_listener.local_addr().expect("listener address");
    drop(tcp_listener);
    let mut transport = TcpTransport::new(config_for(addr));
    let (sink, events) = sink(3);

    transport.connect(sink);
    match next_event(&events).event {
        TransportEvent::Disconnected(Some(TransportError::Connect { .. })) => {}
        other => panic!("expected connect failure, got {other:?}"),
    }
    assert!(!transport.is_connected());
}

#[rstest]
fn connect_is_idempotent_while_live(tcp_listener: TcpListener) {
    let addr = tcp_listener.local_addr().expect("listener address");
    let _received = spawn_reader(tcp_listener);
    let mut transport = TcpTransport::new(config_for(addr));
    let (first, events) = sink(1);
    let (second, second_events) = sink(2);

    transport.connect(first);
    assert!(matches!(next_event(&events).event, TransportEvent::Secured));
    transport.connect(second);
    assert!(
        second_events
            .recv_timeout(Duration::from_millis(200))
            .is_err(),
        "second connect must not open another session"
    );
    transport.disconnect();
}

#[rstest]
fn hard_disconnect_suppresses_events(tcp_listener: TcpListener) {
    let addr = tcp_listener.local_addr().expect("listener address");
    let _received = spawn_reader(tcp_listener);
    let mut transport = TcpTransport::new(config_for(addr));
    let (sink, events) = sink(9);

    transport.connect(sink);
    assert!(matches!(next_event(&events).event, TransportEvent::Secured));
    transport.disconnect();
    transport.write(b"late\n".to_vec(), DeliveryTag(5), Duration::from_secs(1));
    assert_eq!(transport.state(), ConnectionState::Disconnected);
    assert!(
        events.recv_timeout(Duration::from_millis(300)).is_err(),
        "no events after a hard disconnect"
    );
}

#[rstest]
fn tls_handshake_respects_timeout(tcp_listener: TcpListener) {
    let addr = tcp_listener.local_addr().expect("listener address");
    thread::spawn(move || {
        let (stream, _) = tcp_listener.accept().expect("accept connection");
        // Keep the TCP connection open without speaking TLS.
        thread::sleep(Duration::from_secs(3));
        drop(stream);
    });

    let mut config = config_for(addr).with_tls(TrustPolicy::Permissive);
    config.connect_timeout = Duration::from_millis(250);
    let mut transport = TcpTransport::new(config);
    let (sink, events) = sink(4);
    let start = Instant::now();

    transport.connect(sink);
    let event = next_event(&events);
    assert!(
        matches!(
            event.event,
            TransportEvent::Disconnected(Some(TransportError::Handshake { .. }))
        ),
        "stalled peer must fail the handshake"
    );
    assert!(
        start.elapsed() < Duration::from_secs(2),
        "handshake should respect timeout, elapsed {:?}",
        start.elapsed()
    );
}

#[rstest]
fn tls_defaults_to_strict_trust() {
    let config = TransportConfig::tcp("collector.example", 443).with_tls(TrustPolicy::default());
    let tls = config.tls.expect("tls configured");
    assert_eq!(tls.trust, TrustPolicy::Strict);
    assert_eq!(tls.domain, "collector.example");
}

#[rstest]
fn permissive_trust_accepts_self_signed_collector(tcp_listener: TcpListener) {
    let addr = tcp_listener.local_addr().expect("listener address");
    let received = spawn_tls_reader(tcp_listener);
    let mut transport = TcpTransport::new(tls_config_for(addr, TrustPolicy::Permissive));
    let (sink, events) = sink(5);

    transport.connect(sink);
    assert!(matches!(next_event(&events).event, TransportEvent::Secured));
    transport.write(b"{\"message\":\"hi\"}\n".to_vec(), DeliveryTag(1), Duration::from_secs(1));
    transport.disconnect_safely();
    assert!(matches!(
        next_event(&events).event,
        TransportEvent::Wrote(DeliveryTag(1))
    ));
    assert!(matches!(
        next_event(&events).event,
        TransportEvent::Disconnected(None)
    ));

    let bytes = received
        .recv_timeout(EVENT_TIMEOUT)
        .expect("collector finished")
        .expect("collector completed the handshake");
    assert_eq!(bytes, b"{\"message\":\"hi\"}\n");
}

#[rstest]
fn strict_trust_rejects_self_signed_collector(tcp_listener: TcpListener) {
    let addr = tcp_listener.local_addr().expect("listener address");
    let received = spawn_tls_reader(tcp_listener);
    let mut transport = TcpTransport::new(tls_config_for(addr, TrustPolicy::Strict));
    let (sink, events) = sink(6);

    transport.connect(sink);
    match next_event(&events).event {
        TransportEvent::Disconnected(Some(TransportError::Handshake { endpoint, .. })) => {
            assert_eq!(endpoint, addr.to_string());
        }
        other => panic!("expected handshake failure, got {other:?}"),
    }
    assert!(!transport.is_connected());
    assert!(
        received
            .recv_timeout(EVENT_TIMEOUT)
            .expect("collector finished")
            .is_err(),
        "collector must not see a completed session"
    );
}

#[rstest]
fn peer_close_is_reported_as_closed(tcp_listener: TcpListener) {
    let addr = tcp_listener.local_addr().expect("listener address");
    let peer = thread::spawn(move || {
        let (stream, _) = tcp_listener.accept().expect("accept connection");
        drop(stream);
    });
    let mut transport = TcpTransport::new(config_for(addr));
    let (sink, events) = sink(7);

    transport.connect(sink);
    assert!(matches!(next_event(&events).event, TransportEvent::Secured));
    peer.join().expect("peer closed");

    // The first write after the close can still land in the send buffer.
    for tag in 1..=10 {
        transport.write(b"ping\n".to_vec(), DeliveryTag(tag), Duration::from_secs(1));
        match next_event(&events).event {
            TransportEvent::Wrote(_) => thread::sleep(Duration::from_millis(50)),
            TransportEvent::Disconnected(err) => {
                assert!(
                    matches!(err, Some(TransportError::Closed)),
                    "unexpected disconnect {err:?}"
                );
                assert_eq!(transport.state(), ConnectionState::Disconnected);
                return;
            }
            TransportEvent::Secured => panic!("unexpected second secured event"),
        }
    }
    panic!("peer close was never reported");
}
