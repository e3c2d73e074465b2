//! Minimal Logstash-style TCP input used by the integration tests.
//!
//! Accepts any number of connections, splits each stream on newlines and
//! stores every line as parsed JSON in arrival order.

use std::{
    io::{BufRead, BufReader},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use serde_json::Value;

#[derive(Default)]
struct Received {
    lines: Mutex<Vec<Value>>,
    arrived: Condvar,
}

pub struct Collector {
    addr: SocketAddr,
    received: Arc<Received>,
    connections: Arc<AtomicUsize>,
}

impl Collector {
    pub fn start() -> Self {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind collector");
        let addr = listener.local_addr().expect("collector address");
        let received = Arc::new(Received::default());
        let connections = Arc::new(AtomicUsize::new(0));
        let thread_received = Arc::clone(&received);
        let thread_connections = Arc::clone(&connections);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                thread_connections.fetch_add(1, Ordering::SeqCst);
                let received = Arc::clone(&thread_received);
                thread::spawn(move || read_lines(stream, &received));
            }
        });
        Self {
            addr,
            received,
            connections,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Block until at least `count` lines arrived or `timeout` elapses, then
    /// return everything received so far.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> Vec<Value> {
        let deadline = Instant::now() + timeout;
        let mut lines = self.received.lines.lock();
        while lines.len() < count {
            if self
                .received
                .arrived
                .wait_until(&mut lines, deadline)
                .timed_out()
            {
                break;
            }
        }
        lines.clone()
    }
}

fn read_lines(stream: TcpStream, received: &Received) {
    for line in BufReader::new(stream).lines() {
        let Ok(line) = line else { return };
        let value = serde_json::from_str(&line).expect("collector received invalid JSON");
        received.lines.lock().push(value);
        received.arrived.notify_all();
    }
}

/// A local port with nothing listening on it.
pub fn unused_port() -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind scratch listener");
    listener.local_addr().expect("scratch address").port()
}
