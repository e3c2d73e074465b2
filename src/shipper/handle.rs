//! Public shipper type exported by the crate.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::Duration,
};

use crossbeam_channel::{Sender, bounded};
use log::warn;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::{
    error::ShipError,
    flatten::{parse_record, prepare_record},
    rate_limited_warner::RateLimitedWarner,
    record::{DeliveryTag, LogRecord},
    transport::{TcpTransport, Transport, TransportConfig},
};

use super::{
    config::ShipperConfig,
    worker::{Backlog, ShipCommand, WorkerHandle, spawn_worker},
};

/// Time allowed for the worker to acknowledge shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Sending halves of the worker's channels.
struct Channels {
    records: Sender<LogRecord>,
    control: Sender<ShipCommand>,
}

/// Handle to a running shipping engine.
///
/// Records are enqueued without blocking and delivered by a background
/// worker as newline-delimited JSON. At most `capacity` undelivered records
/// are held; beyond that [`ship`](Self::ship) returns
/// [`ShipError::QueueFull`]. Flush, cancel and shutdown requests travel on
/// a separate channel and are never refused for lack of space. The worker flushes periodically and on
/// demand through [`force_send`](Self::force_send) or
/// [`flush`](Self::flush). Dropping the handle cancels outstanding work and
/// joins the worker.
pub struct LogShipper {
    channels: Option<Channels>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    epoch: Arc<AtomicU64>,
    backlog: Backlog,
    capacity: usize,
    warner: RateLimitedWarner,
    token: Option<String>,
}

impl LogShipper {
    /// Ship to `transport` with default settings.
    pub fn new(transport: TransportConfig) -> io::Result<Self> {
        Self::with_config(ShipperConfig::default().with_transport(transport))
    }

    /// Start the engine over a [`TcpTransport`] built from `config`.
    pub fn with_config(config: ShipperConfig) -> io::Result<Self> {
        let transport = TcpTransport::new(config.transport.clone());
        Self::with_transport(config, transport)
    }

    /// Start the engine over a caller-supplied transport.
    pub fn with_transport<T: Transport + 'static>(
        config: ShipperConfig,
        transport: T,
    ) -> io::Result<Self> {
        let epoch = Arc::new(AtomicU64::new(0));
        let backlog = Backlog::default();
        let WorkerHandle {
            records,
            control,
            thread,
        } = spawn_worker(&config, transport, Arc::clone(&epoch), backlog.clone())?;
        Ok(Self {
            channels: Some(Channels { records, control }),
            handle: Mutex::new(Some(thread)),
            epoch,
            backlog,
            capacity: config.capacity,
            warner: RateLimitedWarner::new(config.warn_interval),
            token: config.token,
        })
    }

    /// Enqueue a flattened record. Never blocks.
    pub fn ship(&self, record: LogRecord) -> Result<(), ShipError> {
        let Some(channels) = &self.channels else {
            self.record_drop("after shutdown");
            return Err(ShipError::Closed);
        };
        if !self.backlog.try_reserve(self.capacity) {
            self.record_drop("because the backlog is full");
            return Err(ShipError::QueueFull);
        }
        if channels.records.send(record).is_err() {
            self.backlog.release();
            self.record_drop("because the worker has stopped");
            return Err(ShipError::Closed);
        }
        Ok(())
    }

    /// Flatten a nested JSON object, merge the shipping token and enqueue
    /// the result.
    pub fn ship_object(&self, object: Map<String, Value>) -> Result<(), ShipError> {
        self.ship(prepare_record(object, self.token.as_deref()))
    }

    /// Parse a JSON object, flatten it, merge the shipping token and enqueue
    /// the result.
    pub fn ship_json(&self, text: &str) -> Result<(), ShipError> {
        let Some(record) = parse_record(text, self.token.as_deref()) else {
            self.record_drop("because the payload is not a JSON object");
            return Err(ShipError::InvalidRecord);
        };
        self.ship(record)
    }

    /// Request delivery of the current backlog and report the outcome to
    /// `on_complete`.
    ///
    /// Succeeds immediately when nothing is queued or a connection is
    /// already live. The callback runs on the worker thread, or on the
    /// calling thread when the request cannot be posted.
    pub fn force_send(&self, on_complete: impl FnOnce(Result<(), ShipError>) + Send + 'static) {
        let Some(channels) = &self.channels else {
            on_complete(Err(ShipError::Closed));
            return;
        };
        let cmd = ShipCommand::Flush {
            epoch: self.epoch.load(Ordering::Acquire),
            callback: Box::new(on_complete),
        };
        if let Err(err) = channels.control.send(cmd)
            && let ShipCommand::Flush { callback, .. } = err.into_inner()
        {
            callback(Err(ShipError::Closed));
        }
    }

    /// Blocking variant of [`force_send`](Self::force_send).
    pub fn flush(&self, timeout: Duration) -> Result<(), ShipError> {
        let (done_tx, done_rx) = bounded(1);
        self.force_send(move |result| {
            let _ = done_tx.send(result);
        });
        self.warner.flush(|count| {
            warn!("logship: dropped {count} records in the last interval");
        });
        done_rx
            .recv_timeout(timeout)
            .unwrap_or(Err(ShipError::Timeout))
    }

    /// Abort pending sends and close the connection immediately.
    ///
    /// Queued records are kept and go out with the next flush. Pending
    /// flush callbacks resolve with [`ShipError::Cancelled`].
    pub fn cancel_sending(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        if let Some(channels) = &self.channels
            && channels.control.send(ShipCommand::Cancel).is_err()
        {
            warn!("logship: cancellation could not reach the worker");
        }
    }

    /// Tags of records still waiting for acknowledgement, in send order.
    pub fn pending_tags(&self, timeout: Duration) -> Option<Vec<DeliveryTag>> {
        let channels = self.channels.as_ref()?;
        let (reply_tx, reply_rx) = bounded(1);
        channels.control.send(ShipCommand::Inspect(reply_tx)).ok()?;
        reply_rx.recv_timeout(timeout).ok()
    }

    /// Cancel outstanding work and wait for the worker to exit.
    pub fn close(&mut self) {
        self.request_shutdown();
        self.join_worker();
    }

    fn request_shutdown(&mut self) {
        let Some(channels) = self.channels.take() else {
            return;
        };
        self.epoch.fetch_add(1, Ordering::AcqRel);
        let (ack_tx, ack_rx) = bounded(1);
        if channels.control.send(ShipCommand::Shutdown(ack_tx)).is_err() {
            return;
        }
        let _ = ack_rx.recv_timeout(SHUTDOWN_TIMEOUT);
    }

    fn join_worker(&mut self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if handle.join().is_err() {
            warn!("logship: dispatch worker panicked");
        }
    }

    fn record_drop(&self, reason: &str) {
        self.warner.record_drop();
        self.warner.warn_if_due(|count| {
            warn!("logship: dropped {count} records {reason}");
        });
    }
}

impl Drop for LogShipper {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for LogShipper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogShipper")
            .field("open", &self.channels.is_some())
            .field("backlog", &self.backlog.len())
            .field("epoch", &self.epoch.load(Ordering::Relaxed))
            .finish()
    }
}
