//! Dispatch worker: the single serial context of the shipper.
//!
//! The worker thread owns the [`ShippingQueue`] and the [`Transport`]. Every
//! mutation of either happens here, one command or event at a time, so at
//! most one network operation sequence is ever in progress. Records,
//! control commands, transport events and the periodic tick all arrive as
//! messages and are multiplexed with `select!`. Records travel on their own
//! unbounded channel; the [`Backlog`] counter bounds how many may be held.

use std::{
    collections::BTreeSet,
    io,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, never, select, tick, unbounded};
use log::{debug, warn};

use crate::{
    error::{ShipError, TransportError},
    rate_limited_warner::RateLimitedWarner,
    record::{DeliveryTag, LogRecord},
    transport::{EventSink, SessionEvent, Transport, TransportEvent},
};

use super::{
    backoff::BackoffState, config::ShipperConfig, queue::ShippingQueue,
    serialise::serialise_record,
};

/// Completion callback of a forced flush.
pub type FlushCallback = Box<dyn FnOnce(Result<(), ShipError>) + Send + 'static>;

/// Control commands processed by the worker thread.
///
/// Records already sent on the record channel are enqueued before any of
/// these is handled.
pub enum ShipCommand {
    /// Forced flush stamped with the cancellation epoch it was issued in.
    Flush {
        epoch: u64,
        callback: FlushCallback,
    },
    Cancel,
    Inspect(Sender<Vec<DeliveryTag>>),
    Shutdown(Sender<()>),
}

impl std::fmt::Debug for ShipCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flush { epoch, .. } => f.debug_struct("Flush").field("epoch", epoch).finish(),
            Self::Cancel => f.write_str("Cancel"),
            Self::Inspect(_) => f.write_str("Inspect"),
            Self::Shutdown(_) => f.write_str("Shutdown"),
        }
    }
}

/// Number of records accepted by the handle and not yet delivered or
/// dropped by the worker.
#[derive(Clone, Debug, Default)]
pub(crate) struct Backlog(Arc<AtomicUsize>);

impl Backlog {
    /// Claim a slot unless `limit` records are already held.
    pub(crate) fn try_reserve(&self, limit: usize) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                (held < limit).then_some(held + 1)
            })
            .is_ok()
    }

    pub(crate) fn release(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                Some(held.saturating_sub(1))
            });
    }

    pub(crate) fn len(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }
}

/// Where the worker is in the connect, drain, close cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    /// No connection attempt in progress.
    Idle,
    /// `connect` issued, waiting for `Secured`.
    Connecting,
    /// Writes issued, waiting for their acknowledgements.
    Draining,
    /// Every write acknowledged, waiting for the safe close to finish.
    Disconnecting,
}

/// Callers waiting for the outcome of the current send cycle.
///
/// Every waiter is resolved exactly once. All waiters registered before a
/// cycle ends share its outcome.
#[derive(Default)]
pub struct FlushWaiters {
    pending: Vec<FlushCallback>,
}

impl FlushWaiters {
    pub fn push(&mut self, callback: FlushCallback) {
        self.pending.push(callback);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn resolve(&mut self, result: Result<(), ShipError>) {
        for callback in self.pending.drain(..) {
            callback(result.clone());
        }
    }
}

pub(crate) struct Dispatcher<T: Transport> {
    queue: ShippingQueue,
    transport: T,
    link: LinkState,
    session: u64,
    events_tx: Sender<SessionEvent>,
    waiters: FlushWaiters,
    in_flight: BTreeSet<DeliveryTag>,
    next_tag: u64,
    backoff: Option<BackoffState>,
    epoch: Arc<AtomicU64>,
    backlog: Backlog,
    write_timeout: Duration,
    max_record_size: usize,
    serialise_warner: RateLimitedWarner,
    connect_warner: RateLimitedWarner,
}

impl<T: Transport> Dispatcher<T> {
    pub(crate) fn new(
        config: &ShipperConfig,
        transport: T,
        events_tx: Sender<SessionEvent>,
        epoch: Arc<AtomicU64>,
        backlog: Backlog,
    ) -> Self {
        Self {
            queue: ShippingQueue::new(),
            transport,
            link: LinkState::Idle,
            session: 0,
            events_tx,
            waiters: FlushWaiters::default(),
            in_flight: BTreeSet::new(),
            next_tag: 1,
            backoff: config.backoff.clone().map(BackoffState::new),
            epoch,
            backlog,
            write_timeout: config.write_timeout,
            max_record_size: config.max_record_size,
            serialise_warner: RateLimitedWarner::new(config.warn_interval),
            connect_warner: RateLimitedWarner::new(config.warn_interval),
        }
    }

    #[cfg(test)]
    pub(crate) fn queue(&self) -> &ShippingQueue {
        &self.queue
    }

    #[cfg(test)]
    pub(crate) fn link(&self) -> LinkState {
        self.link
    }

    #[cfg(test)]
    pub(crate) fn session(&self) -> u64 {
        self.session
    }

    /// Store `record` under the next delivery tag.
    pub(crate) fn enqueue(&mut self, record: LogRecord) -> DeliveryTag {
        let tag = DeliveryTag(self.next_tag);
        self.enqueue_tagged(tag, record);
        tag
    }

    /// Store `record` under an explicit `tag`, keeping the counter ahead of it.
    pub(crate) fn enqueue_tagged(&mut self, tag: DeliveryTag, record: LogRecord) {
        self.next_tag = self.next_tag.max(tag.0.saturating_add(1));
        if self.queue.enqueue(tag, record).is_some() {
            self.backlog.release();
        }
    }

    /// Remove `tag` from the queue and free its backlog slot.
    fn remove(&mut self, tag: DeliveryTag) {
        if self.queue.acknowledge(tag) {
            self.backlog.release();
        }
    }

    /// Nothing queued, or a live connection is already draining the backlog.
    fn has_nothing_to_send(&self) -> bool {
        self.queue.is_empty()
            || (self.link == LinkState::Draining && self.transport.is_connected())
    }

    /// Start a send cycle unless there is nothing to do.
    pub(crate) fn schedule_send(&mut self) {
        if self.link != LinkState::Idle {
            // The running cycle resolves any waiters when it ends.
            return;
        }
        if self.has_nothing_to_send() {
            self.waiters.resolve(Ok(()));
            return;
        }
        self.session += 1;
        self.link = LinkState::Connecting;
        debug!(
            "logship: connecting (session {}, {} pending records)",
            self.session,
            self.queue.len()
        );
        self.transport
            .connect(EventSink::new(self.session, self.events_tx.clone()));
    }

    pub(crate) fn force_send(&mut self, callback: FlushCallback) {
        if self.has_nothing_to_send() {
            callback(Ok(()));
            return;
        }
        self.waiters.push(callback);
        self.schedule_send();
    }

    /// Periodic background flush.
    pub(crate) fn on_tick(&mut self, now: Instant) {
        if let Some(backoff) = &self.backoff
            && !backoff.ready(now)
        {
            return;
        }
        self.schedule_send();
    }

    pub(crate) fn handle_event(&mut self, event: SessionEvent) {
        if event.session != self.session || self.link == LinkState::Idle {
            debug!("logship: ignoring event from stale session {}", event.session);
            return;
        }
        match event.event {
            TransportEvent::Secured => self.on_secured(),
            TransportEvent::Wrote(tag) => self.on_wrote(tag),
            TransportEvent::Disconnected(error) => self.on_disconnected(error),
        }
    }

    fn on_secured(&mut self) {
        if let Some(backoff) = &mut self.backoff {
            backoff.record_success();
        }
        self.link = LinkState::Draining;
        self.in_flight.clear();
        for (tag, record) in self.queue.drain_ordered() {
            match serialise_record(&record, self.max_record_size) {
                Ok(bytes) => {
                    self.in_flight.insert(tag);
                    self.transport.write(bytes, tag, self.write_timeout);
                }
                Err(err) => self.drop_unserialisable(tag, &err),
            }
        }
        self.transport.disconnect_safely();
        if self.in_flight.is_empty() {
            self.finish_drain();
        }
    }

    fn drop_unserialisable(&mut self, tag: DeliveryTag, err: &io::Error) {
        warn!("logship: dropping record {tag}: serialisation failed: {err}");
        self.remove(tag);
        self.serialise_warner.record_drop();
        self.serialise_warner.warn_if_due(|count| {
            warn!("logship: dropped {count} records due to serialisation failures");
        });
    }

    fn on_wrote(&mut self, tag: DeliveryTag) {
        self.remove(tag);
        if self.in_flight.remove(&tag) && self.in_flight.is_empty() {
            self.finish_drain();
        }
    }

    fn finish_drain(&mut self) {
        if self.link == LinkState::Draining {
            self.link = LinkState::Disconnecting;
            self.waiters.resolve(Ok(()));
        }
    }

    fn on_disconnected(&mut self, error: Option<TransportError>) {
        self.link = LinkState::Idle;
        self.in_flight.clear();
        match error {
            // Waiters registered after the drain finished still need their
            // records sent.
            None => {
                if !self.waiters.is_empty() {
                    self.schedule_send();
                }
            }
            Some(err) => {
                if let Some(backoff) = &mut self.backoff {
                    let delay = backoff.record_failure(Instant::now());
                    debug!("logship: next periodic attempt in {delay:?}");
                }
                self.connect_warner.record_drop();
                self.connect_warner.warn_if_due(|count| {
                    warn!(
                        "logship: {count} send cycles failed; {} records remain queued: {err}",
                        self.queue.len()
                    );
                });
                self.waiters.resolve(Err(ShipError::Transport(err)));
            }
        }
    }

    /// Abandon the current cycle. Queued records stay for a later flush.
    pub(crate) fn cancel_all(&mut self) {
        self.transport.disconnect();
        // Events of the abandoned session no longer match.
        self.session += 1;
        self.link = LinkState::Idle;
        self.in_flight.clear();
        self.waiters.resolve(Err(ShipError::Cancelled));
    }

    fn is_stale(&self, epoch: u64) -> bool {
        epoch != self.epoch.load(Ordering::Acquire)
    }

    pub(crate) fn handle_command(&mut self, cmd: ShipCommand) {
        match cmd {
            ShipCommand::Flush { epoch, callback } => {
                if self.is_stale(epoch) {
                    callback(Err(ShipError::Cancelled));
                } else {
                    self.force_send(callback);
                }
            }
            ShipCommand::Cancel => self.cancel_all(),
            ShipCommand::Inspect(reply) => {
                let _ = reply.send(self.queue.tags());
            }
            ShipCommand::Shutdown(ack) => {
                self.shutdown();
                let _ = ack.send(());
            }
        }
    }

    fn shutdown(&mut self) {
        self.cancel_all();
        if !self.queue.is_empty() {
            warn!(
                "logship: shutting down with {} unsent records",
                self.queue.len()
            );
        }
    }

    /// Enqueue every record already waiting on `records`.
    fn take_pending(&mut self, records: &Receiver<LogRecord>) {
        while let Ok(record) = records.try_recv() {
            self.enqueue(record);
        }
    }

    fn run(
        mut self,
        records: Receiver<LogRecord>,
        control: Receiver<ShipCommand>,
        events: Receiver<SessionEvent>,
        ticker: Receiver<Instant>,
    ) {
        loop {
            select! {
                recv(records) -> record => match record {
                    Ok(record) => {
                        self.enqueue(record);
                    }
                    Err(_) => {
                        self.shutdown();
                        break;
                    }
                },
                recv(control) -> cmd => {
                    // Control commands see every record shipped before them.
                    self.take_pending(&records);
                    match cmd {
                        Ok(cmd @ ShipCommand::Shutdown(_)) => {
                            self.handle_command(cmd);
                            break;
                        }
                        Ok(cmd) => self.handle_command(cmd),
                        Err(_) => {
                            self.shutdown();
                            break;
                        }
                    }
                },
                recv(events) -> event => {
                    if let Ok(event) = event {
                        self.handle_event(event);
                    }
                },
                recv(ticker) -> now => {
                    if let Ok(now) = now {
                        self.take_pending(&records);
                        self.on_tick(now);
                    }
                },
            }
        }
    }
}

/// Channels and thread handle of a running worker.
pub(crate) struct WorkerHandle {
    pub(crate) records: Sender<LogRecord>,
    pub(crate) control: Sender<ShipCommand>,
    pub(crate) thread: thread::JoinHandle<()>,
}

/// Spawn the worker thread driving `transport`.
pub(crate) fn spawn_worker<T: Transport + 'static>(
    config: &ShipperConfig,
    transport: T,
    epoch: Arc<AtomicU64>,
    backlog: Backlog,
) -> io::Result<WorkerHandle> {
    let (records, records_rx) = unbounded();
    let (control, control_rx) = unbounded();
    let (events_tx, events_rx) = unbounded();
    let ticker = config.flush_interval.map_or_else(never, tick);
    let dispatcher = Dispatcher::new(config, transport, events_tx, epoch, backlog);
    let thread = thread::Builder::new()
        .name("logship-dispatch".into())
        .spawn(move || dispatcher.run(records_rx, control_rx, events_rx, ticker))?;
    Ok(WorkerHandle {
        records,
        control,
        thread,
    })
}
