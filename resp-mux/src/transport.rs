//! Multiplexed, pipelined transport over one duplex byte channel.
//!
//! A [`Transport`] is a cheap cloneable handle. Any number of tasks may send
//! on it concurrently; each send returns an [`Operation`] that resolves to
//! the reply [`Frame`]. Replies are paired with requests strictly in the
//! order requests were written. Push frames bypass the pairing and go to the
//! handler registered with [`TransportBuilder::on_push`].
//!
//! Two tasks run per transport: the writer task (see the `writer` module)
//! and the read loop below. The read loop owns the receive buffer; frames
//! are split off it, so nothing handed to callers aliases memory that a
//! later read may reuse.
//!
//! # Example
//!
//! ```
//! use resp_mux::TransportBuilder;
//! use resp_proto::Request;
//! use tokio::io::{AsyncReadExt, AsyncWriteExt};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let (client, mut server) = tokio::io::duplex(1024);
//! let (read_half, write_half) = tokio::io::split(client);
//! let transport = TransportBuilder::new().spawn(read_half, write_half)?;
//!
//! let reply = tokio::spawn({
//!     let transport = transport.clone();
//!     async move { transport.call(&Request::ping()).await }
//! });
//! let mut request = [0u8; 14];
//! server.read_exact(&mut request).await?;
//! server.write_all(b"+PONG\r\n").await?;
//!
//! assert_eq!(reply.await.unwrap()?.as_bytes(), b"+PONG\r\n");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # }).unwrap();
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use resp_proto::{Cursor, Scan, ScanState, Value, WriteRequest};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{Notify, mpsc};
use tracing::{debug, trace, warn};

use crate::cancel::CancelToken;
use crate::config::TransportConfig;
use crate::error::Error;
use crate::frame::Frame;
use crate::metrics;
use crate::operation::{Operation, OperationPool, Outcome, Remote};
use crate::profile::{ProfileOutcome, Profiler};
use crate::writer::{Outbound, Requests, writer_loop};

type PushHandler = Box<dyn Fn(Frame) + Send + Sync>;

// ── State ───────────────────────────────────────────────────────────────

/// Lifecycle of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransportState {
    /// Built, tasks not started yet.
    Idle = 0,
    /// Accepting requests.
    Running = 1,
    /// Refusing new requests, waiting for in-flight replies.
    Draining = 2,
    /// Done. Every operation has an outcome.
    Closed = 3,
}

impl TransportState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TransportState::Idle,
            1 => TransportState::Running,
            2 => TransportState::Draining,
            _ => TransportState::Closed,
        }
    }
}

// ── Pending queue ───────────────────────────────────────────────────────

/// A request that has been accepted for writing and awaits its reply.
pub(crate) struct InFlight {
    remote: Remote<Frame, Error>,
    queued_at: Instant,
    /// Command name, kept only when profiling.
    command: Option<Bytes>,
}

struct Queue {
    pending: VecDeque<InFlight>,
    fault: Option<Error>,
}

pub(crate) struct Shared {
    state: AtomicU8,
    queue: Mutex<Queue>,
    /// Accepted by a sender but not yet admitted by the writer task.
    queued: AtomicUsize,
    reader_wake: Notify,
    pub(crate) stop_writer: Notify,
    closed: Notify,
    pub(crate) config: TransportConfig,
    ops: OperationPool<Frame, Error>,
    on_push: Option<PushHandler>,
    profiler: Option<Profiler>,
}

impl Shared {
    pub(crate) fn state(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// A fresh operation, canceled after `timeout` when one is given.
    fn operation(
        &self,
        timeout: Option<Duration>,
    ) -> (Operation<Frame, Error>, Remote<Frame, Error>) {
        match timeout {
            Some(timeout) => self.ops.create_timed(timeout),
            None => self.ops.create(None),
        }
    }

    fn inflight<R>(&self, remote: Remote<Frame, Error>, request: &R) -> InFlight
    where
        R: WriteRequest + ?Sized,
    {
        InFlight {
            remote,
            queued_at: Instant::now(),
            command: self
                .profiler
                .as_ref()
                .map(|_| Bytes::copy_from_slice(request.command())),
        }
    }

    /// Stop taking requests. The read loop closes the transport once nothing
    /// is owed. Returns `false` if the transport was not running.
    pub(crate) fn drain(&self) -> bool {
        let running = self
            .state
            .compare_exchange(
                TransportState::Running as u8,
                TransportState::Draining as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if running {
            self.reader_wake.notify_one();
        }
        running
    }

    /// Move the remotes of `frames` onto the pending queue and collect their
    /// bytes into `out`. Returns `false` (failing the remotes instead) once
    /// the transport is closed.
    pub(crate) fn admit(
        &self,
        frames: impl Iterator<Item = Outbound>,
        out: &mut Vec<Bytes>,
    ) -> bool {
        let mut admitted = 0;
        let mut queue = self.queue.lock();
        if self.state() == TransportState::Closed {
            let err = queue.fault.clone().unwrap_or(Error::Closed);
            drop(queue);
            for frame in frames {
                admitted += 1;
                fail_all(frame.requests, &err, self.profiler.as_ref());
            }
            self.dequeued(admitted);
            return false;
        }
        for frame in frames {
            admitted += 1;
            out.push(frame.bytes);
            queue.pending.extend(frame.requests);
        }
        drop(queue);
        self.dequeued(admitted);
        true
    }

    /// Fail an outbound frame that will never be written.
    pub(crate) fn reject(&self, frame: Outbound) {
        let err = self.queue.lock().fault.clone().unwrap_or(Error::Closed);
        fail_all(frame.requests, &err, self.profiler.as_ref());
        self.dequeued(1);
    }

    fn dequeued(&self, n: usize) {
        if n > 0
            && self.queued.fetch_sub(n, Ordering::AcqRel) == n
            && self.state() == TransportState::Draining
        {
            self.reader_wake.notify_one();
        }
    }

    /// Nothing accepted is still waiting for a reply.
    fn is_idle(&self) -> bool {
        self.queued.load(Ordering::Acquire) == 0 && self.queue.lock().pending.is_empty()
    }

    fn dispatch(&self, frame: Frame) -> Result<(), Error> {
        if frame.is_push() {
            metrics::PUSHES_RECEIVED.increment();
            trace!(bytes = frame.len(), "push dispatched");
            if let Some(on_push) = &self.on_push {
                on_push(frame);
            }
            return Ok(());
        }

        let Some(inflight) = self.queue.lock().pending.pop_front() else {
            warn!(bytes = frame.len(), "reply with no pending request");
            return Err(Error::UnexpectedResponse);
        };
        metrics::REPLIES_RECEIVED.increment();

        let outcome = match &self.profiler {
            Some(_) if frame.reader().is_error().unwrap_or(false) => ProfileOutcome::ServerError,
            _ => ProfileOutcome::Reply,
        };
        let outcome = if inflight.remote.try_complete(Outcome::Ok(frame)) {
            outcome
        } else {
            metrics::REPLIES_DISCARDED.increment();
            trace!("canceled reply discarded");
            ProfileOutcome::Discarded
        };
        record(self.profiler.as_ref(), &inflight, outcome);
        Ok(())
    }

    /// Terminate the connection with `err`: every pending and queued
    /// operation gets `err`, and the transport is closed.
    pub(crate) fn fail(&self, err: Error) {
        let (previous, drained) = {
            let mut queue = self.queue.lock();
            if queue.fault.is_none() {
                queue.fault = Some(err.clone());
            }
            let previous = self.state.swap(TransportState::Closed as u8, Ordering::AcqRel);
            (
                TransportState::from_u8(previous),
                std::mem::take(&mut queue.pending),
            )
        };
        if previous != TransportState::Closed {
            warn!(error = %err, pending = drained.len(), "transport failed");
            metrics::TRANSPORT_FAULTS.increment();
            metrics::TRANSPORTS_ACTIVE.decrement();
        }
        for inflight in drained {
            inflight.remote.try_complete(Outcome::Fault(err.clone()));
            record(self.profiler.as_ref(), &inflight, ProfileOutcome::Faulted);
        }
        self.wake_all();
    }

    /// Clean shutdown once nothing is owed.
    fn shut(&self) {
        let previous = {
            let _queue = self.queue.lock();
            self.state.swap(TransportState::Closed as u8, Ordering::AcqRel)
        };
        if TransportState::from_u8(previous) != TransportState::Closed {
            debug!("transport closed");
            metrics::TRANSPORTS_ACTIVE.decrement();
        }
        self.wake_all();
    }

    fn wake_all(&self) {
        self.stop_writer.notify_one();
        self.reader_wake.notify_one();
        self.closed.notify_waiters();
    }
}

fn fail_all(requests: Requests, err: &Error, profiler: Option<&Profiler>) {
    for inflight in requests {
        inflight.remote.try_complete(Outcome::Fault(err.clone()));
        record(profiler, &inflight, ProfileOutcome::Faulted);
    }
}

fn record(profiler: Option<&Profiler>, inflight: &InFlight, outcome: ProfileOutcome) {
    if let (Some(profiler), Some(command)) = (profiler, &inflight.command) {
        profiler.record(command.clone(), inflight.queued_at.elapsed(), outcome);
    }
}

/// Counts a request as queued until the channel takes it.
struct QueuedGuard<'a> {
    shared: &'a Shared,
    armed: bool,
}

impl Drop for QueuedGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.dequeued(1);
        }
    }
}

// ── Read loop ───────────────────────────────────────────────────────────

async fn read_loop<R>(mut reader: R, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(shared.config.read_buffer_size);
    let mut scan = ScanState::with_options(shared.config.scan);

    let fault = 'read: loop {
        if shared.state() == TransportState::Closed {
            break None;
        }
        loop {
            let mut cursor = Cursor::new(&buf[..]);
            match scan.scan(&mut cursor) {
                Ok(Scan::Complete(n)) => {
                    let frame = Frame::new(buf.split_to(n).freeze());
                    if let Err(e) = shared.dispatch(frame) {
                        break 'read Some(e);
                    }
                }
                Ok(Scan::Incomplete) => break,
                Err(e) => break 'read Some(Error::Protocol(e)),
            }
        }

        if shared.state() == TransportState::Draining && shared.is_idle() {
            break None;
        }

        let needed = scan
            .bytes_needed()
            .map_or(0, |n| (scan.offset() + n).saturating_sub(buf.len()));
        buf.reserve(needed.max(shared.config.read_buffer_size));

        tokio::select! {
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) => {
                    if buf.is_empty() && shared.is_idle() {
                        debug!("peer closed the stream");
                        break 'read None;
                    }
                    break 'read Some(Error::UnexpectedEof);
                }
                Ok(n) => {
                    metrics::BYTES_RECEIVED.add(n as u64);
                }
                Err(e) => break 'read Some(Error::from(e)),
            },
            _ = shared.reader_wake.notified() => {}
        }
    };

    match fault {
        Some(err) => shared.fail(err),
        None => shared.shut(),
    }
}

// ── TransportBuilder ────────────────────────────────────────────────────

/// Builder for [`Transport`].
pub struct TransportBuilder {
    config: TransportConfig,
    on_push: Option<PushHandler>,
    profiler: Option<Profiler>,
}

impl Default for TransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportBuilder {
    pub fn new() -> Self {
        Self {
            config: TransportConfig::default(),
            on_push: None,
            profiler: None,
        }
    }

    pub fn config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a handler for push frames. It runs on the read loop, so it
    /// should hand work off rather than block.
    pub fn on_push<F: Fn(Frame) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.on_push = Some(Box::new(f));
        self
    }

    /// Record latency and outcome of every request into `profiler`.
    pub fn profiler(mut self, profiler: Profiler) -> Self {
        self.profiler = Some(profiler);
        self
    }

    /// Start the read loop and writer task over the given halves.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<R, W>(self, reader: R, writer: W) -> Result<Transport, Error>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.config.validate()?;
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let shared = Arc::new(Shared {
            state: AtomicU8::new(TransportState::Idle as u8),
            queue: Mutex::new(Queue {
                pending: VecDeque::new(),
                fault: None,
            }),
            queued: AtomicUsize::new(0),
            reader_wake: Notify::new(),
            stop_writer: Notify::new(),
            closed: Notify::new(),
            ops: OperationPool::new(self.config.operation_pool_size),
            config: self.config,
            on_push: self.on_push,
            profiler: self.profiler,
        });

        shared
            .state
            .store(TransportState::Running as u8, Ordering::Release);
        metrics::TRANSPORTS_ACTIVE.increment();
        tokio::spawn(writer_loop(rx, writer, Arc::clone(&shared)));
        tokio::spawn(read_loop(reader, Arc::clone(&shared)));
        debug!(
            channel_capacity = shared.config.channel_capacity,
            "transport started"
        );

        Ok(Transport { shared, tx })
    }
}

// ── Transport ───────────────────────────────────────────────────────────

/// Handle to a running transport. Clones share the connection.
#[derive(Clone)]
pub struct Transport {
    shared: Arc<Shared>,
    tx: mpsc::Sender<Outbound>,
}

impl Transport {
    /// Start a transport with default configuration.
    pub fn new<R, W>(reader: R, writer: W) -> Result<Self, Error>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        TransportBuilder::new().spawn(reader, writer)
    }

    pub fn builder() -> TransportBuilder {
        TransportBuilder::new()
    }

    pub fn state(&self) -> TransportState {
        self.shared.state()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == TransportState::Closed
    }

    /// Whether both handles drive the same connection.
    pub fn same_connection(&self, other: &Transport) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Requests written and still waiting for a reply.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().pending.len()
    }

    /// The fault that closed the transport, if any.
    pub fn fault(&self) -> Option<Error> {
        self.shared.queue.lock().fault.clone()
    }

    /// Queue `request` for writing. The returned operation resolves to the
    /// reply; it is canceled after the configured default timeout, if any.
    pub async fn send<R>(&self, request: &R) -> Result<Operation<Frame, Error>, Error>
    where
        R: WriteRequest + ?Sized,
    {
        let (op, remote) = self.shared.operation(self.shared.config.default_timeout);
        self.submit(request, op, remote).await
    }

    /// Like [`send`](Self::send), canceled when `token` fires.
    pub async fn send_with<R>(
        &self,
        request: &R,
        token: Option<CancelToken>,
    ) -> Result<Operation<Frame, Error>, Error>
    where
        R: WriteRequest + ?Sized,
    {
        let (op, remote) = self.shared.ops.create(token);
        self.submit(request, op, remote).await
    }

    /// Like [`send`](Self::send), canceled if no reply arrives within
    /// `timeout`. A late reply is read and discarded.
    pub async fn send_timeout<R>(
        &self,
        request: &R,
        timeout: Duration,
    ) -> Result<Operation<Frame, Error>, Error>
    where
        R: WriteRequest + ?Sized,
    {
        let (op, remote) = self.shared.operation(Some(timeout));
        self.submit(request, op, remote).await
    }

    /// Send and wait for the reply frame.
    pub async fn call<R>(&self, request: &R) -> Result<Frame, Error>
    where
        R: WriteRequest + ?Sized,
    {
        Ok(self.send(request).await?.await?)
    }

    /// Send and wait for the reply as a value; a server error reply becomes
    /// [`Error::Server`].
    pub async fn call_value<R>(&self, request: &R) -> Result<Value, Error>
    where
        R: WriteRequest + ?Sized,
    {
        self.call(request).await?.into_value()
    }

    /// Start a batch: requests accumulate locally and go to the writer as a
    /// single frame.
    pub fn batch(&self) -> Batch<'_> {
        Batch {
            transport: self,
            buf: BytesMut::new(),
            requests: Vec::new(),
            ops: Vec::new(),
        }
    }

    async fn submit<R>(
        &self,
        request: &R,
        op: Operation<Frame, Error>,
        remote: Remote<Frame, Error>,
    ) -> Result<Operation<Frame, Error>, Error>
    where
        R: WriteRequest + ?Sized,
    {
        let mut buf = BytesMut::new();
        request.write_to(&mut buf);
        let inflight = self.shared.inflight(remote, request);
        self.enqueue(Outbound {
            bytes: buf.freeze(),
            requests: Requests::One(inflight),
        })
        .await?;
        op.mark_sent();
        Ok(op)
    }

    /// Hand `outbound` to the writer task. Its operations count as sent only
    /// once this returns `Ok`.
    async fn enqueue(&self, outbound: Outbound) -> Result<(), Error> {
        let shared = &*self.shared;
        shared.queued.fetch_add(1, Ordering::AcqRel);
        let mut guard = QueuedGuard {
            shared,
            armed: true,
        };
        if shared.state() != TransportState::Running {
            return Err(Error::Closed);
        }
        if self.tx.send(outbound).await.is_err() {
            return Err(Error::Closed);
        }
        // The writer task now owns the count.
        guard.armed = false;
        Ok(())
    }

    /// Stop accepting requests, wait for every in-flight reply, then close.
    ///
    /// Returns the fault if the connection failed before draining finished.
    pub async fn close(&self) -> Result<(), Error> {
        let shared = &*self.shared;
        if shared.drain() {
            debug!(pending = self.pending(), "transport draining");
        }
        loop {
            let closed = shared.closed.notified();
            if shared.state() == TransportState::Closed {
                break;
            }
            closed.await;
        }
        match self.fault() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Close immediately, failing everything in flight with
    /// [`Error::Closed`].
    pub fn abort(&self) {
        self.shared.fail(Error::Closed);
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish()
    }
}

// ── Batch ───────────────────────────────────────────────────────────────

/// Requests serialized into one buffer and handed to the writer together.
pub struct Batch<'t> {
    transport: &'t Transport,
    buf: BytesMut,
    requests: Vec<InFlight>,
    ops: Vec<Operation<Frame, Error>>,
}

impl Batch<'_> {
    /// Add a request, with the transport's default timeout.
    pub fn push<R>(&mut self, request: &R) -> &mut Self
    where
        R: WriteRequest + ?Sized,
    {
        let shared = &self.transport.shared;
        let (op, remote) = shared.operation(shared.config.default_timeout);
        self.add(request, op, remote)
    }

    /// Add a request canceled by `token`.
    pub fn push_with<R>(&mut self, request: &R, token: Option<CancelToken>) -> &mut Self
    where
        R: WriteRequest + ?Sized,
    {
        let (op, remote) = self.transport.shared.ops.create(token);
        self.add(request, op, remote)
    }

    fn add<R>(
        &mut self,
        request: &R,
        op: Operation<Frame, Error>,
        remote: Remote<Frame, Error>,
    ) -> &mut Self
    where
        R: WriteRequest + ?Sized,
    {
        request.write_to(&mut self.buf);
        self.requests.push(self.transport.shared.inflight(remote, request));
        self.ops.push(op);
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Hand the batch to the writer. Operations are returned in push order.
    pub async fn send(self) -> Result<Vec<Operation<Frame, Error>>, Error> {
        if self.ops.is_empty() {
            return Ok(Vec::new());
        }
        self.transport
            .enqueue(Outbound {
                bytes: self.buf.freeze(),
                requests: Requests::Many(self.requests),
            })
            .await?;
        for op in &self.ops {
            op.mark_sent();
        }
        Ok(self.ops)
    }
}
