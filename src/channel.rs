//! Channel builder and runtime lifecycle.
//!
//! The [`ChannelBuilder`] provides a fluent API for configuring the handler
//! and ring geometry. [`ChannelBuilder::open`] runs the lifecycle:
//! 1. Elect master or slave via the named election mutex
//! 2. Create (master) or open (slave) the paired rings
//! 3. Spawn the read loop
//!
//! Teardown is multi-phase: `dispose` defers to whichever party — read loop
//! or last in-flight dispatch — goes idle last, and that party finalizes.
//!
//! # Example
//!
//! ```ignore
//! use ringlink::RingChannel;
//!
//! #[tokio::main]
//! async fn main() -> ringlink::Result<()> {
//!     let channel = RingChannel::builder("pair")
//!         .on_request(|_id, data| Ok(data))
//!         .open()
//!         .await?;
//!
//!     let reply = channel.request(Some(b"ping".as_ref().into())).await?;
//!     assert!(reply.success);
//!     channel.dispose();
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::correlation::{IncomingRequests, PendingRequests};
use crate::error::{Result, RinglinkError};
use crate::handler::{
    Handler, HandlerError, MessageFn, MessageFutureFn, RequestFn, RequestFutureFn,
};
use crate::protocol::{validate_slot_size, MsgType, ProtocolVersion, HEADER_SIZE};
use crate::reader::read_loop;
use crate::stats::{ChannelStats, StatsSnapshot};
use crate::transport::{
    master_mutex_name, master_ring_name, slave_ring_name, Medium, MemoryMedium, SlotRing,
};
use crate::writer::FrameWriter;

/// How long a peer waits to acquire the election mutex before conceding.
const ELECTION_TIMEOUT: Duration = Duration::from_millis(500);

/// Default wait for a request's response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default slot size when the builder does not override it.
pub const DEFAULT_BUFFER_CAPACITY: usize = 4096;

/// Default slot count per ring when the builder does not override it.
pub const DEFAULT_NODE_COUNT: usize = 32;

/// How long a slave keeps retrying to open the master's rings.
const OPEN_RETRY_WINDOW: Duration = Duration::from_secs(5);
const OPEN_RETRY_INTERVAL: Duration = Duration::from_millis(25);

const DISPOSED_ALIVE: u8 = 0;
const DISPOSED_IN_PROGRESS: u8 = 1;
const DISPOSED_FINISHED: u8 = 2;

/// Which end of the channel this peer became during election.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Won the election; sized and created both rings.
    Master,
    /// Opened the master's rings and inherited their sizing.
    Slave,
}

/// Outcome of a request: remote success plus the response payload, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// True when the remote handler completed normally.
    pub success: bool,
    /// Response payload; `None` for empty payloads and always `None` on
    /// failure.
    pub data: Option<Bytes>,
}

impl Response {
    pub(crate) fn failure() -> Self {
        Self {
            success: false,
            data: None,
        }
    }
}

/// Wait-slot handle for a request sent with [`RingChannel::begin_request`].
///
/// Resolves to the response, or to a failure [`Response`] once the request
/// times out, the send fails, or the channel is torn down.
pub struct PendingResponse {
    rx: oneshot::Receiver<Response>,
}

impl Future for PendingResponse {
    type Output = Response;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| Response::failure()))
    }
}

/// Builder for configuring and opening a channel end.
pub struct ChannelBuilder {
    name: String,
    buffer_capacity: usize,
    node_count: usize,
    protocol_version: ProtocolVersion,
    medium: Arc<dyn Medium>,
    handler: Option<Arc<dyn Handler>>,
}

impl ChannelBuilder {
    /// Create a builder for the named channel.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            node_count: DEFAULT_NODE_COUNT,
            protocol_version: ProtocolVersion::V1,
            medium: MemoryMedium::shared(),
            handler: None,
        }
    }

    /// Full slot size in bytes, header included. Master-only: the slave
    /// inherits whatever the master created. Admissible range is
    /// 256..=1,048,576.
    pub fn buffer_capacity(mut self, bytes: usize) -> Self {
        self.buffer_capacity = bytes;
        self
    }

    /// Number of slots per ring. Master-only, like `buffer_capacity`.
    pub fn node_count(mut self, slots: usize) -> Self {
        self.node_count = slots;
        self
    }

    /// Wire protocol revision. Only [`ProtocolVersion::V1`] exists.
    pub fn protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = version;
        self
    }

    /// Medium carrying the rings and the election mutex. Defaults to the
    /// process-wide in-memory medium.
    pub fn medium(mut self, medium: Arc<dyn Medium>) -> Self {
        self.medium = medium;
        self
    }

    /// Register a synchronous handler with no response payload.
    ///
    /// The four handler shapes are mutually exclusive; registering one
    /// replaces any previously registered handler.
    pub fn on_message<F>(mut self, handler: F) -> Self
    where
        F: Fn(u64, Bytes) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(MessageFn(handler)));
        self
    }

    /// Register an asynchronous handler with no response payload.
    pub fn on_message_async<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(u64, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), HandlerError>> + Send + 'static,
    {
        self.handler = Some(Arc::new(MessageFutureFn(handler)));
        self
    }

    /// Register a synchronous handler returning response bytes.
    pub fn on_request<F>(mut self, handler: F) -> Self
    where
        F: Fn(u64, Bytes) -> std::result::Result<Bytes, HandlerError> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(RequestFn(handler)));
        self
    }

    /// Register an asynchronous handler resolving to response bytes.
    pub fn on_request_async<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(u64, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Bytes, HandlerError>> + Send + 'static,
    {
        self.handler = Some(Arc::new(RequestFutureFn(handler)));
        self
    }

    /// Elect a role, bind both rings, and spawn the read loop.
    pub async fn open(self) -> Result<RingChannel> {
        let mutex_name = master_mutex_name(&self.name);
        let is_master = self.medium.claim_master(&mutex_name, ELECTION_TIMEOUT).await?;
        let role = if is_master { Role::Master } else { Role::Slave };

        let (inbound, outbound) = match role {
            Role::Master => {
                // Ring geometry is master-only; a slave's setting is inert
                // and must not fail its construction.
                let rings = validate_slot_size(self.buffer_capacity).and_then(|()| {
                    let inbound = self.medium.create_ring(
                        &master_ring_name(&self.name),
                        self.buffer_capacity,
                        self.node_count,
                    )?;
                    let outbound = self.medium.create_ring(
                        &slave_ring_name(&self.name),
                        self.buffer_capacity,
                        self.node_count,
                    )?;
                    Ok((inbound, outbound))
                });
                match rings {
                    Ok(pair) => pair,
                    Err(error) => {
                        self.medium.release_master(&mutex_name);
                        return Err(error);
                    }
                }
            }
            Role::Slave => {
                let inbound = open_existing(&*self.medium, &slave_ring_name(&self.name)).await?;
                let outbound = open_existing(&*self.medium, &master_ring_name(&self.name)).await?;
                (inbound, outbound)
            }
        };
        tracing::debug!(channel = %self.name, ?role, "channel role elected");

        let stats = Arc::new(ChannelStats::new());
        let disposed = Arc::new(AtomicU8::new(DISPOSED_ALIVE));
        let writer = FrameWriter::new(outbound.clone(), stats.clone(), disposed.clone());

        let core = Arc::new(ChannelCore {
            name: self.name,
            role,
            protocol_version: self.protocol_version,
            medium: self.medium,
            inbound,
            outbound,
            writer,
            pending: PendingRequests::new(),
            incoming: IncomingRequests::new(),
            handler: RwLock::new(self.handler),
            stats,
            next_msg_id: AtomicU64::new(0),
            disposed,
            managed_dispose: AtomicBool::new(false),
            process_count: Mutex::new(0),
            reading: Mutex::new(false),
        });

        tokio::spawn(read_loop(core.clone()));

        Ok(RingChannel { core })
    }
}

/// One end of a bidirectional request/response channel.
///
/// Cheap to share behind its internal `Arc`; senders may call from any task.
/// Dropping the handle requests disposal.
pub struct RingChannel {
    core: Arc<ChannelCore>,
}

impl RingChannel {
    /// Create a builder for the named channel.
    pub fn builder(name: impl Into<String>) -> ChannelBuilder {
        ChannelBuilder::new(name)
    }

    /// Channel name shared by both peers.
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Role this peer won during election.
    pub fn role(&self) -> Role {
        self.core.role
    }

    /// Wire protocol revision both peers speak.
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.core.protocol_version
    }

    /// Usable payload bytes per packet on this channel.
    pub fn message_buffer_len(&self) -> usize {
        self.core.msg_buffer_len()
    }

    /// Send a request and await its response with the default 30 s timeout.
    pub async fn request(&self, payload: Option<Bytes>) -> Result<Response> {
        self.request_with_timeout(payload, Some(DEFAULT_REQUEST_TIMEOUT))
            .await
    }

    /// Send a request and await its response.
    ///
    /// `timeout` of `None` waits forever; `Duration::ZERO` means "already
    /// timed out" and resolves immediately as a failure without sending.
    /// Timeouts and send failures surface as `Response { success: false }`,
    /// never as `Err`.
    pub async fn request_with_timeout(
        &self,
        payload: Option<Bytes>,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        Ok(self.begin_request(payload, timeout).await?.await)
    }

    /// Send a request, returning a wait-slot future to await separately.
    ///
    /// The packets are on the wire (or the failure is already decided) by the
    /// time this returns; the timeout timer, when any, is armed here.
    pub async fn begin_request(
        &self,
        payload: Option<Bytes>,
        timeout: Option<Duration>,
    ) -> Result<PendingResponse> {
        self.core.ensure_alive()?;

        if timeout == Some(Duration::ZERO) {
            self.core.stats.record_timeout();
            let (tx, rx) = oneshot::channel();
            let _ = tx.send(Response::failure());
            return Ok(PendingResponse { rx });
        }

        let msg_id = self.core.allocate_msg_id();
        let rx = self.core.pending.register(msg_id);

        let sent = self
            .core
            .writer
            .write_framed(MsgType::Request, msg_id, payload.as_deref(), 0)
            .await;
        if !sent {
            self.core.pending.abandon(msg_id, Response::failure());
            return Ok(PendingResponse { rx });
        }

        if let Some(limit) = timeout {
            let core = self.core.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                // Count the timeout before completing the wait-slot, so the
                // resumed caller observes it.
                if let Some(entry) = core.pending.take(msg_id) {
                    core.stats.record_timeout();
                    entry.complete(Response::failure());
                }
            });
        }

        Ok(PendingResponse { rx })
    }

    /// Request teardown.
    ///
    /// If the read loop is inside its visitor or dispatches are in flight,
    /// teardown is deferred to whichever of them goes idle last; otherwise it
    /// completes here. [`RingChannel::dispose_finished`] reports completion.
    pub fn dispose(&self) {
        self.core.dispose();
    }

    /// True once teardown has fully completed.
    pub fn dispose_finished(&self) -> bool {
        self.core.dispose_finished()
    }

    /// Point-in-time copy of the channel counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.core.stats.snapshot()
    }
}

impl Drop for RingChannel {
    fn drop(&mut self) {
        self.core.dispose();
    }
}

/// State shared by the public handle, the read loop, and dispatch tasks.
pub(crate) struct ChannelCore {
    name: String,
    role: Role,
    protocol_version: ProtocolVersion,
    medium: Arc<dyn Medium>,
    inbound: Arc<dyn SlotRing>,
    outbound: Arc<dyn SlotRing>,
    writer: FrameWriter,
    pub(crate) pending: PendingRequests,
    pub(crate) incoming: IncomingRequests,
    handler: RwLock<Option<Arc<dyn Handler>>>,
    pub(crate) stats: Arc<ChannelStats>,
    next_msg_id: AtomicU64,
    disposed: Arc<AtomicU8>,
    managed_dispose: AtomicBool,
    process_count: Mutex<usize>,
    reading: Mutex<bool>,
}

impl ChannelCore {
    pub(crate) fn inbound(&self) -> &Arc<dyn SlotRing> {
        &self.inbound
    }

    pub(crate) fn writer(&self) -> &FrameWriter {
        &self.writer
    }

    pub(crate) fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    pub(crate) fn incoming(&self) -> &IncomingRequests {
        &self.incoming
    }

    pub(crate) fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    pub(crate) fn msg_buffer_len(&self) -> usize {
        self.inbound.slot_size() - HEADER_SIZE
    }

    pub(crate) fn handler(&self) -> Option<Arc<dyn Handler>> {
        self.handler.read().expect("handler lock poisoned").clone()
    }

    /// Next strictly-increasing message id; ids start at 1.
    pub(crate) fn allocate_msg_id(&self) -> u64 {
        self.next_msg_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.disposed.load(Ordering::Acquire) == DISPOSED_ALIVE
    }

    pub(crate) fn ensure_alive(&self) -> Result<()> {
        if !self.is_alive() || self.managed_dispose.load(Ordering::Acquire) {
            return Err(RinglinkError::AlreadyDisposed);
        }
        if self.inbound.is_shutting_down() || self.outbound.is_shutting_down() {
            return Err(RinglinkError::ChannelClosed);
        }
        Ok(())
    }

    pub(crate) fn mark_reading(&self, on: bool) {
        *self.reading.lock().expect("reading lock poisoned") = on;
    }

    pub(crate) fn process_entered(&self) {
        *self.process_count.lock().expect("process lock poisoned") += 1;
    }

    pub(crate) fn process_exited(&self) {
        *self.process_count.lock().expect("process lock poisoned") -= 1;
    }

    pub(crate) fn managed_dispose_requested(&self) -> bool {
        self.managed_dispose.load(Ordering::Acquire)
    }

    pub(crate) fn dispose(&self) {
        if !self.is_alive() {
            return;
        }
        let reading = self.reading.lock().expect("reading lock poisoned");
        let processing = self.process_count.lock().expect("process lock poisoned");
        if *reading || *processing > 0 {
            self.managed_dispose.store(true, Ordering::Release);
            return;
        }
        drop(processing);
        drop(reading);
        self.finalize_dispose();
    }

    /// Finalize teardown if a deferred dispose is pending and the channel is
    /// now idle. Called by dispatch completion.
    pub(crate) fn maybe_managed_dispose(&self) {
        if !self.managed_dispose.load(Ordering::Acquire) {
            return;
        }
        let reading = self.reading.lock().expect("reading lock poisoned");
        let processing = self.process_count.lock().expect("process lock poisoned");
        if !*reading && *processing == 0 {
            drop(processing);
            drop(reading);
            self.finalize_dispose();
        }
    }

    /// Teardown proper. Idempotent: the first caller past the CAS wins.
    pub(crate) fn finalize_dispose(&self) {
        *self.handler.write().expect("handler lock poisoned") = None;
        if self
            .disposed
            .compare_exchange(
                DISPOSED_ALIVE,
                DISPOSED_IN_PROGRESS,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }
        tracing::debug!(channel = %self.name, "tearing down channel");
        self.inbound.shutdown();
        self.outbound.shutdown();
        if self.role == Role::Master {
            self.medium.release_master(&master_mutex_name(&self.name));
        }
        self.pending.fail_all();
        self.incoming.clear();
        self.disposed.store(DISPOSED_FINISHED, Ordering::Release);
    }

    pub(crate) fn dispose_finished(&self) -> bool {
        self.disposed.load(Ordering::Acquire) == DISPOSED_FINISHED
    }
}

async fn open_existing(medium: &dyn Medium, ring_name: &str) -> Result<Arc<dyn SlotRing>> {
    let deadline = Instant::now() + OPEN_RETRY_WINDOW;
    loop {
        match medium.open_ring(ring_name) {
            Ok(ring) => return Ok(ring),
            Err(RinglinkError::RingMissing(_)) if Instant::now() < deadline => {
                tokio::time::sleep(OPEN_RETRY_INTERVAL).await;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn capacity_below_range_is_rejected() {
        let result = ChannelBuilder::new("cap_low")
            .medium(Arc::new(MemoryMedium::new()))
            .buffer_capacity(255)
            .open()
            .await;
        assert!(matches!(
            result,
            Err(RinglinkError::ConfigOutOfRange { value: 255, .. })
        ));
    }

    #[tokio::test]
    async fn capacity_above_range_is_rejected() {
        let result = ChannelBuilder::new("cap_high")
            .medium(Arc::new(MemoryMedium::new()))
            .buffer_capacity(1_048_577)
            .open()
            .await;
        assert!(matches!(
            result,
            Err(RinglinkError::ConfigOutOfRange { .. })
        ));
    }

    #[tokio::test]
    async fn first_open_is_master_second_is_slave() {
        let medium: Arc<dyn Medium> = Arc::new(MemoryMedium::new());
        let first = ChannelBuilder::new("roles")
            .medium(medium.clone())
            .open()
            .await
            .unwrap();
        let second = ChannelBuilder::new("roles")
            .medium(medium)
            .open()
            .await
            .unwrap();
        assert_eq!(first.role(), Role::Master);
        assert_eq!(second.role(), Role::Slave);
    }

    #[tokio::test]
    async fn slave_inherits_master_slot_size() {
        let medium: Arc<dyn Medium> = Arc::new(MemoryMedium::new());
        let master = ChannelBuilder::new("inherit")
            .medium(medium.clone())
            .buffer_capacity(512)
            .open()
            .await
            .unwrap();
        let slave = ChannelBuilder::new("inherit")
            .medium(medium)
            .buffer_capacity(8192)
            .open()
            .await
            .unwrap();
        assert_eq!(master.message_buffer_len(), 512 - HEADER_SIZE);
        // The slave's own capacity setting is ignored.
        assert_eq!(slave.message_buffer_len(), 512 - HEADER_SIZE);
    }

    #[tokio::test]
    async fn slave_capacity_is_inert_even_when_out_of_range() {
        let medium: Arc<dyn Medium> = Arc::new(MemoryMedium::new());
        let master = ChannelBuilder::new("inert")
            .medium(medium.clone())
            .buffer_capacity(512)
            .open()
            .await
            .unwrap();
        let slave = ChannelBuilder::new("inert")
            .medium(medium)
            .buffer_capacity(255)
            .open()
            .await
            .unwrap();
        assert_eq!(slave.role(), Role::Slave);
        assert_eq!(slave.message_buffer_len(), master.message_buffer_len());
    }

    #[tokio::test]
    async fn failed_master_open_releases_the_election_mutex() {
        let medium: Arc<dyn Medium> = Arc::new(MemoryMedium::new());
        let result = ChannelBuilder::new("retry")
            .medium(medium.clone())
            .buffer_capacity(255)
            .open()
            .await;
        assert!(matches!(
            result,
            Err(RinglinkError::ConfigOutOfRange { .. })
        ));
        // The mutex is free again, so a corrected retry wins the election.
        let channel = ChannelBuilder::new("retry")
            .medium(medium)
            .buffer_capacity(512)
            .open()
            .await
            .unwrap();
        assert_eq!(channel.role(), Role::Master);
    }

    #[tokio::test]
    async fn slave_without_master_times_out_on_missing_ring() {
        let medium: Arc<dyn Medium> = Arc::new(MemoryMedium::new());
        // Claim the mutex so the builder is forced into the slave path.
        medium
            .claim_master("aloneSharedMemory_MasterMutex", Duration::from_millis(500))
            .await
            .unwrap();
        let started = std::time::Instant::now();
        let result = ChannelBuilder::new("alone").medium(medium).open().await;
        assert!(matches!(result, Err(RinglinkError::RingMissing(_))));
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn disposed_channel_rejects_requests() {
        let medium: Arc<dyn Medium> = Arc::new(MemoryMedium::new());
        let channel = ChannelBuilder::new("reject")
            .medium(medium)
            .open()
            .await
            .unwrap();
        channel.dispose();
        let result = channel.request(None).await;
        assert!(matches!(
            result,
            Err(RinglinkError::AlreadyDisposed) | Err(RinglinkError::ChannelClosed)
        ));
    }
}
