//! In-process medium: named slot rings backed by process memory.
//!
//! Gives two channel ends living in the same process the full shared-memory
//! semantics — named rings, master election, shutdown propagation — without
//! an actual memory-mapped file. A real cross-process medium implements the
//! same [`SlotRing`]/[`Medium`] traits outside this crate.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

use super::{Medium, ReadVisitor, SlotRing, WriteVisitor};
use crate::error::{Result, RinglinkError};

/// A bounded in-memory ring of fixed-size slots.
pub struct MemoryRing {
    slot_size: usize,
    slot_count: usize,
    slots: Mutex<VecDeque<Vec<u8>>>,
    readable: Notify,
    writable: Notify,
    shutting_down: AtomicBool,
}

impl MemoryRing {
    /// Create a ring with `slot_count` slots of `slot_size` bytes each.
    pub fn new(slot_size: usize, slot_count: usize) -> Self {
        Self {
            slot_size,
            slot_count,
            slots: Mutex::new(VecDeque::with_capacity(slot_count)),
            readable: Notify::new(),
            writable: Notify::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shutting_down.load(Ordering::Acquire) {
            Err(RinglinkError::ChannelClosed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SlotRing for MemoryRing {
    fn slot_size(&self) -> usize {
        self.slot_size
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }

    async fn write(&self, timeout: Duration, fill: WriteVisitor<'_>) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            self.ensure_open()?;
            // Register interest before re-checking occupancy, so a reader's
            // notify between the check and the await is not lost.
            let freed = self.writable.notified();
            {
                let mut slots = self.slots.lock().expect("ring lock poisoned");
                if slots.len() < self.slot_count {
                    let mut slot = vec![0u8; self.slot_size];
                    let used = fill(&mut slot);
                    debug_assert!(used <= self.slot_size);
                    slots.push_back(slot);
                    drop(slots);
                    self.readable.notify_one();
                    return Ok(true);
                }
            }
            if timeout_at(deadline, freed).await.is_err() {
                return Ok(false);
            }
        }
    }

    async fn read(&self, timeout: Duration, visit: ReadVisitor<'_>) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            self.ensure_open()?;
            let filled = self.readable.notified();
            {
                let mut slots = self.slots.lock().expect("ring lock poisoned");
                if let Some(slot) = slots.pop_front() {
                    drop(slots);
                    let consumed = visit(&slot);
                    debug_assert!(consumed <= self.slot_size);
                    self.writable.notify_one();
                    return Ok(true);
                }
            }
            if timeout_at(deadline, filled).await.is_err() {
                return Ok(false);
            }
        }
    }
}

/// Process-global registry of named rings and election mutexes.
#[derive(Default)]
pub struct MemoryMedium {
    rings: Mutex<HashMap<String, Arc<MemoryRing>>>,
    claimed: Mutex<HashSet<String>>,
}

impl MemoryMedium {
    /// Create an isolated medium (its names are invisible to other media).
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared process-wide medium. Channel ends that should find each
    /// other must use the same medium instance; this is the default one.
    pub fn shared() -> Arc<MemoryMedium> {
        static SHARED: OnceLock<Arc<MemoryMedium>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(MemoryMedium::new())).clone()
    }
}

#[async_trait]
impl Medium for MemoryMedium {
    async fn claim_master(&self, mutex_name: &str, _timeout: Duration) -> Result<bool> {
        // In-process arbitration is immediate: the first claimant of a name
        // observes it as newly created and wins.
        let mut claimed = self.claimed.lock().expect("mutex registry poisoned");
        Ok(claimed.insert(mutex_name.to_string()))
    }

    fn release_master(&self, mutex_name: &str) {
        let mut claimed = self.claimed.lock().expect("mutex registry poisoned");
        claimed.remove(mutex_name);
    }

    fn create_ring(
        &self,
        ring_name: &str,
        slot_size: usize,
        slot_count: usize,
    ) -> Result<Arc<dyn SlotRing>> {
        let ring = Arc::new(MemoryRing::new(slot_size, slot_count));
        let mut rings = self.rings.lock().expect("ring registry poisoned");
        if let Some(stale) = rings.insert(ring_name.to_string(), ring.clone()) {
            stale.shutdown();
        }
        Ok(ring)
    }

    fn open_ring(&self, ring_name: &str) -> Result<Arc<dyn SlotRing>> {
        let rings = self.rings.lock().expect("ring registry poisoned");
        rings
            .get(ring_name)
            .cloned()
            .map(|r| r as Arc<dyn SlotRing>)
            .ok_or_else(|| RinglinkError::RingMissing(ring_name.to_string()))
    }
}
