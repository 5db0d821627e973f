//! Transport seam: named slot rings and master election.
//!
//! The channel core is written against two traits:
//!
//! - [`SlotRing`] — a bounded ring of fixed-size slots with visitor-style
//!   `read`/`write` under bounded timeouts and a shutdown flag. A real
//!   shared-memory ring lives outside this crate; [`memory`] provides an
//!   in-process implementation with the same semantics.
//! - [`Medium`] — creates/opens named rings and arbitrates the master
//!   election mutex.
//!
//! Both ends of a channel must use the same medium and agree on the channel
//! name; there is no discovery.

pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use memory::{MemoryMedium, MemoryRing};

/// Visitor that fills a free write slot and returns the bytes written.
pub type WriteVisitor<'a> = &'a mut (dyn FnMut(&mut [u8]) -> usize + Send);

/// Visitor that consumes an occupied slot and returns the bytes consumed.
pub type ReadVisitor<'a> = &'a mut (dyn FnMut(&[u8]) -> usize + Send);

/// A bounded ring of fixed-size slots shared with exactly one peer.
#[async_trait]
pub trait SlotRing: Send + Sync {
    /// Fixed byte size of every slot.
    fn slot_size(&self) -> usize;

    /// True once [`SlotRing::shutdown`] has been called on either end.
    fn is_shutting_down(&self) -> bool;

    /// Mark the ring as shutting down and wake all blocked readers/writers.
    fn shutdown(&self);

    /// Wait up to `timeout` for a free slot, then let `fill` populate it.
    ///
    /// Returns `Ok(true)` when a slot was written, `Ok(false)` on timeout,
    /// and `Err(ChannelClosed)` once the ring is shutting down.
    async fn write(&self, timeout: Duration, fill: WriteVisitor<'_>) -> Result<bool>;

    /// Wait up to `timeout` for an occupied slot, then let `visit` consume it.
    ///
    /// The visitor returns how many bytes it consumed, which the ring uses to
    /// advance its read cursor. Returns `Ok(true)` when a slot was visited,
    /// `Ok(false)` on timeout, and `Err(ChannelClosed)` once the ring is
    /// shutting down.
    async fn read(&self, timeout: Duration, visit: ReadVisitor<'_>) -> Result<bool>;
}

/// Factory for named rings plus the cross-peer master election mutex.
#[async_trait]
pub trait Medium: Send + Sync {
    /// Attempt to claim the named master mutex.
    ///
    /// The peer that observes the mutex as newly created and acquires it
    /// within `timeout` becomes the master. Returns `true` for the master.
    async fn claim_master(&self, mutex_name: &str, timeout: Duration) -> Result<bool>;

    /// Release a previously claimed master mutex.
    fn release_master(&self, mutex_name: &str);

    /// Create a named ring with the given slot geometry, replacing any stale
    /// ring of the same name.
    fn create_ring(
        &self,
        ring_name: &str,
        slot_size: usize,
        slot_count: usize,
    ) -> Result<Arc<dyn SlotRing>>;

    /// Open an existing named ring, inheriting its geometry.
    fn open_ring(&self, ring_name: &str) -> Result<Arc<dyn SlotRing>>;
}

/// Name of the ring the master reads from (and the slave writes to).
pub fn master_ring_name(channel: &str) -> String {
    format!("{channel}_Master_SharedMemory_MMF")
}

/// Name of the ring the slave reads from (and the master writes to).
pub fn slave_ring_name(channel: &str) -> String {
    format!("{channel}_Slave_SharedMemory_MMF")
}

/// Name of the election mutex for a channel.
pub fn master_mutex_name(channel: &str) -> String {
    format!("{channel}SharedMemory_MasterMutex")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_and_mutex_naming() {
        assert_eq!(master_ring_name("demo"), "demo_Master_SharedMemory_MMF");
        assert_eq!(slave_ring_name("demo"), "demo_Slave_SharedMemory_MMF");
        assert_eq!(master_mutex_name("demo"), "demoSharedMemory_MasterMutex");
    }
}
