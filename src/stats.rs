//! Channel statistics: counters and extrema for packets, bytes, and timeouts.
//!
//! Every scalar is an independent atomic; the set is not linearizable as a
//! whole. [`ChannelStats::snapshot`] reads each field once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::protocol::MsgType;

/// Atomic counters shared by the writer, the read loop, and the dispatcher.
#[derive(Debug, Default)]
pub struct ChannelStats {
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    requests_sent: AtomicU64,
    requests_received: AtomicU64,
    responses_sent: AtomicU64,
    responses_received: AtomicU64,
    errors_sent: AtomicU64,
    errors_received: AtomicU64,
    timeouts: AtomicU64,
    discarded_responses: AtomicU64,
    last_discarded_response_id: AtomicU64,
    max_write_wait_micros: AtomicU64,
    min_packet_bytes: AtomicU64,
    max_packet_bytes: AtomicU64,
}

impl ChannelStats {
    /// Create a zeroed statistics block.
    pub fn new() -> Self {
        Self {
            min_packet_bytes: AtomicU64::new(u64::MAX),
            ..Self::default()
        }
    }

    /// Record one packet pushed into the outbound ring.
    pub fn record_packet_sent(&self, bytes: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.record_packet_extrema(bytes);
    }

    /// Record one packet drained from the inbound ring.
    pub fn record_packet_received(&self, bytes: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        self.record_packet_extrema(bytes);
    }

    fn record_packet_extrema(&self, bytes: usize) {
        let bytes = bytes as u64;
        self.min_packet_bytes.fetch_min(bytes, Ordering::Relaxed);
        self.max_packet_bytes.fetch_max(bytes, Ordering::Relaxed);
    }

    /// Record how long one ring write blocked.
    pub fn record_write_wait(&self, waited: Duration) {
        self.max_write_wait_micros
            .fetch_max(waited.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record a fully-written outbound message.
    pub fn record_message_sent(&self, msg_type: MsgType) {
        match msg_type {
            MsgType::Request => &self.requests_sent,
            MsgType::Response => &self.responses_sent,
            MsgType::Error => &self.errors_sent,
        }
        .fetch_add(1, Ordering::Relaxed);
    }

    /// Record a fully-reassembled inbound message.
    pub fn record_message_received(&self, msg_type: MsgType) {
        match msg_type {
            MsgType::Request => &self.requests_received,
            MsgType::Response => &self.responses_received,
            MsgType::Error => &self.errors_received,
        }
        .fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request wait-slot that timed out.
    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a response whose id is no longer pending.
    pub fn record_discarded_response(&self, response_id: u64) {
        self.discarded_responses.fetch_add(1, Ordering::Relaxed);
        self.last_discarded_response_id
            .store(response_id, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        let min_packet = self.min_packet_bytes.load(Ordering::Relaxed);
        StatsSnapshot {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            requests_received: self.requests_received.load(Ordering::Relaxed),
            responses_sent: self.responses_sent.load(Ordering::Relaxed),
            responses_received: self.responses_received.load(Ordering::Relaxed),
            errors_sent: self.errors_sent.load(Ordering::Relaxed),
            errors_received: self.errors_received.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            discarded_responses: self.discarded_responses.load(Ordering::Relaxed),
            last_discarded_response_id: self.last_discarded_response_id.load(Ordering::Relaxed),
            max_write_wait_micros: self.max_write_wait_micros.load(Ordering::Relaxed),
            min_packet_bytes: if min_packet == u64::MAX { 0 } else { min_packet },
            max_packet_bytes: self.max_packet_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of the channel counters at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub requests_sent: u64,
    pub requests_received: u64,
    pub responses_sent: u64,
    pub responses_received: u64,
    pub errors_sent: u64,
    pub errors_received: u64,
    pub timeouts: u64,
    pub discarded_responses: u64,
    pub last_discarded_response_id: u64,
    pub max_write_wait_micros: u64,
    /// Smallest packet seen in either direction; zero until any packet moves.
    pub min_packet_bytes: u64,
    pub max_packet_bytes: u64,
}
