//! Correlation tables: outbound requests awaiting a reply and inbound
//! messages under reassembly.
//!
//! Both tables are keyed by `msg_id` and shared between senders, the read
//! loop, and timeout timers, so they live in concurrent maps. Each pending
//! entry owns a single-shot wait-slot; whoever removes the entry decides how
//! the slot completes.

use std::time::Instant;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::channel::Response;
use crate::protocol::{fragment_offset, PacketHeader};

/// Accumulator for one message arriving packet by packet.
///
/// The buffer is allocated lazily on the first packet carrying payload and
/// filled at `msg_buffer_len`-strided offsets.
#[derive(Default)]
pub(crate) struct Assembly {
    buf: Option<Vec<u8>>,
}

impl Assembly {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Copy this packet's fragment into place.
    ///
    /// `chunk` must already be sized by the fragmentation plan. Returns true
    /// when this was the terminal packet.
    pub(crate) fn accept(
        &mut self,
        header: &PacketHeader,
        chunk: &[u8],
        msg_buffer_len: usize,
    ) -> bool {
        if header.payload_size > 0 {
            let buf = self
                .buf
                .get_or_insert_with(|| vec![0u8; header.payload_size as usize]);
            let offset = fragment_offset(header, msg_buffer_len);
            buf[offset..offset + chunk.len()].copy_from_slice(chunk);
        }
        header.is_terminal()
    }

    /// The reassembled payload; `None` for zero-length messages.
    pub(crate) fn into_data(self) -> Option<Bytes> {
        self.buf.map(Bytes::from)
    }
}

/// One in-flight outbound request.
pub(crate) struct PendingEntry {
    /// When the request was registered; drives diagnostics only.
    #[allow(dead_code)]
    pub(crate) created_at: Instant,
    pub(crate) assembly: Assembly,
    tx: oneshot::Sender<Response>,
}

impl PendingEntry {
    /// Complete the wait-slot. A receiver that already gave up is fine.
    pub(crate) fn complete(self, response: Response) {
        let _ = self.tx.send(response);
    }
}

/// Outcome of feeding one reply packet into the pending table.
pub(crate) enum ReplyFragment {
    /// No pending request with this `response_id`; the packet is discarded.
    Unknown,
    /// Fragment stored, more packets expected.
    Partial,
    /// Terminal packet arrived; the entry has been removed.
    Complete(PendingEntry),
}

/// Outbound requests awaiting their reply.
#[derive(Default)]
pub(crate) struct PendingRequests {
    map: DashMap<u64, PendingEntry>,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a request before its first packet is written.
    pub(crate) fn register(&self, msg_id: u64) -> oneshot::Receiver<Response> {
        let (tx, rx) = oneshot::channel();
        self.map.insert(
            msg_id,
            PendingEntry {
                created_at: Instant::now(),
                assembly: Assembly::new(),
                tx,
            },
        );
        rx
    }

    /// True while `msg_id` still awaits its reply.
    #[cfg(test)]
    pub(crate) fn contains(&self, msg_id: u64) -> bool {
        self.map.contains_key(&msg_id)
    }

    /// Feed one `RESPONSE`/`ERROR` packet into the matching entry.
    pub(crate) fn accept_fragment(
        &self,
        header: &PacketHeader,
        chunk: &[u8],
        msg_buffer_len: usize,
    ) -> ReplyFragment {
        let done = match self.map.get_mut(&header.response_id) {
            None => return ReplyFragment::Unknown,
            Some(mut entry) => entry.assembly.accept(header, chunk, msg_buffer_len),
        };
        if !done {
            return ReplyFragment::Partial;
        }
        match self.map.remove(&header.response_id) {
            Some((_, entry)) => ReplyFragment::Complete(entry),
            // A timeout or dispose won the removal race between packets.
            None => ReplyFragment::Unknown,
        }
    }

    /// Remove `msg_id`, handing its entry to the caller.
    ///
    /// `None` when the entry was already gone (the reply raced us).
    pub(crate) fn take(&self, msg_id: u64) -> Option<PendingEntry> {
        self.map.remove(&msg_id).map(|(_, entry)| entry)
    }

    /// Remove `msg_id` and complete its wait-slot with `response`.
    ///
    /// Returns false when the entry was already gone (the reply raced us).
    pub(crate) fn abandon(&self, msg_id: u64, response: Response) -> bool {
        match self.take(msg_id) {
            Some(entry) => {
                entry.complete(response);
                true
            }
            None => false,
        }
    }

    /// Drain every entry, completing each wait-slot with a failure.
    pub(crate) fn fail_all(&self) {
        let ids: Vec<u64> = self.map.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, entry)) = self.map.remove(&id) {
                entry.complete(Response::failure());
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }
}

/// Inbound requests under reassembly.
#[derive(Default)]
pub(crate) struct IncomingRequests {
    map: DashMap<u64, Assembly>,
}

impl IncomingRequests {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feed one `REQUEST` packet, creating the entry on first sight.
    ///
    /// Returns the reassembled payload once the terminal packet lands.
    pub(crate) fn accept_fragment(
        &self,
        header: &PacketHeader,
        chunk: &[u8],
        msg_buffer_len: usize,
    ) -> Option<Option<Bytes>> {
        let done = self
            .map
            .entry(header.msg_id)
            .or_default()
            .accept(header, chunk, msg_buffer_len);
        if done {
            self.map
                .remove(&header.msg_id)
                .map(|(_, assembly)| assembly.into_data())
        } else {
            None
        }
    }

    /// Drop all partial messages (shutdown path).
    pub(crate) fn clear(&self) {
        self.map.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MsgType;

    const MBL: usize = 448;

    fn request_header(msg_id: u64, payload_size: i32, current: u16, total: u16) -> PacketHeader {
        PacketHeader::new(MsgType::Request, msg_id, payload_size, current, total, 0)
    }

    fn reply_header(response_id: u64, payload_size: i32, current: u16, total: u16) -> PacketHeader {
        PacketHeader::new(MsgType::Response, 99, payload_size, current, total, response_id)
    }

    #[test]
    fn assembly_reassembles_strided_fragments() {
        let mut assembly = Assembly::new();
        let payload: Vec<u8> = (0..1024u32).map(|i| i as u8).collect();

        assert!(!assembly.accept(&request_header(1, 1024, 1, 3), &payload[..448], MBL));
        assert!(!assembly.accept(&request_header(1, 1024, 2, 3), &payload[448..896], MBL));
        assert!(assembly.accept(&request_header(1, 1024, 3, 3), &payload[896..], MBL));

        assert_eq!(assembly.into_data().unwrap(), Bytes::from(payload));
    }

    #[test]
    fn assembly_empty_message_has_no_data() {
        let mut assembly = Assembly::new();
        assert!(assembly.accept(&request_header(1, 0, 1, 1), &[], MBL));
        assert!(assembly.into_data().is_none());
    }

    #[tokio::test]
    async fn pending_complete_resolves_waiter() {
        let pending = PendingRequests::new();
        let rx = pending.register(5);
        assert!(pending.contains(5));

        match pending.accept_fragment(&reply_header(5, 3, 1, 1), b"abc", MBL) {
            ReplyFragment::Complete(mut entry) => {
                let data = std::mem::take(&mut entry.assembly).into_data();
                entry.complete(Response {
                    success: true,
                    data,
                });
            }
            _ => panic!("expected completion"),
        }
        assert!(!pending.contains(5));

        let response = rx.await.unwrap();
        assert!(response.success);
        assert_eq!(response.data.unwrap(), Bytes::from_static(b"abc"));
    }

    #[test]
    fn unknown_reply_is_reported() {
        let pending = PendingRequests::new();
        assert!(matches!(
            pending.accept_fragment(&reply_header(77, 0, 1, 1), &[], MBL),
            ReplyFragment::Unknown
        ));
    }

    #[tokio::test]
    async fn abandon_completes_with_failure() {
        let pending = PendingRequests::new();
        let rx = pending.register(9);
        assert!(pending.abandon(9, Response::failure()));
        assert!(!pending.abandon(9, Response::failure()));

        let response = rx.await.unwrap();
        assert!(!response.success);
        assert!(response.data.is_none());
    }

    #[tokio::test]
    async fn fail_all_drains_every_waiter() {
        let pending = PendingRequests::new();
        let rx1 = pending.register(1);
        let rx2 = pending.register(2);
        pending.fail_all();
        assert_eq!(pending.len(), 0);
        assert!(!rx1.await.unwrap().success);
        assert!(!rx2.await.unwrap().success);
    }

    #[test]
    fn incoming_tracks_partials_until_terminal() {
        let incoming = IncomingRequests::new();
        let payload = vec![7u8; 600];

        assert!(incoming
            .accept_fragment(&request_header(3, 600, 1, 2), &payload[..448], MBL)
            .is_none());
        assert_eq!(incoming.len(), 1);

        let data = incoming
            .accept_fragment(&request_header(3, 600, 2, 2), &payload[448..], MBL)
            .expect("terminal packet completes");
        assert_eq!(incoming.len(), 0);
        assert_eq!(data.unwrap(), Bytes::from(payload));
    }

    #[test]
    fn incoming_single_packet_completes_immediately() {
        let incoming = IncomingRequests::new();
        let data = incoming
            .accept_fragment(&request_header(4, 2, 1, 1), b"ok", MBL)
            .expect("single packet completes");
        assert_eq!(data.unwrap(), Bytes::from_static(b"ok"));
    }
}
