//! Read loop: drains the inbound ring, reassembles messages, and routes them
//! to the pending-request table or the handler dispatcher.
//!
//! One spawned task owns this loop for the channel's lifetime. The per-slot
//! visitor raises the reading-in-progress flag so teardown defers while a
//! packet is being consumed; completed inbound requests are dispatched on a
//! fresh task so reassembly is never blocked by handler latency.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::channel::{ChannelCore, Response};
use crate::correlation::{PendingEntry, ReplyFragment};
use crate::handler::dispatch_request;
use crate::protocol::{packet_payload_len, MsgType, PacketHeader, HEADER_SIZE};

/// Per-iteration bound on how long the inbound ring read may block.
pub(crate) const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// A message whose terminal packet just landed.
enum Completed {
    /// A reply matched a pending outbound request.
    Reply { entry: PendingEntry, success: bool },
    /// A fresh inbound request, ready for dispatch.
    Request { msg_id: u64, data: Option<Bytes> },
}

/// Drive the inbound ring until teardown.
pub(crate) async fn read_loop(core: Arc<ChannelCore>) {
    loop {
        if core.managed_dispose_requested() {
            core.finalize_dispose();
            break;
        }
        if !core.is_alive() {
            break;
        }

        let mut completed = None;
        let core_ref = &core;
        let result = core
            .inbound()
            .read(READ_TIMEOUT, &mut |slot| {
                core_ref.mark_reading(true);
                let consumed = consume_packet(core_ref, slot, &mut completed);
                core_ref.mark_reading(false);
                consumed
            })
            .await;

        match result {
            Ok(true) => {
                if let Some(message) = completed {
                    handle_completed(&core, message);
                }
            }
            Ok(false) => {}
            Err(_) => {
                // The ring shut down under us: our own teardown, or the peer's.
                if core.managed_dispose_requested() {
                    core.finalize_dispose();
                }
                break;
            }
        }
    }
    tracing::debug!("read loop exited");
}

/// Consume one packet from a ring slot; returns the bytes consumed.
fn consume_packet(core: &ChannelCore, slot: &[u8], completed: &mut Option<Completed>) -> usize {
    let header = match PacketHeader::decode(slot) {
        Ok(header) => header,
        Err(error) => {
            tracing::warn!(%error, "dropping malformed packet");
            return HEADER_SIZE.min(slot.len());
        }
    };

    let msg_buffer_len = core.msg_buffer_len();
    let packet_len = packet_payload_len(&header, msg_buffer_len);
    if HEADER_SIZE + packet_len > slot.len() {
        tracing::warn!(
            msg_id = header.msg_id,
            packet_len,
            "dropping packet larger than its slot"
        );
        return HEADER_SIZE;
    }
    let chunk = &slot[HEADER_SIZE..HEADER_SIZE + packet_len];

    if header.msg_type.is_reply() {
        match core.pending().accept_fragment(&header, chunk, msg_buffer_len) {
            ReplyFragment::Unknown => {
                tracing::debug!(
                    response_id = header.response_id,
                    "discarding unmatched response"
                );
                core.stats().record_discarded_response(header.response_id);
                core.stats().record_packet_received(HEADER_SIZE);
                return HEADER_SIZE;
            }
            ReplyFragment::Partial => {}
            ReplyFragment::Complete(entry) => {
                core.stats().record_message_received(header.msg_type);
                *completed = Some(Completed::Reply {
                    entry,
                    success: header.msg_type == MsgType::Response,
                });
            }
        }
    } else if let Some(data) = core.incoming().accept_fragment(&header, chunk, msg_buffer_len) {
        core.stats().record_message_received(header.msg_type);
        *completed = Some(Completed::Request {
            msg_id: header.msg_id,
            data,
        });
    }

    core.stats().record_packet_received(HEADER_SIZE + packet_len);
    HEADER_SIZE + packet_len
}

fn handle_completed(core: &Arc<ChannelCore>, message: Completed) {
    match message {
        Completed::Reply { mut entry, success } => {
            let data = std::mem::take(&mut entry.assembly).into_data();
            entry.complete(Response { success, data });
        }
        Completed::Request { msg_id, data } => {
            tokio::spawn(dispatch_request(
                core.clone(),
                msg_id,
                data.unwrap_or_default(),
            ));
        }
    }
}
