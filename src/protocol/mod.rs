//! Protocol layer: packet header wire format and fragmentation plan.

pub mod fragment;
pub mod wire_format;

pub use fragment::{fragment_offset, packet_count, packet_payload_len};
pub use wire_format::{
    validate_slot_size, MsgType, PacketHeader, ProtocolVersion, HEADER_SIZE, MAX_SLOT_SIZE,
    MIN_SLOT_SIZE,
};
