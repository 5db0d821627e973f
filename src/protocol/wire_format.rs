//! Wire format encoding and decoding.
//!
//! Implements the fixed 64-byte V1 packet header:
//! ```text
//! ┌──────────┬─────────┬──────────────┬──────────────┬───────────────┬─────────────┬─────────┐
//! │ MsgType  │ MsgId   │ Payload size │ Curr. packet │ Total packets │ Response ID │ Padding │
//! │ 1 byte   │ 8 bytes │ 4 bytes      │ 2 bytes      │ 2 bytes       │ 8 bytes     │ 39 bytes│
//! │ enum u8  │ u64 NE  │ i32 NE       │ u16 NE       │ u16 NE        │ u64 NE      │ zeroed  │
//! └──────────┴─────────┴──────────────┴──────────────┴───────────────┴─────────────┴─────────┘
//! ```
//!
//! All multi-byte integers use native endianness; both peers run on the same
//! host, so the layout is identical on both sides of the channel.

use crate::error::{Result, RinglinkError};

/// Header size in bytes (fixed, exactly 64).
pub const HEADER_SIZE: usize = 64;

/// Smallest admissible ring slot size (header + some payload room).
pub const MIN_SLOT_SIZE: usize = 256;

/// Largest admissible ring slot size (1 MiB).
pub const MAX_SLOT_SIZE: usize = 1_048_576;

/// Wire protocol revision. V1 is the only revision defined so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    /// 64-byte header, native endianness.
    #[default]
    V1,
}

/// Message kind carried in the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    /// A request originated by the sending peer.
    Request = 1,
    /// A successful answer to an earlier request.
    Response = 2,
    /// A failure answer to an earlier request.
    Error = 3,
}

impl MsgType {
    /// Decode from the on-wire discriminant.
    pub fn from_wire(value: u8) -> Result<Self> {
        match value {
            1 => Ok(MsgType::Request),
            2 => Ok(MsgType::Response),
            3 => Ok(MsgType::Error),
            other => Err(RinglinkError::Protocol(format!(
                "unknown message type {other}"
            ))),
        }
    }

    /// True for `Response` and `Error`, the two kinds that answer a request.
    #[inline]
    pub fn is_reply(self) -> bool {
        matches!(self, MsgType::Response | MsgType::Error)
    }
}

/// Decoded packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Message kind.
    pub msg_type: MsgType,
    /// Message identifier, monotonically assigned by the originating peer.
    pub msg_id: u64,
    /// Total byte length of the reassembled payload.
    pub payload_size: i32,
    /// 1-indexed position of this packet within the message.
    pub current_packet: u16,
    /// Total packet count for the message.
    pub total_packets: u16,
    /// For replies, the `msg_id` of the request being answered; zero otherwise.
    pub response_id: u64,
}

impl PacketHeader {
    /// Create a new header.
    pub fn new(
        msg_type: MsgType,
        msg_id: u64,
        payload_size: i32,
        current_packet: u16,
        total_packets: u16,
        response_id: u64,
    ) -> Self {
        Self {
            msg_type,
            msg_id,
            payload_size,
            current_packet,
            total_packets,
            response_id,
        }
    }

    /// Encode the header to its 64-byte wire form.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode the header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is smaller than [`HEADER_SIZE`].
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0] = self.msg_type as u8;
        buf[1..9].copy_from_slice(&self.msg_id.to_ne_bytes());
        buf[9..13].copy_from_slice(&self.payload_size.to_ne_bytes());
        buf[13..15].copy_from_slice(&self.current_packet.to_ne_bytes());
        buf[15..17].copy_from_slice(&self.total_packets.to_ne_bytes());
        buf[17..25].copy_from_slice(&self.response_id.to_ne_bytes());
        buf[25..HEADER_SIZE].fill(0);
    }

    /// Decode a header from the start of a ring slot.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(RinglinkError::Protocol(format!(
                "slot too short for header: {} bytes",
                buf.len()
            )));
        }
        Ok(Self {
            msg_type: MsgType::from_wire(buf[0])?,
            msg_id: u64::from_ne_bytes(buf[1..9].try_into().expect("8-byte slice")),
            payload_size: i32::from_ne_bytes(buf[9..13].try_into().expect("4-byte slice")),
            current_packet: u16::from_ne_bytes(buf[13..15].try_into().expect("2-byte slice")),
            total_packets: u16::from_ne_bytes(buf[15..17].try_into().expect("2-byte slice")),
            response_id: u64::from_ne_bytes(buf[17..25].try_into().expect("8-byte slice")),
        })
    }

    /// True when this is the last packet of its message.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.current_packet == self.total_packets
    }
}

/// Validate a ring slot size against the admissible range.
pub fn validate_slot_size(slot_size: usize) -> Result<()> {
    if !(MIN_SLOT_SIZE..=MAX_SLOT_SIZE).contains(&slot_size) {
        return Err(RinglinkError::ConfigOutOfRange {
            value: slot_size,
            min: MIN_SLOT_SIZE,
            max: MAX_SLOT_SIZE,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_encode_decode_roundtrip() {
        let original = PacketHeader::new(MsgType::Request, 42, 1024, 2, 3, 0);
        let encoded = original.encode();
        let decoded = PacketHeader::decode(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn header_size_is_exactly_64() {
        let header = PacketHeader::new(MsgType::Response, 1, 0, 1, 1, 1);
        assert_eq!(header.encode().len(), HEADER_SIZE);
        assert_eq!(HEADER_SIZE, 64);
    }

    #[test]
    fn header_field_layout() {
        let header = PacketHeader::new(MsgType::Error, 0x0102030405060708, 0x0A0B0C0D, 7, 9, 0x1112131415161718);
        let bytes = header.encode();

        assert_eq!(bytes[0], 3);
        assert_eq!(bytes[1..9], 0x0102030405060708u64.to_ne_bytes());
        assert_eq!(bytes[9..13], 0x0A0B0C0Di32.to_ne_bytes());
        assert_eq!(bytes[13..15], 7u16.to_ne_bytes());
        assert_eq!(bytes[15..17], 9u16.to_ne_bytes());
        assert_eq!(bytes[17..25], 0x1112131415161718u64.to_ne_bytes());
        assert!(bytes[25..].iter().all(|&b| b == 0));
    }

    #[test]
    fn decode_rejects_unknown_msg_type() {
        let mut bytes = PacketHeader::new(MsgType::Request, 1, 0, 1, 1, 0).encode();
        bytes[0] = 9;
        assert!(PacketHeader::decode(&bytes).is_err());
    }

    #[test]
    fn decode_rejects_short_buffer() {
        let bytes = [0u8; HEADER_SIZE - 1];
        assert!(PacketHeader::decode(&bytes).is_err());
    }

    #[test]
    fn terminal_detection() {
        assert!(PacketHeader::new(MsgType::Request, 1, 0, 1, 1, 0).is_terminal());
        assert!(!PacketHeader::new(MsgType::Request, 1, 900, 1, 2, 0).is_terminal());
        assert!(PacketHeader::new(MsgType::Request, 1, 900, 2, 2, 0).is_terminal());
    }

    #[test]
    fn slot_size_bounds() {
        assert!(validate_slot_size(MIN_SLOT_SIZE).is_ok());
        assert!(validate_slot_size(MAX_SLOT_SIZE).is_ok());
        assert!(validate_slot_size(MIN_SLOT_SIZE - 1).is_err());
        assert!(validate_slot_size(MAX_SLOT_SIZE + 1).is_err());
    }

    #[test]
    fn msg_type_reply_classification() {
        assert!(!MsgType::Request.is_reply());
        assert!(MsgType::Response.is_reply());
        assert!(MsgType::Error.is_reply());
    }
}
