//! Fragmentation plan for multiplexing messages over fixed-size slots.
//!
//! A message of `len` payload bytes occupies `ceil(len / msg_buffer_len)`
//! packets, each carrying up to `msg_buffer_len` bytes after the header. An
//! empty message still occupies exactly one packet.

use super::wire_format::PacketHeader;

/// Number of packets needed for a payload of `len` bytes.
///
/// `msg_buffer_len` is the usable payload room per packet (slot size minus
/// header size).
pub fn packet_count(len: usize, msg_buffer_len: usize) -> usize {
    if len == 0 {
        1
    } else {
        len.div_ceil(msg_buffer_len)
    }
}

/// Payload byte count carried by the packet described by `header`.
///
/// For the terminal packet of a multi-packet message this is
/// `payload_size - msg_buffer_len * (total_packets - 1)`, so a payload that is
/// an exact multiple of `msg_buffer_len` fills its last packet completely.
pub fn packet_payload_len(header: &PacketHeader, msg_buffer_len: usize) -> usize {
    let payload_size = header.payload_size.max(0) as usize;
    if payload_size == 0 {
        0
    } else if payload_size < msg_buffer_len {
        payload_size
    } else if !header.is_terminal() {
        msg_buffer_len
    } else {
        payload_size - msg_buffer_len * (header.total_packets as usize - 1)
    }
}

/// Byte offset of this packet's fragment within the reassembled payload.
#[inline]
pub fn fragment_offset(header: &PacketHeader, msg_buffer_len: usize) -> usize {
    msg_buffer_len * (header.current_packet as usize - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire_format::MsgType;

    fn header(payload_size: i32, current: u16, total: u16) -> PacketHeader {
        PacketHeader::new(MsgType::Request, 1, payload_size, current, total, 0)
    }

    #[test]
    fn empty_payload_is_one_packet() {
        assert_eq!(packet_count(0, 448), 1);
    }

    #[test]
    fn exact_fit_is_one_packet() {
        assert_eq!(packet_count(448, 448), 1);
        assert_eq!(packet_count(449, 448), 2);
    }

    #[test]
    fn large_payload_count() {
        // 1024 bytes over 448-byte packets -> 3 packets.
        assert_eq!(packet_count(1024, 448), 3);
    }

    #[test]
    fn small_message_size() {
        assert_eq!(packet_payload_len(&header(100, 1, 1), 448), 100);
    }

    #[test]
    fn non_terminal_packet_is_full() {
        assert_eq!(packet_payload_len(&header(1024, 1, 3), 448), 448);
        assert_eq!(packet_payload_len(&header(1024, 2, 3), 448), 448);
    }

    #[test]
    fn terminal_packet_carries_remainder() {
        assert_eq!(packet_payload_len(&header(1024, 3, 3), 448), 128);
    }

    #[test]
    fn exact_multiple_terminal_packet_is_full() {
        // 896 = 2 * 448; the modulo would say 0, the plan says 448.
        assert_eq!(packet_payload_len(&header(896, 2, 2), 448), 448);
    }

    #[test]
    fn empty_message_carries_nothing() {
        assert_eq!(packet_payload_len(&header(0, 1, 1), 448), 0);
    }

    #[test]
    fn fragment_offsets() {
        assert_eq!(fragment_offset(&header(1024, 1, 3), 448), 0);
        assert_eq!(fragment_offset(&header(1024, 2, 3), 448), 448);
        assert_eq!(fragment_offset(&header(1024, 3, 3), 448), 896);
    }
}
