use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use crate::byteorder::{decode_u16, detect_peer_order, encode_u16, ByteOrder};
use crate::error::{FrameError, Result};

/// Packet header: magic (2) + payload length (2) + fragments remaining (2) = 6 bytes.
pub const HEADER_SIZE: usize = 6;

/// Magic word. Always 1, written in the sender's byte order.
pub const MAGIC: u16 = 1;

/// Smallest max packet size that still carries a payload byte.
pub const MIN_PACKET_SIZE: usize = HEADER_SIZE + 1;

/// Largest max packet size whose payload length fits the 16-bit field.
pub const MAX_PACKET_SIZE: usize = HEADER_SIZE + u16::MAX as usize;

/// Default maximum packet size: 16 KiB.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 16 * 1024;

/// Default budget for reading one header or one payload.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Header fields after byte-order correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Bytes following the header in this packet.
    pub payload_len: u16,
    /// Count-down; 0 marks the last fragment of a message.
    pub fragments_remaining: u16,
}

impl PacketHeader {
    pub fn new(payload_len: u16, fragments_remaining: u16) -> Self {
        Self {
            payload_len,
            fragments_remaining,
        }
    }

    /// Whether this packet ends a logical message.
    pub fn is_final(&self) -> bool {
        self.fragments_remaining == 0
    }
}

/// One physical packet as read off the wire.
#[derive(Debug, Clone)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Bytes,
    /// Byte order the sender used for this packet.
    pub sender_order: ByteOrder,
}

/// Encode a packet into the wire format.
///
/// Wire format (all words in `order`):
/// ```text
/// ┌────────────┬──────────────┬──────────────────┬──────────────────┐
/// │ Magic (2B) │ Length (2B)  │ Remaining (2B)   │ Payload          │
/// │ always 1   │ payload size │ 0 = last packet  │ (Length bytes)   │
/// └────────────┴──────────────┴──────────────────┴──────────────────┘
/// ```
pub fn encode_packet(
    order: ByteOrder,
    fragments_remaining: u16,
    payload: &[u8],
    dst: &mut BytesMut,
) -> Result<()> {
    let payload_len = u16::try_from(payload.len()).map_err(|_| FrameError::MessageTooLarge {
        len: payload.len(),
        fragments: 1,
        max: 1,
    })?;
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&encode_u16(order, MAGIC));
    dst.put_slice(&encode_u16(order, payload_len));
    dst.put_slice(&encode_u16(order, fragments_remaining));
    dst.put_slice(payload);
    Ok(())
}

/// Decode a header read in the `local` byte order.
///
/// Returns the corrected header and the byte order the sender used.
pub fn decode_header(
    local: ByteOrder,
    raw: &[u8; HEADER_SIZE],
) -> Result<(PacketHeader, ByteOrder)> {
    let magic = [raw[0], raw[1]];
    let sender = detect_peer_order(local, magic)
        .ok_or_else(|| FrameError::InvalidMagic(decode_u16(local, magic)))?;

    let payload_len = decode_u16(sender, [raw[2], raw[3]]);
    let fragments_remaining = decode_u16(sender, [raw[4], raw[5]]);
    Ok((PacketHeader::new(payload_len, fragments_remaining), sender))
}

/// Payload bytes available per packet for `max_packet_size`.
pub fn payload_capacity(max_packet_size: usize) -> Result<usize> {
    if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&max_packet_size) {
        return Err(FrameError::InvalidMaxPacketSize {
            size: max_packet_size,
            min: MIN_PACKET_SIZE,
            max: MAX_PACKET_SIZE,
        });
    }
    Ok(max_packet_size - HEADER_SIZE)
}

/// Configuration for the packet reader and writer.
#[derive(Debug, Clone)]
pub struct PacketConfig {
    /// Upper bound on header + payload for outgoing packets. Default: 16 KiB.
    pub max_packet_size: usize,
    /// Budget for reading a header, and again for reading its payload.
    pub read_timeout: Duration,
    /// Order this side writes header words in.
    pub byte_order: ByteOrder,
}

impl Default for PacketConfig {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            byte_order: ByteOrder::native(),
        }
    }
}
