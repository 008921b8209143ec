//! Packet framing for tether.
//!
//! Every packet on a stream carrier starts with a 6-byte header:
//! - a 16-bit magic word, always 1, in the sender's byte order
//! - a 16-bit payload length
//! - a 16-bit count of fragments still to come (0 ends the message)
//!
//! Receivers detect the sender's byte order from the magic word, so peers of
//! different endianness interoperate without negotiation. Messages larger
//! than one packet are split by [`send_message`] and reassembled by
//! [`recv_message`]. The shared-memory carrier uses the fixed layout in
//! [`layout`] instead of headers.

pub mod byteorder;
pub mod codec;
pub mod error;
pub mod fragment;
pub mod layout;
pub mod reader;
pub mod writer;

pub use byteorder::ByteOrder;
pub use codec::{
    decode_header, encode_packet, payload_capacity, Packet, PacketConfig, PacketHeader,
    DEFAULT_MAX_PACKET_SIZE, DEFAULT_READ_TIMEOUT, HEADER_SIZE, MAGIC, MAX_PACKET_SIZE,
    MIN_PACKET_SIZE,
};
pub use error::{FrameError, Result};
pub use fragment::{fragment_capacity, fragment_count, recv_message, send_message, Fragments};
#[cfg(unix)]
pub use layout::SegmentView;
pub use layout::{segment_size, ChunkDescriptor, TransferFlag};
pub use reader::PacketReader;
pub use writer::PacketWriter;
