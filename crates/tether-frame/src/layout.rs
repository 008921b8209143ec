//! Fixed byte layout of a tether shared-memory segment.
//!
//! ```text
//! offset  size  field
//! 0       1     ready flag (1 = peer attached)
//! 1       4     max packet size, written once by the listener
//! 5       1     transfer flag (0 idle, 1 to listener, 2 to peer)
//! 6       4     chunk length
//! 10      4     chunk offset (always 20)
//! 14      4     total message length
//! 20      ...   payload, max packet size bytes
//! ```
//!
//! Integers are host order and unaligned. Both peers map the same segment on
//! the same machine, so host order is shared. Every offset used anywhere in
//! tether comes from this module.

use crate::error::{FrameError, Result};

pub const READY_FLAG: usize = 0;
pub const MAX_PACKET_SIZE: usize = 1;
pub const TRANSFER_FLAG: usize = 5;
pub const CHUNK_LEN: usize = 6;
pub const CHUNK_OFFSET: usize = 10;
pub const TOTAL_LEN: usize = 14;
pub const PAYLOAD: usize = 20;

/// Total segment size for `max_packet_size` bytes of payload.
pub const fn segment_size(max_packet_size: usize) -> usize {
    max_packet_size + PAYLOAD
}

/// Who may touch the payload region next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransferFlag {
    /// Drained; the next writer may claim the region.
    Idle = 0,
    /// The attached peer queued a chunk for the listener.
    ToListener = 1,
    /// The listener queued a chunk for the attached peer.
    ToPeer = 2,
}

impl TryFrom<u8> for TransferFlag {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(TransferFlag::Idle),
            1 => Ok(TransferFlag::ToListener),
            2 => Ok(TransferFlag::ToPeer),
            other => Err(FrameError::InvalidChunk(format!("unknown transfer flag {other}"))),
        }
    }
}

/// The three integers describing the chunk currently in the payload region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub len: i32,
    pub offset: i32,
    pub total: i32,
}

impl ChunkDescriptor {
    /// Check the descriptor against the segment's payload capacity.
    pub fn validate(&self, max_packet_size: usize) -> Result<(usize, usize)> {
        let len = usize::try_from(self.len)
            .map_err(|_| FrameError::InvalidChunk(format!("negative chunk length {}", self.len)))?;
        let total = usize::try_from(self.total).map_err(|_| {
            FrameError::InvalidChunk(format!("negative total length {}", self.total))
        })?;
        if self.offset != PAYLOAD as i32 {
            return Err(FrameError::InvalidChunk(format!(
                "chunk offset {} (expected {PAYLOAD})",
                self.offset
            )));
        }
        if len > max_packet_size {
            return Err(FrameError::InvalidChunk(format!(
                "chunk length {len} exceeds max packet size {max_packet_size}"
            )));
        }
        if len > total {
            return Err(FrameError::InvalidChunk(format!(
                "chunk length {len} exceeds total {total}"
            )));
        }
        Ok((len, total))
    }
}

#[cfg(unix)]
pub use view::SegmentView;

#[cfg(unix)]
mod view {
    use tether_transport::SharedSegment;

    use super::*;

    /// Typed access to the fields of a mapped segment.
    #[derive(Debug, Clone, Copy)]
    pub struct SegmentView<'a> {
        segment: &'a SharedSegment,
    }

    impl<'a> SegmentView<'a> {
        pub fn new(segment: &'a SharedSegment) -> Self {
            Self { segment }
        }

        /// Payload bytes the segment can hold in one chunk.
        pub fn payload_capacity(&self) -> usize {
            self.segment.len().saturating_sub(PAYLOAD)
        }

        pub fn is_peer_connected(&self) -> Result<bool> {
            Ok(self.segment.load_u8(READY_FLAG)? == 1)
        }

        pub fn set_peer_connected(&self, connected: bool) -> Result<()> {
            self.segment.store_u8(READY_FLAG, u8::from(connected))?;
            Ok(())
        }

        pub fn max_packet_size(&self) -> Result<usize> {
            let raw = self.segment.read_i32(MAX_PACKET_SIZE)?;
            usize::try_from(raw)
                .map_err(|_| FrameError::InvalidChunk(format!("negative max packet size {raw}")))
        }

        pub fn set_max_packet_size(&self, size: usize) -> Result<()> {
            let raw = i32::try_from(size).map_err(|_| {
                FrameError::InvalidChunk(format!("max packet size {size} overflows"))
            })?;
            self.segment.write_i32(MAX_PACKET_SIZE, raw)?;
            Ok(())
        }

        pub fn transfer_flag(&self) -> Result<TransferFlag> {
            TransferFlag::try_from(self.segment.load_u8(TRANSFER_FLAG)?)
        }

        /// Raw flag byte; never fails on an unknown value.
        pub fn transfer_flag_raw(&self) -> Result<u8> {
            Ok(self.segment.load_u8(TRANSFER_FLAG)?)
        }

        pub fn set_transfer_flag(&self, flag: TransferFlag) -> Result<()> {
            self.segment.store_u8(TRANSFER_FLAG, flag as u8)?;
            Ok(())
        }

        pub fn read_descriptor(&self) -> Result<ChunkDescriptor> {
            Ok(ChunkDescriptor {
                len: self.segment.read_i32(CHUNK_LEN)?,
                offset: self.segment.read_i32(CHUNK_OFFSET)?,
                total: self.segment.read_i32(TOTAL_LEN)?,
            })
        }

        /// Copy `chunk` into the payload region and fill in its descriptor.
        ///
        /// Does not touch the transfer flag; the caller publishes the chunk.
        pub fn write_chunk(&self, chunk: &[u8], total: usize) -> Result<()> {
            if chunk.len() > self.payload_capacity() {
                return Err(FrameError::InvalidChunk(format!(
                    "chunk of {} bytes exceeds payload region of {}",
                    chunk.len(),
                    self.payload_capacity()
                )));
            }
            let len = i32::try_from(chunk.len())
                .map_err(|_| FrameError::InvalidChunk("chunk length overflows".to_string()))?;
            let total = i32::try_from(total).map_err(|_| {
                FrameError::InvalidChunk(format!("message of {total} bytes overflows"))
            })?;
            self.segment.copy_in(PAYLOAD, chunk)?;
            self.segment.write_i32(CHUNK_LEN, len)?;
            self.segment.write_i32(CHUNK_OFFSET, PAYLOAD as i32)?;
            self.segment.write_i32(TOTAL_LEN, total)?;
            Ok(())
        }

        /// Copy `dst.len()` bytes of the current chunk out of the payload region.
        pub fn read_chunk(&self, descriptor: &ChunkDescriptor, dst: &mut [u8]) -> Result<()> {
            self.segment.copy_out(descriptor.offset as usize, dst)?;
            Ok(())
        }
    }
}
