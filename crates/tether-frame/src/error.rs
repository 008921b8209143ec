use std::time::Duration;

/// Errors that can occur while framing, fragmenting or reassembling.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The header's first word is neither 1 nor byte-swapped 1.
    #[error("invalid packet magic 0x{0:04x} (expected 0x0001 in either byte order)")]
    InvalidMagic(u16),

    /// Nothing arrived within the read-timeout budget.
    #[error("no data within {0:?}")]
    Timeout(Duration),

    /// Fewer bytes arrived than the header promised. The stream is out of sync.
    #[error("short read ({received} of {expected} bytes)")]
    ShortRead { expected: usize, received: usize },

    /// Fewer bytes were transmitted than the packet holds.
    #[error("short write ({written} of {expected} bytes)")]
    ShortWrite { expected: usize, written: usize },

    /// The peer closed the stream.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Zero-length messages are never transmitted.
    #[error("refusing to send an empty message")]
    EmptyMessage,

    /// The maximum packet size leaves no room for payload or overflows the length field.
    #[error("invalid max packet size {size} (must be {min}..={max})")]
    InvalidMaxPacketSize { size: usize, min: usize, max: usize },

    /// The message needs more fragments than the count-down field can express.
    #[error("message of {len} bytes needs {fragments} fragments (max {max})")]
    MessageTooLarge {
        len: usize,
        fragments: usize,
        max: usize,
    },

    /// The stream stalled after part of a message had been reassembled.
    #[error("message incomplete after {fragments} fragments ({bytes} bytes): {source}")]
    IncompleteMessage {
        fragments: usize,
        bytes: usize,
        #[source]
        source: Box<FrameError>,
    },

    /// A fragment's count-down does not follow the previous one.
    #[error("fragment out of sequence (expected {expected} remaining, got {got})")]
    OutOfSequence { expected: u16, got: u16 },

    /// A transfer descriptor in the shared segment is inconsistent.
    #[error("invalid shared-memory chunk: {0}")]
    InvalidChunk(String),

    /// The carrier underneath failed (socket option, segment access).
    #[error("transport error: {0}")]
    Transport(#[from] tether_transport::TransportError),

    /// An I/O error occurred while reading or writing packets.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Whether the error leaves the stream usable (nothing was consumed).
    pub fn is_timeout(&self) -> bool {
        matches!(self, FrameError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
