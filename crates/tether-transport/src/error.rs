use std::net::SocketAddr;

/// Errors that can occur in carrier operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to create or bind the listening socket.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to start listening on a bound socket.
    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An accept was attempted before `bind_listen` succeeded.
    #[error("acceptor is not listening")]
    NotListening,

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a named shared-memory segment.
    #[error("failed to create shared memory {name:?}: {source}")]
    SegmentCreate {
        name: String,
        source: std::io::Error,
    },

    /// Failed to open an existing named shared-memory segment.
    #[error("failed to open shared memory {name:?}: {source}")]
    SegmentOpen {
        name: String,
        source: std::io::Error,
    },

    /// Failed to map a shared-memory segment into this process.
    #[error("failed to map shared memory {name:?}: {source}")]
    SegmentMap {
        name: String,
        source: std::io::Error,
    },

    /// An access fell outside the mapped segment.
    #[error("segment access out of bounds (offset {offset}, len {len}, segment {size} bytes)")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },
}

pub type Result<T> = std::result::Result<T, TransportError>;
