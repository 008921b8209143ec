use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tether_frame::FrameError;
use tether_transport::TransportError;

use crate::state::LinkState;

/// Errors that can occur in connection operations.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Carrier-level error (socket, segment).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Framing-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Send or receive attempted without an established peer.
    #[error("not connected (state: {0})")]
    NotConnected(LinkState),

    /// An accept was attempted while a peer is already connected.
    #[error("a peer is already connected")]
    AlreadyConnected,

    /// The shared-memory peer did not move the transfer flag in time.
    #[error("peer unresponsive after {waited:?} while {stage}")]
    PeerUnresponsive { waited: Duration, stage: &'static str },

    /// The peer violated the protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A state change that the connection lifecycle does not allow.
    #[error("invalid state transition {from} -> {to}")]
    InvalidTransition { from: LinkState, to: LinkState },

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to read a configuration file.
    #[error("failed to read config {path:?}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse failure classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Nothing arrived in time; the connection is intact.
    Timeout,
    /// Fewer bytes arrived than promised; the connection is broken.
    ShortRead,
    /// Fewer bytes left than promised; the connection is broken.
    ShortWrite,
    NotConnected,
    /// Socket or segment setup failed; the connection instance is unusable.
    ResourceFailure,
    PeerUnresponsive,
    Protocol,
    /// Caller-supplied input was rejected before touching the carrier.
    InvalidInput,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::ShortRead => "short_read",
            FailureKind::ShortWrite => "short_write",
            FailureKind::NotConnected => "not_connected",
            FailureKind::ResourceFailure => "resource_failure",
            FailureKind::PeerUnresponsive => "peer_unresponsive",
            FailureKind::Protocol => "protocol",
            FailureKind::InvalidInput => "invalid_input",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LinkError {
    /// Classify the error.
    pub fn kind(&self) -> FailureKind {
        match self {
            LinkError::Transport(_) => FailureKind::ResourceFailure,
            LinkError::Frame(err) => frame_kind(err),
            LinkError::NotConnected(_) | LinkError::AlreadyConnected => FailureKind::NotConnected,
            LinkError::PeerUnresponsive { .. } => FailureKind::PeerUnresponsive,
            LinkError::Protocol(_) | LinkError::InvalidTransition { .. } => FailureKind::Protocol,
            LinkError::InvalidConfig(_) | LinkError::ConfigRead { .. } | LinkError::Json(_) => {
                FailureKind::InvalidInput
            }
        }
    }

    /// Whether the caller may simply retry on the same connection.
    pub fn is_recoverable(&self) -> bool {
        self.kind() == FailureKind::Timeout
    }
}

fn frame_kind(err: &FrameError) -> FailureKind {
    match err {
        FrameError::Timeout(_) => FailureKind::Timeout,
        FrameError::ShortRead { .. }
        | FrameError::ConnectionClosed
        | FrameError::IncompleteMessage { .. } => FailureKind::ShortRead,
        FrameError::ShortWrite { .. } => FailureKind::ShortWrite,
        FrameError::InvalidMagic(_)
        | FrameError::OutOfSequence { .. }
        | FrameError::InvalidChunk(_) => FailureKind::Protocol,
        FrameError::EmptyMessage
        | FrameError::InvalidMaxPacketSize { .. }
        | FrameError::MessageTooLarge { .. } => FailureKind::InvalidInput,
        FrameError::Transport(_) | FrameError::Io(_) => FailureKind::ResourceFailure,
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
