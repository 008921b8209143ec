//! Carrier adapters for tether.
//!
//! Two physically different carriers sit underneath the framing protocol:
//! - TCP stream sockets (listener + one accepted peer)
//! - Named POSIX shared-memory segments
//!
//! This is the lowest layer of tether. Platform differences live here and
//! nowhere else; the protocol crates only see [`WireStream`],
//! [`StreamAcceptor`] and [`SharedSegment`].

pub mod error;
pub mod traits;
pub mod wait;

#[cfg(unix)]
pub mod shm;
#[cfg(unix)]
pub mod tcp;

pub use error::{Result, TransportError};
pub use traits::{StreamAcceptor, WireStream};
pub use wait::{FlagWait, SleepPoll, SpinWait};

#[cfg(unix)]
pub use shm::{segment_name, SharedSegment, SEGMENT_NAME_PREFIX};
#[cfg(unix)]
pub use tcp::TcpAcceptor;
