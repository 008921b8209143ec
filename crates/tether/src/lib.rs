//! Point-to-point message transport over TCP or shared memory.
//!
//! tether moves whole messages between a server and exactly one client.
//! Messages of any size are split into bounded packets on the way out and
//! reassembled on the way in; peers of different byte order interoperate
//! without negotiation.
//!
//! # Crate Structure
//!
//! - [`transport`]: carriers (TCP acceptor and stream, named shared-memory segments, flag waits)
//! - [`frame`]: packet header codec, fragmentation and reassembly, shared segment layout
//! - [`link`]: the single-peer [`Connection`](link::Connection), its client,
//!   configuration and errors
//!
//! ```no_run
//! use tether::link::{ConnectOutcome, Connection, LinkConfig, Received};
//!
//! # fn main() -> tether::link::Result<()> {
//! let mut connection = Connection::new(LinkConfig::new(7400))?;
//! while connection.connect_to_client()? == ConnectOutcome::Pending {}
//! if let Received::Message(message) = connection.receive()? {
//!     connection.send(&message)?;
//! }
//! # Ok(())
//! # }
//! ```

/// Re-export transport types.
pub mod transport {
    pub use tether_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use tether_frame::*;
}

/// Re-export connection types.
pub mod link {
    pub use tether_link::*;
}
