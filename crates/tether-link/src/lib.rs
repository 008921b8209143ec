//! Point-to-point links between a server and exactly one client.
//!
//! This is the layer callers use. A [`Connection`] accepts one peer over TCP
//! or a shared-memory segment and then exchanges whole messages with it; a
//! [`Client`] is the other end. Receives report [`Received::TimedOut`] when
//! nothing arrived, which is not an error. Everything else that goes wrong
//! is a [`LinkError`] classified by [`FailureKind`].
//!
//! ```no_run
//! use tether_link::{Connection, ConnectOutcome, LinkConfig, Received};
//!
//! # fn main() -> tether_link::Result<()> {
//! let mut conn = Connection::new(LinkConfig::new(9000))?;
//! while conn.connect_to_client()? == ConnectOutcome::Pending {}
//! if let Received::Message(request) = conn.receive()? {
//!     conn.send(&request)?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod outcome;
pub mod state;

#[cfg(unix)]
pub mod client;
#[cfg(unix)]
pub mod connection;
#[cfg(unix)]
pub mod shm;

pub use config::{Endpoint, LinkConfig};
pub use error::{FailureKind, LinkError, Result};
pub use outcome::{ConnectOutcome, Received};
pub use state::{CancelHandle, LinkState};

#[cfg(unix)]
pub use client::Client;
#[cfg(unix)]
pub use connection::Connection;
#[cfg(unix)]
pub use shm::{ShmChannel, ShmRole};
