use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::time::Duration;

use crate::error::Result;

/// A connected carrier stream implementing Read + Write.
///
/// This is the fundamental I/O type handed out by [`StreamAcceptor::poll_accept`]
/// and by client-side connects. Today it wraps a TCP stream.
pub struct WireStream {
    inner: WireStreamInner,
}

enum WireStreamInner {
    Tcp(std::net::TcpStream),
}

impl Read for WireStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            WireStreamInner::Tcp(stream) => stream.read(buf),
        }
    }
}

impl Write for WireStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            WireStreamInner::Tcp(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            WireStreamInner::Tcp(stream) => stream.flush(),
        }
    }
}

impl WireStream {
    /// Create a WireStream from a TCP stream.
    pub fn from_tcp(stream: std::net::TcpStream) -> Self {
        Self {
            inner: WireStreamInner::Tcp(stream),
        }
    }

    /// Connect to a listening TCP endpoint (blocking, bounded by `timeout`).
    pub fn connect_tcp(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let stream = std::net::TcpStream::connect_timeout(&addr, timeout)
            .map_err(|source| crate::TransportError::Connect { addr, source })?;
        tracing::debug!(%addr, "connected tcp stream");
        Ok(Self::from_tcp(stream))
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            WireStreamInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            WireStreamInner::Tcp(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            WireStreamInner::Tcp(stream) => {
                let cloned = stream.try_clone()?;
                Ok(Self::from_tcp(cloned))
            }
        }
    }

    /// Address of the remote end.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        match &self.inner {
            WireStreamInner::Tcp(stream) => stream.peer_addr().map_err(Into::into),
        }
    }

    /// Shut down both directions of the stream.
    pub fn shutdown(&self) -> Result<()> {
        match &self.inner {
            WireStreamInner::Tcp(stream) => stream.shutdown(Shutdown::Both).map_err(Into::into),
        }
    }
}

impl std::fmt::Debug for WireStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            WireStreamInner::Tcp(stream) => f
                .debug_struct("WireStream")
                .field("type", &"tcp")
                .field("peer", &stream.peer_addr().ok())
                .finish(),
        }
    }
}

/// Listening side of a stream carrier.
///
/// One adapter per platform implements this; the connection state machine
/// only talks to the trait.
pub trait StreamAcceptor {
    /// Bind and start listening. Idempotent once it has succeeded.
    fn bind_listen(&mut self) -> Result<()>;

    /// Whether `bind_listen` has succeeded.
    fn is_listening(&self) -> bool;

    /// Wait up to `timeout` for a pending connection and accept it.
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    fn poll_accept(&mut self, timeout: Duration) -> Result<Option<WireStream>>;

    /// Address actually bound, once listening.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Release the listening descriptor.
    fn close(&mut self);
}
