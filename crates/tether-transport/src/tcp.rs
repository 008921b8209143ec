use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener};
use std::os::fd::AsRawFd;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{StreamAcceptor, WireStream};

/// TCP listening carrier.
///
/// Binds once, then hands out at most one pending connection per
/// [`poll_accept`](StreamAcceptor::poll_accept) call. Readiness is awaited
/// with `poll(2)` so the wait is always bounded.
pub struct TcpAcceptor {
    addr: SocketAddr,
    listener: Option<TcpListener>,
    /// Set once a bind/listen attempt failed; later attempts fail fast.
    bind_failed: bool,
}

impl TcpAcceptor {
    /// Pending-connection queue length handed to `listen(2)`.
    pub const LISTEN_BACKLOG: i32 = 10;

    /// Create an acceptor for `addr`. Nothing is bound until `bind_listen`.
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            listener: None,
            bind_failed: false,
        }
    }

    fn open_listener(addr: SocketAddr) -> Result<TcpListener> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(|source| TransportError::Bind { addr, source })?;
        socket
            .set_reuse_address(true)
            .map_err(|source| TransportError::Bind { addr, source })?;
        socket
            .bind(&addr.into())
            .map_err(|source| TransportError::Bind { addr, source })?;
        socket
            .listen(Self::LISTEN_BACKLOG)
            .map_err(|source| TransportError::Listen { addr, source })?;
        // Readiness comes from poll(2); a connection that vanishes between
        // poll and accept must not block us.
        socket
            .set_nonblocking(true)
            .map_err(|source| TransportError::Listen { addr, source })?;
        Ok(socket.into())
    }
}

impl StreamAcceptor for TcpAcceptor {
    fn bind_listen(&mut self) -> Result<()> {
        if self.listener.is_some() {
            return Ok(());
        }
        if self.bind_failed {
            return Err(TransportError::Bind {
                addr: self.addr,
                source: std::io::Error::other("an earlier bind/listen attempt failed"),
            });
        }

        match Self::open_listener(self.addr) {
            Ok(listener) => {
                let bound = listener.local_addr().unwrap_or(self.addr);
                info!(addr = %bound, "listening on tcp socket");
                self.listener = Some(listener);
                Ok(())
            }
            Err(err) => {
                self.bind_failed = true;
                Err(err)
            }
        }
    }

    fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    fn poll_accept(&mut self, timeout: Duration) -> Result<Option<WireStream>> {
        let listener = self.listener.as_ref().ok_or(TransportError::NotListening)?;

        if !wait_readable(listener.as_raw_fd(), timeout).map_err(TransportError::Accept)? {
            return Ok(None);
        }

        let (stream, from) = match listener.accept() {
            Ok(pair) => pair,
            Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(None),
            Err(err) if err.kind() == ErrorKind::Interrupted => return Ok(None),
            Err(err) if err.kind() == ErrorKind::ConnectionAborted => {
                debug!(error = %err, "client aborted before accept");
                return Ok(None);
            }
            Err(err) => return Err(TransportError::Accept(err)),
        };
        // BSD-derived stacks propagate O_NONBLOCK to accepted sockets.
        stream.set_nonblocking(false)?;
        debug!(peer = %from, "accepted tcp connection");
        Ok(Some(WireStream::from_tcp(stream)))
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    fn close(&mut self) {
        if let Some(listener) = self.listener.take() {
            debug!(addr = ?listener.local_addr().ok(), "closing tcp listener");
        }
    }
}

/// Wait until `fd` is readable or `timeout` elapses.
///
/// A wait interrupted by a signal reports "not readable".
fn wait_readable(fd: std::os::fd::RawFd, timeout: Duration) -> std::io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

    // SAFETY: `pfd` is a valid, writable pollfd and we pass a count of 1.
    let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
    if rc < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(rc > 0 && (pfd.revents & libc::POLLIN) != 0)
}
