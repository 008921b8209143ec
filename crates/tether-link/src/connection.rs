use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tether_frame::{recv_message, send_message, ByteOrder, FrameError, PacketReader, PacketWriter};
use tether_transport::{StreamAcceptor, TcpAcceptor, WireStream};
use tracing::{debug, info, warn};

use crate::config::{Endpoint, LinkConfig};
use crate::error::{LinkError, Result};
use crate::outcome::{ConnectOutcome, Received};
use crate::shm::ShmChannel;
use crate::state::{CancelHandle, LinkState};

/// Server side of a point-to-point link with exactly one peer.
///
/// The carrier is chosen by the configured port: positive for TCP, negative
/// for shared memory. Every operation is blocking and bounded by the
/// configured timeouts. At most one call of each kind (accept, receive,
/// send) should be in flight at a time.
pub struct Connection {
    config: LinkConfig,
    endpoint: Endpoint,
    state: LinkState,
    cancel: CancelHandle,
    carrier: Carrier,
}

enum Carrier {
    Socket {
        acceptor: Box<dyn StreamAcceptor + Send>,
        session: Option<SocketSession>,
    },
    SharedMemory(ShmChannel),
}

/// Reader and writer halves of the accepted stream.
struct SocketSession {
    reader: PacketReader<WireStream>,
    writer: PacketWriter<WireStream>,
    peer: SocketAddr,
}

impl Connection {
    /// Validate `config` and prepare the carrier.
    ///
    /// Shared-memory mode creates the segment here, clears its ready flag and
    /// publishes the max packet size. TCP mode binds nothing until
    /// [`bind_and_listen`](Self::bind_and_listen).
    pub fn new(config: LinkConfig) -> Result<Self> {
        config.validate()?;
        let endpoint = config.endpoint()?;
        let carrier = match endpoint {
            Endpoint::Tcp(port) => Carrier::Socket {
                acceptor: Box::new(TcpAcceptor::new(SocketAddr::new(config.bind_addr, port))),
                session: None,
            },
            Endpoint::SharedMemory(key) => Carrier::SharedMemory(ShmChannel::create(
                key,
                config.max_packet_size,
                config.shm_wait_timeout(),
            )?),
        };
        debug!(%endpoint, max_packet_size = config.max_packet_size, "connection created");
        Ok(Self {
            config,
            endpoint,
            state: LinkState::Unconnected,
            cancel: CancelHandle::new(),
            carrier,
        })
    }

    /// Bind and listen (TCP). Idempotent; a failed bind fails every later call.
    ///
    /// Shared memory has nothing to bind, so this only moves the state to
    /// `Listening`.
    pub fn bind_and_listen(&mut self) -> Result<()> {
        if let Carrier::Socket { acceptor, .. } = &mut self.carrier {
            acceptor.bind_listen()?;
        }
        let withdrawn = self.state == LinkState::CancelRequested && !self.cancel.is_cancelled();
        if self.state == LinkState::Unconnected || withdrawn {
            self.state.transition(LinkState::Listening)?;
        }
        Ok(())
    }

    /// Wait up to `timeout` for the peer.
    ///
    /// The wait is cut into slices of `cancel_check_ms` (TCP) or
    /// `shm_connect_poll_ms` (shared memory); a cancel request takes effect
    /// at the next slice boundary. A cancel requested before the call returns
    /// `Cancelled` without waiting.
    pub fn accept_with_timeout(&mut self, timeout: Duration) -> Result<ConnectOutcome> {
        if self.state.is_connected() {
            return Err(LinkError::AlreadyConnected);
        }
        if self.observe_cancel()? {
            return Ok(ConnectOutcome::Cancelled);
        }
        self.bind_and_listen()?;

        let deadline = Instant::now() + timeout;
        match &mut self.carrier {
            Carrier::Socket { acceptor, session } => {
                let slice = self.config.cancel_check();
                loop {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if let Some(stream) = acceptor.poll_accept(remaining.min(slice))? {
                        match open_session(stream, &self.config) {
                            Ok(opened) => {
                                *session = Some(opened);
                                break;
                            }
                            // The client is gone; keep listening for the next one.
                            Err(err) => warn!(error = %err, "dropped client during accept"),
                        }
                    }
                    if self.cancel.is_cancelled() {
                        self.state.transition(LinkState::CancelRequested)?;
                        return Ok(ConnectOutcome::Cancelled);
                    }
                    if Instant::now() >= deadline {
                        return Ok(ConnectOutcome::Pending);
                    }
                }
            }
            Carrier::SharedMemory(channel) => {
                let poll = self.config.shm_connect_poll();
                loop {
                    if channel.is_peer_connected()? {
                        channel.discard_unclaimed()?;
                        break;
                    }
                    if self.cancel.is_cancelled() {
                        self.state.transition(LinkState::CancelRequested)?;
                        return Ok(ConnectOutcome::Cancelled);
                    }
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(ConnectOutcome::Pending);
                    }
                    std::thread::sleep(remaining.min(poll));
                }
            }
        }

        self.state.transition(LinkState::Connected)?;
        match self.peer_address() {
            Some(peer) => info!(%peer, "peer connected"),
            None => info!(endpoint = %self.endpoint, "peer attached"),
        }
        Ok(ConnectOutcome::Connected)
    }

    /// Establish the connection or report that it already exists.
    ///
    /// TCP: bind if needed and run one accept bounded by `accept_timeout_ms`.
    /// Shared memory: poll the ready flag until it is raised or the wait is
    /// cancelled.
    pub fn connect_to_client(&mut self) -> Result<ConnectOutcome> {
        if self.state.is_connected() {
            return Ok(ConnectOutcome::Connected);
        }
        if !self.endpoint.is_shared_memory() {
            return self.accept_with_timeout(self.config.accept_timeout());
        }
        loop {
            match self.accept_with_timeout(self.config.cancel_check())? {
                ConnectOutcome::Pending => continue,
                outcome => return Ok(outcome),
            }
        }
    }

    /// Ask pending and future connection waits to give up.
    ///
    /// Has no effect on an established link beyond setting the flag.
    pub fn request_cancel(&mut self) {
        self.cancel.cancel();
        if !self.state.is_connected() && self.state != LinkState::CancelRequested {
            // Unconnected and Listening may both move to CancelRequested.
            if let Err(err) = self.state.transition(LinkState::CancelRequested) {
                warn!(error = %err, "cancel request left the state unchanged");
            }
        }
    }

    /// Withdraw a cancel request so waits work again.
    pub fn clear_cancel(&mut self) -> Result<()> {
        self.cancel.reset();
        if self.state == LinkState::CancelRequested {
            let next = if self.is_listening() {
                LinkState::Listening
            } else {
                LinkState::Unconnected
            };
            self.state.transition(next)?;
        }
        Ok(())
    }

    /// A handle another thread (or a signal handler) can cancel through.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Receive one logical message.
    ///
    /// `Received::TimedOut` leaves the link intact. Any error tears the
    /// session down; TCP returns to `Listening` so a new peer can be accepted.
    pub fn receive(&mut self) -> Result<Received> {
        self.require_connected()?;
        let result = match &mut self.carrier {
            Carrier::Socket { session, .. } => {
                let session = session.as_mut().ok_or(LinkError::NotConnected(self.state))?;
                match recv_message(&mut session.reader) {
                    Ok(bytes) => Ok(Received::Message(bytes)),
                    Err(FrameError::Timeout(_)) => Ok(Received::TimedOut),
                    Err(err) => Err(LinkError::from(err)),
                }
            }
            Carrier::SharedMemory(channel) => channel.receive(),
        };
        self.settle(result)
    }

    /// Send one logical message. Returns the number of packets or chunks used.
    ///
    /// An empty message is rejected before anything is transmitted.
    pub fn send(&mut self, message: &[u8]) -> Result<usize> {
        self.require_connected()?;
        let result = match &mut self.carrier {
            Carrier::Socket { session, .. } => {
                let session = session.as_mut().ok_or(LinkError::NotConnected(self.state))?;
                send_message(&mut session.writer, message).map_err(LinkError::from)
            }
            Carrier::SharedMemory(channel) => channel.send(message),
        };
        self.settle(result)
    }

    /// Address of the accepted TCP peer; `None` for shared memory.
    pub fn peer_address(&self) -> Option<SocketAddr> {
        match &self.carrier {
            Carrier::Socket {
                session: Some(session),
                ..
            } => Some(session.peer),
            _ => None,
        }
    }

    /// Byte order the peer writes in.
    ///
    /// TCP: unknown until the first header has been read. Shared memory: the
    /// peer shares this host, so its order is the native one.
    pub fn peer_byte_order(&self) -> Option<ByteOrder> {
        match &self.carrier {
            Carrier::Socket {
                session: Some(session),
                ..
            } => session.reader.peer_byte_order(),
            Carrier::Socket { session: None, .. } => None,
            Carrier::SharedMemory(_) if self.state.is_connected() => Some(ByteOrder::native()),
            Carrier::SharedMemory(_) => None,
        }
    }

    pub fn is_peer_big_endian(&self) -> bool {
        self.peer_byte_order().is_some_and(ByteOrder::is_big)
    }

    /// Bound TCP address once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.carrier {
            Carrier::Socket { acceptor, .. } => acceptor.local_addr(),
            Carrier::SharedMemory(_) => None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Drop the peer and stop listening.
    pub fn close(&mut self) {
        if let Carrier::Socket { acceptor, session } = &mut self.carrier {
            if let Some(session) = session.take() {
                if let Err(err) = session.writer.get_ref().shutdown() {
                    debug!(error = %err, "peer stream already closed");
                }
            }
            acceptor.close();
        }
        if self.state != LinkState::Unconnected {
            if let Err(err) = self.state.transition(LinkState::Unconnected) {
                warn!(error = %err, "close left the state unchanged");
            }
        }
    }

    fn is_listening(&self) -> bool {
        match &self.carrier {
            Carrier::Socket { acceptor, .. } => acceptor.is_listening(),
            Carrier::SharedMemory(_) => true,
        }
    }

    fn observe_cancel(&mut self) -> Result<bool> {
        if !self.cancel.is_cancelled() {
            return Ok(false);
        }
        self.state.transition(LinkState::CancelRequested)?;
        debug!("connection wait cancelled before it started");
        Ok(true)
    }

    fn require_connected(&mut self) -> Result<()> {
        if !self.state.is_connected() {
            return Err(LinkError::NotConnected(self.state));
        }
        if let Carrier::SharedMemory(channel) = &self.carrier {
            if !channel.is_peer_connected()? {
                info!(endpoint = %self.endpoint, "peer detached");
                if channel.discard_unclaimed()? {
                    debug!("dropped a reply the departed peer never read");
                }
                self.state.transition(LinkState::Listening)?;
                return Err(LinkError::NotConnected(self.state));
            }
        }
        Ok(())
    }

    /// Tear down the session after a hard failure.
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !err.is_recoverable() && tears_down(&err) {
            warn!(endpoint = %self.endpoint, error = %err, kind = %err.kind(), "link broken");
            if let Carrier::Socket { session, .. } = &mut self.carrier {
                *session = None;
            }
            let next = if self.is_listening() {
                LinkState::Listening
            } else {
                LinkState::Unconnected
            };
            self.state.transition(next)?;
        }
        Err(err)
    }
}

/// Errors after which the socket stream can no longer be trusted.
fn tears_down(err: &LinkError) -> bool {
    !matches!(
        err,
        LinkError::Frame(
            FrameError::EmptyMessage
                | FrameError::InvalidMaxPacketSize { .. }
                | FrameError::MessageTooLarge { .. }
        )
    )
}

fn open_session(stream: WireStream, config: &LinkConfig) -> Result<SocketSession> {
    let peer = stream.peer_addr()?;
    let write_half = stream.try_clone()?;
    let packet = config.packet_config();
    // Reads poll in slices no longer than the read budget itself.
    let slice = config.io_timeout().min(config.read_timeout());
    let reader = PacketReader::with_config_wire(stream, packet.clone(), slice)?;
    let writer = PacketWriter::with_config_wire(write_half, packet, config.io_timeout())?;
    Ok(SocketSession {
        reader,
        writer,
        peer,
    })
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .field("peer", &self.peer_address())
            .field("local_addr", &self.local_addr())
            .finish()
    }
}
