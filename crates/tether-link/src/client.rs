use std::net::SocketAddr;

use tether_frame::{recv_message, send_message, ByteOrder, FrameError, PacketReader, PacketWriter};
use tether_transport::WireStream;
use tracing::info;

use crate::config::LinkConfig;
use crate::error::Result;
use crate::outcome::Received;
use crate::shm::ShmChannel;

/// The connecting side of a link.
///
/// Uses the same framing and chunking code as [`Connection`](crate::Connection),
/// so either end can be driven by this type in tests and tools.
pub struct Client {
    carrier: ClientCarrier,
}

enum ClientCarrier {
    Tcp {
        reader: PacketReader<WireStream>,
        writer: PacketWriter<WireStream>,
        peer: SocketAddr,
    },
    SharedMemory(ShmChannel),
}

impl Client {
    /// Connect to a listening [`Connection`](crate::Connection) over TCP.
    ///
    /// The connect is bounded by `accept_timeout_ms`; reads and writes use the
    /// same timeouts as the accepting side.
    pub fn connect_tcp(addr: SocketAddr, config: &LinkConfig) -> Result<Self> {
        config.validate()?;
        let stream = WireStream::connect_tcp(addr, config.accept_timeout())?;
        let write_half = stream.try_clone()?;
        let packet = config.packet_config();
        let slice = config.io_timeout().min(config.read_timeout());
        let reader = PacketReader::with_config_wire(stream, packet.clone(), slice)?;
        let writer = PacketWriter::with_config_wire(write_half, packet, config.io_timeout())?;
        info!(%addr, "client connected");
        Ok(Self {
            carrier: ClientCarrier::Tcp {
                reader,
                writer,
                peer: addr,
            },
        })
    }

    /// Attach to the shared segment for `key` and raise its ready flag.
    ///
    /// The chunk size is whatever the creating side published; the ready
    /// flag drops again when the client is dropped.
    pub fn attach_shared_memory(key: u32, config: &LinkConfig) -> Result<Self> {
        let channel = ShmChannel::attach(key, config.shm_wait_timeout())?;
        Ok(Self {
            carrier: ClientCarrier::SharedMemory(channel),
        })
    }

    /// Send one logical message. Returns the number of packets or chunks used.
    pub fn send(&mut self, message: &[u8]) -> Result<usize> {
        match &mut self.carrier {
            ClientCarrier::Tcp { writer, .. } => Ok(send_message(writer, message)?),
            ClientCarrier::SharedMemory(channel) => channel.send(message),
        }
    }

    /// Make sure the last sent message has left this side.
    ///
    /// TCP flushes the writer. Shared memory waits until the server has
    /// taken the final chunk, which must happen before the client is dropped.
    pub fn flush(&mut self) -> Result<()> {
        match &mut self.carrier {
            ClientCarrier::Tcp { writer, .. } => Ok(writer.flush()?),
            ClientCarrier::SharedMemory(channel) => channel.wait_drained(),
        }
    }

    /// Receive one logical message.
    pub fn receive(&mut self) -> Result<Received> {
        match &mut self.carrier {
            ClientCarrier::Tcp { reader, .. } => match recv_message(reader) {
                Ok(bytes) => Ok(Received::Message(bytes)),
                Err(FrameError::Timeout(_)) => Ok(Received::TimedOut),
                Err(err) => Err(err.into()),
            },
            ClientCarrier::SharedMemory(channel) => channel.receive(),
        }
    }

    /// Byte order the server writes in, once known.
    pub fn peer_byte_order(&self) -> Option<ByteOrder> {
        match &self.carrier {
            ClientCarrier::Tcp { reader, .. } => reader.peer_byte_order(),
            ClientCarrier::SharedMemory(_) => Some(ByteOrder::native()),
        }
    }

    /// Address of the server for TCP; `None` for shared memory.
    pub fn peer_address(&self) -> Option<SocketAddr> {
        match &self.carrier {
            ClientCarrier::Tcp { peer, .. } => Some(*peer),
            ClientCarrier::SharedMemory(_) => None,
        }
    }

    /// Largest packet (TCP) or chunk (shared memory) this client sends.
    pub fn max_packet_size(&self) -> usize {
        match &self.carrier {
            ClientCarrier::Tcp { writer, .. } => writer.config().max_packet_size,
            ClientCarrier::SharedMemory(channel) => channel.max_packet_size(),
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.carrier {
            ClientCarrier::Tcp { peer, .. } => f
                .debug_struct("Client")
                .field("carrier", &"tcp")
                .field("peer", peer)
                .finish(),
            ClientCarrier::SharedMemory(channel) => f
                .debug_struct("Client")
                .field("carrier", &"shm")
                .field("channel", channel)
                .finish(),
        }
    }
}
