use std::io::{ErrorKind, Read};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tether_transport::WireStream;
use tracing::trace;

use crate::byteorder::ByteOrder;
use crate::codec::{decode_header, Packet, PacketConfig, HEADER_SIZE};
use crate::error::{FrameError, Result};

/// Reads complete packets from any `Read` stream.
///
/// Handles partial reads internally and records the sender's byte order
/// from every header it decodes.
pub struct PacketReader<T> {
    inner: T,
    config: PacketConfig,
    peer_order: Option<ByteOrder>,
}

impl<T: Read> PacketReader<T> {
    /// Create a new packet reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, PacketConfig::default())
    }

    /// Create a new packet reader with explicit configuration.
    pub fn with_config(inner: T, config: PacketConfig) -> Self {
        Self {
            inner,
            config,
            peer_order: None,
        }
    }

    /// Read the next complete packet (blocking, bounded by the read timeout).
    ///
    /// - nothing arrived within the budget → `FrameError::Timeout`
    /// - part of a header or payload arrived → `FrameError::ShortRead`
    /// - the peer closed the stream → `FrameError::ConnectionClosed`
    pub fn read_packet(&mut self) -> Result<Packet> {
        let mut raw = [0u8; HEADER_SIZE];
        let received = self.fill(&mut raw)?;
        if received == 0 {
            return Err(FrameError::Timeout(self.config.read_timeout));
        }
        if received < HEADER_SIZE {
            return Err(FrameError::ShortRead {
                expected: HEADER_SIZE,
                received,
            });
        }

        let (header, sender_order) = decode_header(self.config.byte_order, &raw)?;
        self.peer_order = Some(sender_order);

        let expected = header.payload_len as usize;
        let mut payload = BytesMut::zeroed(expected);
        let received = self.fill(&mut payload)?;
        if received < expected {
            return Err(FrameError::ShortRead { expected, received });
        }

        trace!(
            len = expected,
            remaining = header.fragments_remaining,
            sender = %sender_order,
            "read packet"
        );
        Ok(Packet {
            header,
            payload: payload.freeze(),
            sender_order,
        })
    }

    /// Read into `buf` until it is full or the read budget is spent.
    ///
    /// Returns how many bytes arrived. Stream-level timeouts are retried
    /// until the budget runs out.
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let budget = self.config.read_timeout;
        let start = Instant::now();
        let mut filled = 0usize;

        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) if filled == 0 => return Err(FrameError::ConnectionClosed),
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err)
                    if err.kind() == ErrorKind::WouldBlock
                        || err.kind() == ErrorKind::TimedOut => {}
                Err(err) => return Err(FrameError::Io(err)),
            }
            if filled < buf.len() && start.elapsed() >= budget {
                break;
            }
        }
        Ok(filled)
    }

    /// Byte order the peer used in the most recent header, if any arrived yet.
    pub fn peer_byte_order(&self) -> Option<ByteOrder> {
        self.peer_order
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update the read budget for subsequent packets.
    pub fn set_read_timeout(&mut self, read_timeout: Duration) {
        self.config.read_timeout = read_timeout;
    }

    /// Current packet reader configuration.
    pub fn config(&self) -> &PacketConfig {
        &self.config
    }
}

impl PacketReader<WireStream> {
    /// Create a packet reader for a `WireStream` and apply the per-call
    /// socket timeout (the slice the read budget is spent in).
    pub fn with_config_wire(
        inner: WireStream,
        config: PacketConfig,
        socket_timeout: Duration,
    ) -> Result<Self> {
        inner.set_read_timeout(Some(socket_timeout))?;
        Ok(Self::with_config(inner, config))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::codec::encode_packet;

    fn wire(order: ByteOrder, packets: &[(u16, &[u8])]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for (remaining, payload) in packets {
            encode_packet(order, *remaining, payload, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    fn short_budget() -> PacketConfig {
        PacketConfig {
            read_timeout: Duration::from_millis(50),
            ..PacketConfig::default()
        }
    }

    #[test]
    fn read_single_packet() {
        let bytes = wire(ByteOrder::native(), &[(0, b"hello")]);
        let mut reader = PacketReader::new(Cursor::new(bytes));
        let packet = reader.read_packet().unwrap();

        assert_eq!(packet.payload.as_ref(), b"hello");
        assert!(packet.header.is_final());
        assert_eq!(reader.peer_byte_order(), Some(ByteOrder::native()));
    }

    #[test]
    fn peer_order_unknown_until_first_packet() {
        let reader = PacketReader::new(Cursor::new(Vec::<u8>::new()));
        assert_eq!(reader.peer_byte_order(), None);
    }

    #[test]
    fn detects_opposite_endian_sender() {
        let foreign = ByteOrder::native().opposite();
        let bytes = wire(foreign, &[(3, b"abcd"), (0, b"ef")]);
        let mut reader = PacketReader::new(Cursor::new(bytes));

        let first = reader.read_packet().unwrap();
        assert_eq!(first.header.payload_len, 4);
        assert_eq!(first.header.fragments_remaining, 3);
        assert_eq!(first.sender_order, foreign);
        assert_eq!(reader.peer_byte_order(), Some(foreign));

        let second = reader.read_packet().unwrap();
        assert_eq!(second.payload.as_ref(), b"ef");
    }

    #[test]
    fn partial_read_handling() {
        let byte_reader = ByteByByteReader {
            bytes: wire(ByteOrder::Little, &[(0, b"slow")]),
            pos: 0,
        };
        let mut reader = PacketReader::with_config(
            byte_reader,
            PacketConfig {
                byte_order: ByteOrder::Little,
                ..PacketConfig::default()
            },
        );

        let packet = reader.read_packet().unwrap();
        assert_eq!(packet.payload.as_ref(), b"slow");
    }

    #[test]
    fn zero_length_payload_is_accepted() {
        let mut reader = PacketReader::new(Cursor::new(wire(ByteOrder::native(), &[(0, b"")])));
        let packet = reader.read_packet().unwrap();
        assert!(packet.payload.is_empty());
    }

    #[test]
    fn silent_stream_times_out() {
        let mut reader = PacketReader::with_config(AlwaysWouldBlock, short_budget());
        let start = Instant::now();
        let err = reader.read_packet().unwrap_err();
        assert!(matches!(err, FrameError::Timeout(_)));
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn partial_header_is_short_read() {
        let stalled = StallAfter {
            bytes: vec![1, 0, 4],
            pos: 0,
        };
        let mut reader = PacketReader::with_config(stalled, short_budget());
        let err = reader.read_packet().unwrap_err();
        assert!(matches!(
            err,
            FrameError::ShortRead {
                expected: HEADER_SIZE,
                received: 3
            }
        ));
    }

    #[test]
    fn truncated_payload_is_short_read() {
        let mut bytes = BytesMut::new();
        bytes.put_slice(&[1, 0, 16, 0, 0, 0]);
        bytes.put_slice(b"only-part");
        let stalled = StallAfter {
            bytes: bytes.to_vec(),
            pos: 0,
        };
        let mut reader = PacketReader::with_config(
            stalled,
            PacketConfig {
                byte_order: ByteOrder::Little,
                ..short_budget()
            },
        );
        let err = reader.read_packet().unwrap_err();
        assert!(matches!(
            err,
            FrameError::ShortRead {
                expected: 16,
                received: 9
            }
        ));
    }

    #[test]
    fn connection_closed_cleanly() {
        let mut reader = PacketReader::new(Cursor::new(Vec::<u8>::new()));
        let err = reader.read_packet().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn invalid_magic_in_stream() {
        let mut reader = PacketReader::new(Cursor::new(vec![0x12, 0x34, 0, 0, 0, 0]));
        let err = reader.read_packet().unwrap_err();
        assert!(matches!(err, FrameError::InvalidMagic(_)));
    }

    #[test]
    fn interrupted_read_retries() {
        let reader = InterruptedThenData {
            state: 0,
            bytes: wire(ByteOrder::native(), &[(0, b"ok")]),
            pos: 0,
        };
        let mut framed = PacketReader::new(reader);
        let packet = framed.read_packet().unwrap();
        assert_eq!(packet.payload.as_ref(), b"ok");
    }

    #[cfg(unix)]
    #[test]
    fn roundtrip_over_socket_pair() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = crate::writer::PacketWriter::new(left);
        let mut reader = PacketReader::new(right);

        writer.write_packet(b"ping", 0).unwrap();
        let packet = reader.read_packet().unwrap();
        assert_eq!(packet.payload.as_ref(), b"ping");
    }

    struct AlwaysWouldBlock;

    impl Read for AlwaysWouldBlock {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            std::thread::sleep(Duration::from_millis(5));
            Err(std::io::Error::from(ErrorKind::WouldBlock))
        }
    }

    /// Yields its bytes one at a time, then behaves like a silent socket.
    struct StallAfter {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for StallAfter {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                std::thread::sleep(Duration::from_millis(5));
                return Err(std::io::Error::from(ErrorKind::TimedOut));
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct InterruptedThenData {
        state: u8,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.state == 0 {
                self.state = 1;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            if self.pos >= self.bytes.len() {
                return Ok(0);
            }
            let remaining = self.bytes.len() - self.pos;
            let n = remaining.min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }
}
