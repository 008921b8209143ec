use std::io::{ErrorKind, Write};
use std::time::Duration;

use bytes::BytesMut;
use tether_transport::WireStream;
use tracing::trace;

use crate::byteorder::ByteOrder;
use crate::codec::{encode_packet, PacketConfig, HEADER_SIZE};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete packets to any `Write` stream.
pub struct PacketWriter<T> {
    inner: T,
    buf: BytesMut,
    config: PacketConfig,
}

impl<T: Write> PacketWriter<T> {
    /// Create a new packet writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, PacketConfig::default())
    }

    /// Create a new packet writer with explicit configuration.
    pub fn with_config(inner: T, config: PacketConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encode and transmit one packet (blocking).
    ///
    /// Either all `payload.len() + 6` bytes reach the stream or the call
    /// fails with `ShortWrite`; the stream is out of sync after a failure.
    pub fn write_packet(&mut self, payload: &[u8], fragments_remaining: u16) -> Result<()> {
        if payload.len() + HEADER_SIZE > self.config.max_packet_size {
            return Err(FrameError::InvalidMaxPacketSize {
                size: payload.len() + HEADER_SIZE,
                min: HEADER_SIZE + 1,
                max: self.config.max_packet_size,
            });
        }

        self.buf.clear();
        encode_packet(self.config.byte_order, fragments_remaining, payload, &mut self.buf)?;

        let expected = self.buf.len();
        let mut written = 0usize;
        while written < expected {
            match self.inner.write(&self.buf[written..]) {
                Ok(0) => return Err(FrameError::ShortWrite { expected, written }),
                Ok(n) => written += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if written == 0 && !is_timeout(&err) => return Err(FrameError::Io(err)),
                Err(err) => {
                    trace!(error = %err, written, expected, "packet write stalled");
                    return Err(FrameError::ShortWrite { expected, written });
                }
            }
        }

        trace!(len = payload.len(), remaining = fragments_remaining, "wrote packet");
        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Byte order this writer encodes header words in.
    pub fn byte_order(&self) -> ByteOrder {
        self.config.byte_order
    }

    /// Current packet writer configuration.
    pub fn config(&self) -> &PacketConfig {
        &self.config
    }
}

impl PacketWriter<WireStream> {
    /// Create a packet writer for a `WireStream` and apply the socket write timeout.
    pub fn with_config_wire(
        inner: WireStream,
        config: PacketConfig,
        socket_timeout: Duration,
    ) -> Result<Self> {
        inner.set_write_timeout(Some(socket_timeout))?;
        Ok(Self::with_config(inner, config))
    }
}

fn is_timeout(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::codec::decode_header;

    fn native_config(max_packet_size: usize) -> PacketConfig {
        PacketConfig {
            max_packet_size,
            ..PacketConfig::default()
        }
    }

    #[test]
    fn write_single_packet() {
        let mut writer = PacketWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.write_packet(b"hello", 0).unwrap();

        let wire = writer.into_inner().into_inner();
        assert_eq!(wire.len(), HEADER_SIZE + 5);
        let raw: [u8; HEADER_SIZE] = wire[..HEADER_SIZE].try_into().unwrap();
        let (header, sender) = decode_header(ByteOrder::native(), &raw).unwrap();
        assert_eq!(sender, ByteOrder::native());
        assert_eq!(header.payload_len, 5);
        assert!(header.is_final());
        assert_eq!(&wire[HEADER_SIZE..], b"hello");
    }

    #[test]
    fn writes_in_configured_byte_order() {
        let cfg = PacketConfig {
            byte_order: ByteOrder::Big,
            ..PacketConfig::default()
        };
        let mut writer = PacketWriter::with_config(Cursor::new(Vec::<u8>::new()), cfg);
        writer.write_packet(b"z", 5).unwrap();

        let wire = writer.into_inner().into_inner();
        assert_eq!(&wire[..HEADER_SIZE], &[0, 1, 0, 1, 0, 5]);
    }

    #[test]
    fn packet_larger_than_max_is_rejected() {
        let mut writer =
            PacketWriter::with_config(Cursor::new(Vec::<u8>::new()), native_config(10));
        let err = writer.write_packet(b"12345", 0).unwrap_err();
        assert!(matches!(err, FrameError::InvalidMaxPacketSize { .. }));
        assert!(writer.into_inner().into_inner().is_empty());
    }

    #[test]
    fn partial_writes_are_completed() {
        let mut writer = PacketWriter::new(TrickleWriter::default());
        writer.write_packet(b"trickle", 1).unwrap();
        assert_eq!(writer.get_ref().data.len(), HEADER_SIZE + 7);
    }

    #[test]
    fn zero_byte_write_is_short_write() {
        let mut writer = PacketWriter::new(ClosedAfter {
            budget: 4,
            written: 0,
        });
        let err = writer.write_packet(b"payload", 0).unwrap_err();
        assert!(matches!(
            err,
            FrameError::ShortWrite {
                expected: 13,
                written: 4
            }
        ));
    }

    #[test]
    fn stalled_write_is_short_write() {
        let mut writer = PacketWriter::new(StallAfter {
            budget: 8,
            written: 0,
        });
        let err = writer.write_packet(b"payload", 0).unwrap_err();
        assert!(matches!(
            err,
            FrameError::ShortWrite {
                expected: 13,
                written: 8
            }
        ));
    }

    #[test]
    fn flush_propagates() {
        let sink = FlushTrackingWriter::default();
        let flag = Arc::clone(&sink.flushed);
        let mut writer = PacketWriter::new(sink);
        writer.write_packet(b"x", 0).unwrap();
        assert!(flag.load(Ordering::SeqCst));
    }

    #[derive(Default)]
    struct TrickleWriter {
        data: Vec<u8>,
    }

    impl Write for TrickleWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let n = buf.len().min(3);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ClosedAfter {
        budget: usize,
        written: usize,
    }

    impl Write for ClosedAfter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let n = buf.len().min(self.budget - self.written);
            self.written += n;
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct StallAfter {
        budget: usize,
        written: usize,
    }

    impl Write for StallAfter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.written >= self.budget {
                return Err(std::io::Error::from(ErrorKind::WouldBlock));
            }
            let n = buf.len().min(self.budget - self.written);
            self.written += n;
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FlushTrackingWriter {
        flushed: Arc<AtomicBool>,
    }

    impl Write for FlushTrackingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }
}
