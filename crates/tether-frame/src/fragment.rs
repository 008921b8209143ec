//! Splitting logical messages into packets and stitching them back together.
//!
//! A message of `L` bytes with fragment capacity `C` travels as
//! `ceil(L / C)` packets. The `fragments_remaining` field counts down from
//! `count - 1` to 0; the packet carrying 0 ends the message. There is no
//! other boundary marker on the wire.

use std::io::{Read, Write};

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::codec::payload_capacity;
use crate::error::{FrameError, Result};
use crate::reader::PacketReader;
use crate::writer::PacketWriter;

/// Most fragments one message may span (count-down field is 16 bits).
pub const MAX_FRAGMENTS: usize = u16::MAX as usize + 1;

/// Upper bound on the reassembly buffer reserved up front from a header.
const PREALLOC_LIMIT: usize = 1 << 20;

/// Payload bytes per fragment for `max_packet_size`.
pub fn fragment_capacity(max_packet_size: usize) -> Result<usize> {
    payload_capacity(max_packet_size)
}

/// Number of fragments a message of `len` bytes needs.
pub fn fragment_count(len: usize, capacity: usize) -> usize {
    if capacity == 0 {
        return 0;
    }
    len.div_ceil(capacity)
}

/// Iterator over `(chunk, fragments_remaining)` pairs for one message.
#[derive(Debug, Clone)]
pub struct Fragments<'a> {
    rest: &'a [u8],
    capacity: usize,
    remaining: usize,
}

impl<'a> Fragments<'a> {
    /// Plan the fragments of `message`.
    pub fn new(message: &'a [u8], max_packet_size: usize) -> Result<Self> {
        if message.is_empty() {
            return Err(FrameError::EmptyMessage);
        }
        let capacity = fragment_capacity(max_packet_size)?;
        let count = fragment_count(message.len(), capacity);
        if count > MAX_FRAGMENTS {
            return Err(FrameError::MessageTooLarge {
                len: message.len(),
                fragments: count,
                max: MAX_FRAGMENTS,
            });
        }
        Ok(Self {
            rest: message,
            capacity,
            remaining: count,
        })
    }

    /// Fragments not yet yielded.
    pub fn count_left(&self) -> usize {
        self.remaining
    }
}

impl<'a> Iterator for Fragments<'a> {
    type Item = (&'a [u8], u16);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let take = self.rest.len().min(self.capacity);
        let (chunk, rest) = self.rest.split_at(take);
        self.rest = rest;
        self.remaining -= 1;
        // remaining < MAX_FRAGMENTS here, so it fits the field
        Some((chunk, self.remaining as u16))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Fragments<'_> {}

/// Send one logical message, fragmenting by the writer's max packet size.
///
/// Returns the number of packets written. Nothing is written for an empty
/// message or an invalid packet size.
pub fn send_message<W: Write>(writer: &mut PacketWriter<W>, message: &[u8]) -> Result<usize> {
    let fragments = Fragments::new(message, writer.config().max_packet_size)?;
    let count = fragments.len();
    for (chunk, remaining) in fragments {
        writer.write_packet(chunk, remaining)?;
    }
    debug!(len = message.len(), fragments = count, "sent message");
    Ok(count)
}

/// Receive one logical message.
///
/// A failure before the first packet is returned as is (a `Timeout` here
/// leaves the stream usable). Any failure after that discards the partial
/// message and is wrapped in `IncompleteMessage`.
pub fn recv_message<R: Read>(reader: &mut PacketReader<R>) -> Result<Bytes> {
    let first = reader.read_packet()?;
    if first.header.is_final() {
        debug!(len = first.payload.len(), fragments = 1, "received message");
        return Ok(first.payload);
    }

    let capacity = (first.payload.len() * (first.header.fragments_remaining as usize + 1))
        .min(PREALLOC_LIMIT);
    let mut acc = BytesMut::with_capacity(capacity);
    acc.extend_from_slice(&first.payload);
    let mut expected = first.header.fragments_remaining;
    let mut fragments = 1usize;

    while expected > 0 {
        expected -= 1;
        let packet = reader
            .read_packet()
            .map_err(|source| FrameError::IncompleteMessage {
                fragments,
                bytes: acc.len(),
                source: Box::new(source),
            })?;
        if packet.header.fragments_remaining != expected {
            return Err(FrameError::OutOfSequence {
                expected,
                got: packet.header.fragments_remaining,
            });
        }
        acc.extend_from_slice(&packet.payload);
        fragments += 1;
    }

    debug!(len = acc.len(), fragments, "received message");
    Ok(acc.freeze())
}
