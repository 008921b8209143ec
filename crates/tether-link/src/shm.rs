//! Message exchange over a shared segment, synchronized by the transfer flag.
//!
//! One side (the listener) creates the segment; the other (the peer)
//! attaches to it and raises the ready flag. A sender waits for the flag to
//! read idle, copies at most `max_packet_size` bytes into the payload region,
//! fills in the chunk descriptor and sets the flag to the receiver's value.
//! The receiver copies the chunk out and drops the flag back to idle. The
//! flag is the only lock, so the channel is half-duplex: callers alternate
//! between sending and receiving.

use std::time::Duration;

use bytes::BytesMut;
use tether_frame::layout::{segment_size, ChunkDescriptor, SegmentView, TransferFlag};
use tether_frame::FrameError;
use tether_transport::{segment_name, FlagWait, SharedSegment, SpinWait};
use tracing::{debug, info, warn};

use crate::error::{LinkError, Result};
use crate::outcome::Received;

/// Upper bound on the receive buffer reserved up front from a descriptor.
const PREALLOC_LIMIT: usize = 1 << 20;

/// Which end of the segment this channel is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmRole {
    /// Created the segment; writes with flag 2, reads flag 1.
    Listener,
    /// Attached to an existing segment; writes with flag 1, reads flag 2.
    Peer,
}

impl ShmRole {
    fn outgoing(self) -> TransferFlag {
        match self {
            ShmRole::Listener => TransferFlag::ToPeer,
            ShmRole::Peer => TransferFlag::ToListener,
        }
    }

    fn incoming(self) -> TransferFlag {
        match self {
            ShmRole::Listener => TransferFlag::ToListener,
            ShmRole::Peer => TransferFlag::ToPeer,
        }
    }
}

/// One end of a shared-memory message channel.
pub struct ShmChannel<W = SpinWait> {
    segment: SharedSegment,
    role: ShmRole,
    max_packet_size: usize,
    wait_cap: Duration,
    waiter: W,
}

impl ShmChannel<SpinWait> {
    /// Create the segment for `key` and initialize its header.
    pub fn create(key: u32, max_packet_size: usize, wait_cap: Duration) -> Result<Self> {
        Self::create_with(key, max_packet_size, wait_cap, SpinWait)
    }

    /// Attach to the segment for `key` and announce this side as connected.
    pub fn attach(key: u32, wait_cap: Duration) -> Result<Self> {
        Self::attach_with(key, wait_cap, SpinWait)
    }
}

impl<W: FlagWait> ShmChannel<W> {
    /// [`ShmChannel::create`] with an explicit waiting strategy.
    pub fn create_with(
        key: u32,
        max_packet_size: usize,
        wait_cap: Duration,
        waiter: W,
    ) -> Result<Self> {
        let name = segment_name(key);
        let segment = SharedSegment::create(&name, segment_size(max_packet_size))?;
        {
            let view = SegmentView::new(&segment);
            view.set_peer_connected(false)?;
            view.set_max_packet_size(max_packet_size)?;
            view.set_transfer_flag(TransferFlag::Idle)?;
        }
        info!(segment = %name, max_packet_size, "shared-memory channel created");
        Ok(Self {
            segment,
            role: ShmRole::Listener,
            max_packet_size,
            wait_cap,
            waiter,
        })
    }

    /// [`ShmChannel::attach`] with an explicit waiting strategy.
    ///
    /// The packet size comes from the segment, not from local configuration.
    pub fn attach_with(key: u32, wait_cap: Duration, waiter: W) -> Result<Self> {
        let name = segment_name(key);
        let segment = SharedSegment::open(&name)?;
        let max_packet_size = {
            let view = SegmentView::new(&segment);
            let size = view.max_packet_size()?;
            if size == 0 || segment_size(size) > segment.len() {
                return Err(LinkError::Protocol(format!(
                    "segment {name} announces max packet size {size} but holds {} bytes",
                    segment.len()
                )));
            }
            // Anything a departed peer left in flight is not addressed to us.
            let stale = view.transfer_flag_raw()?;
            if stale != TransferFlag::Idle as u8 {
                debug!(segment = %name, flag = stale, "cleared stale transfer flag");
                view.set_transfer_flag(TransferFlag::Idle)?;
            }
            view.set_peer_connected(true)?;
            size
        };
        info!(segment = %name, max_packet_size, "attached to shared-memory channel");
        Ok(Self {
            segment,
            role: ShmRole::Peer,
            max_packet_size,
            wait_cap,
            waiter,
        })
    }

    pub fn role(&self) -> ShmRole {
        self.role
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    pub fn segment_name(&self) -> &str {
        self.segment.name()
    }

    fn view(&self) -> SegmentView<'_> {
        SegmentView::new(&self.segment)
    }

    /// Whether the attached side has raised the ready flag.
    pub fn is_peer_connected(&self) -> Result<bool> {
        Ok(self.view().is_peer_connected()?)
    }

    /// Take back a chunk this side published that nobody consumed.
    ///
    /// Only this side's own outgoing value is cleared, so a chunk the other
    /// side has already queued survives. Returns whether anything was dropped.
    pub fn discard_unclaimed(&self) -> Result<bool> {
        let view = self.view();
        if view.transfer_flag_raw()? != self.role.outgoing() as u8 {
            return Ok(false);
        }
        view.set_transfer_flag(TransferFlag::Idle)?;
        debug!(segment = %self.segment.name(), "discarded unclaimed chunk");
        Ok(true)
    }

    /// Wait up to the cap for the transfer flag to read `flag`.
    fn wait_for(&self, flag: TransferFlag) -> Result<bool> {
        let view = self.view();
        let mut failure = None;
        let seen = self.waiter.wait_until(self.wait_cap, &mut || {
            match view.transfer_flag_raw() {
                Ok(raw) => raw == flag as u8,
                Err(err) => {
                    failure = Some(err);
                    true
                }
            }
        });
        match failure {
            Some(err) => Err(err.into()),
            None => Ok(seen),
        }
    }

    /// Send one logical message as a sequence of chunks.
    ///
    /// Returns the number of chunks written. Every chunk waits for the
    /// channel to drain first; a wait past the cap is `PeerUnresponsive`.
    pub fn send(&self, message: &[u8]) -> Result<usize> {
        if message.is_empty() {
            return Err(FrameError::EmptyMessage.into());
        }
        if i32::try_from(message.len()).is_err() {
            return Err(FrameError::MessageTooLarge {
                len: message.len(),
                fragments: message.len().div_ceil(self.max_packet_size),
                max: i32::MAX as usize / self.max_packet_size,
            }
            .into());
        }

        let view = self.view();
        let mut chunks = 0usize;
        for chunk in message.chunks(self.max_packet_size) {
            if !self.wait_for(TransferFlag::Idle)? {
                return Err(LinkError::PeerUnresponsive {
                    waited: self.wait_cap,
                    stage: "waiting for the channel to drain",
                });
            }
            view.write_chunk(chunk, message.len())?;
            view.set_transfer_flag(self.role.outgoing())?;
            chunks += 1;
            debug!(len = chunk.len(), chunk = chunks, total = message.len(), "queued chunk");
        }
        debug!(len = message.len(), chunks, "sent message over shared memory");
        Ok(chunks)
    }

    /// Wait until the peer has taken the last chunk this side published.
    ///
    /// Detaching before that drops the message, since the ready flag falls
    /// with the channel.
    pub fn wait_drained(&self) -> Result<()> {
        if self.wait_for(TransferFlag::Idle)? {
            return Ok(());
        }
        Err(LinkError::PeerUnresponsive {
            waited: self.wait_cap,
            stage: "waiting for the last chunk to be taken",
        })
    }

    /// Receive one logical message.
    ///
    /// No chunk within the cap is `TimedOut`. Once the first chunk has been
    /// taken, a stall is `PeerUnresponsive` and the partial message is lost.
    pub fn receive(&self) -> Result<Received> {
        let incoming = self.role.incoming();
        if !self.wait_for(incoming)? {
            return Ok(Received::TimedOut);
        }

        let view = self.view();
        let first = view.read_descriptor()?;
        let (_, total) = first.validate(self.max_packet_size)?;
        if total == 0 {
            return Err(LinkError::Protocol("announced an empty message".to_string()));
        }
        let mut acc = BytesMut::with_capacity(total.min(PREALLOC_LIMIT));
        self.take_chunk(&first, total, &mut acc)?;

        while acc.len() < total {
            if !self.wait_for(incoming)? {
                return Err(LinkError::PeerUnresponsive {
                    waited: self.wait_cap,
                    stage: "waiting for the next chunk",
                });
            }
            let descriptor = view.read_descriptor()?;
            self.take_chunk(&descriptor, total, &mut acc)?;
        }

        debug!(len = total, "received message over shared memory");
        Ok(Received::Message(acc.freeze()))
    }

    /// Copy the published chunk into `acc` and hand the region back.
    fn take_chunk(
        &self,
        descriptor: &ChunkDescriptor,
        total: usize,
        acc: &mut BytesMut,
    ) -> Result<()> {
        let (len, announced) = descriptor.validate(self.max_packet_size)?;
        if announced != total {
            return Err(LinkError::Protocol(format!(
                "total length changed mid-message ({total} -> {announced})"
            )));
        }
        if len == 0 || acc.len() + len > total {
            return Err(LinkError::Protocol(format!(
                "chunk of {len} bytes does not fit {} of {total} received",
                acc.len()
            )));
        }

        let start = acc.len();
        acc.resize(start + len, 0);
        let view = self.view();
        view.read_chunk(descriptor, &mut acc[start..])?;
        view.set_transfer_flag(TransferFlag::Idle)?;
        Ok(())
    }
}

impl<W> Drop for ShmChannel<W> {
    fn drop(&mut self) {
        if self.role == ShmRole::Peer {
            if let Err(err) = SegmentView::new(&self.segment).set_peer_connected(false) {
                warn!(segment = %self.segment.name(), error = %err, "failed to lower ready flag");
            }
        }
    }
}

impl<W> std::fmt::Debug for ShmChannel<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmChannel")
            .field("segment", &self.segment.name())
            .field("role", &self.role)
            .field("max_packet_size", &self.max_packet_size)
            .field("wait_cap", &self.wait_cap)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;
    use std::time::Instant;

    use tether_transport::SleepPoll;

    use super::*;

    const CAP: Duration = Duration::from_millis(200);

    fn unique_key() -> u32 {
        static NEXT: AtomicU32 = AtomicU32::new(0);
        ((std::process::id() & 0x3fff) << 16) | (NEXT.fetch_add(1, Ordering::Relaxed) & 0xffff)
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    #[test]
    fn attach_raises_and_drop_lowers_ready_flag() {
        let key = unique_key();
        let listener = ShmChannel::create(key, 64, CAP).unwrap();
        assert!(!listener.is_peer_connected().unwrap());

        let peer = ShmChannel::attach(key, CAP).unwrap();
        assert_eq!(peer.role(), ShmRole::Peer);
        assert_eq!(peer.max_packet_size(), 64);
        assert!(listener.is_peer_connected().unwrap());

        drop(peer);
        assert!(!listener.is_peer_connected().unwrap());
    }

    #[test]
    fn attach_to_missing_segment_fails() {
        let err = ShmChannel::attach(unique_key(), CAP).unwrap_err();
        assert_eq!(err.kind(), crate::FailureKind::ResourceFailure);
    }

    #[test]
    fn multi_chunk_exchange_both_directions() {
        let key = unique_key();
        let listener = ShmChannel::create(key, 100, CAP).unwrap();
        let request = pattern(1_050);
        let reply = pattern(333);

        let expected_request = request.clone();
        let reply_clone = reply.clone();
        let handle = thread::spawn(move || {
            let peer = ShmChannel::attach(key, CAP).unwrap();
            assert_eq!(peer.send(&expected_request).unwrap(), 11);
            let got = loop {
                match peer.receive().unwrap() {
                    Received::Message(bytes) => break bytes,
                    Received::TimedOut => continue,
                }
            };
            assert_eq!(got.as_ref(), reply_clone.as_slice());
        });

        let got = loop {
            match listener.receive().unwrap() {
                Received::Message(bytes) => break bytes,
                Received::TimedOut => continue,
            }
        };
        assert_eq!(got.as_ref(), request.as_slice());
        assert_eq!(listener.send(&reply).unwrap(), 4);
        handle.join().unwrap();
    }

    #[test]
    fn wait_drained_tracks_the_last_chunk() {
        let key = unique_key();
        let listener = ShmChannel::create(key, 64, CAP).unwrap();
        let peer = ShmChannel::attach(key, Duration::from_millis(50)).unwrap();

        peer.wait_drained().unwrap();
        peer.send(b"ping").unwrap();
        let err = peer.wait_drained().unwrap_err();
        assert_eq!(err.kind(), crate::FailureKind::PeerUnresponsive);

        assert_eq!(
            listener.receive().unwrap(),
            Received::Message(bytes::Bytes::from_static(b"ping"))
        );
        peer.wait_drained().unwrap();
    }

    #[test]
    fn attach_clears_what_a_departed_peer_left_behind() {
        let key = unique_key();
        let listener = ShmChannel::create(key, 64, Duration::from_millis(50)).unwrap();

        let first = ShmChannel::attach(key, CAP).unwrap();
        first.send(b"request").unwrap();
        assert_eq!(
            listener.receive().unwrap(),
            Received::Message(bytes::Bytes::from_static(b"request"))
        );
        listener.send(b"reply for the first peer").unwrap();
        drop(first);

        let second = ShmChannel::attach(key, Duration::from_millis(50)).unwrap();
        assert_eq!(second.receive().unwrap(), Received::TimedOut);
        second.send(b"fresh").unwrap();
        assert_eq!(
            listener.receive().unwrap(),
            Received::Message(bytes::Bytes::from_static(b"fresh"))
        );
    }

    #[test]
    fn discard_unclaimed_only_takes_back_own_chunks() {
        let key = unique_key();
        let listener = ShmChannel::create(key, 64, CAP).unwrap();
        let peer = ShmChannel::attach(key, CAP).unwrap();

        listener.send(b"never read").unwrap();
        assert!(listener.discard_unclaimed().unwrap());
        assert!(!listener.discard_unclaimed().unwrap());
        assert_eq!(peer.receive().unwrap(), Received::TimedOut);

        peer.send(b"queued").unwrap();
        assert!(!listener.discard_unclaimed().unwrap());
        assert_eq!(
            listener.receive().unwrap(),
            Received::Message(bytes::Bytes::from_static(b"queued"))
        );
    }

    #[test]
    fn silent_peer_times_out() {
        let listener = ShmChannel::create(unique_key(), 64, Duration::from_millis(50)).unwrap();
        let start = Instant::now();
        assert_eq!(listener.receive().unwrap(), Received::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn undrained_channel_is_peer_unresponsive() {
        let key = unique_key();
        let listener = ShmChannel::create(key, 16, Duration::from_millis(50)).unwrap();
        let _peer = ShmChannel::attach(key, CAP).unwrap();

        let err = listener.send(&pattern(40)).unwrap_err();
        assert!(matches!(err, LinkError::PeerUnresponsive { .. }));
    }

    #[test]
    fn stall_after_first_chunk_is_peer_unresponsive() {
        let key = unique_key();
        let listener = ShmChannel::create(key, 16, Duration::from_millis(50)).unwrap();
        let raw = SharedSegment::open(&segment_name(key)).unwrap();
        let view = SegmentView::new(&raw);
        view.write_chunk(&[1u8; 16], 48).unwrap();
        view.set_transfer_flag(TransferFlag::ToListener).unwrap();

        let err = listener.receive().unwrap_err();
        assert!(matches!(err, LinkError::PeerUnresponsive { .. }));
        assert_eq!(view.transfer_flag().unwrap(), TransferFlag::Idle);
    }

    #[test]
    fn receiver_never_sees_oversized_chunks() {
        let key = unique_key();
        let listener = ShmChannel::create(key, 32, CAP).unwrap();
        let message = pattern(32 * 9 + 5);

        let to_send = message.clone();
        let sender = thread::spawn(move || listener.send(&to_send).unwrap());

        let raw = SharedSegment::open(&segment_name(key)).unwrap();
        let view = SegmentView::new(&raw);
        let mut acc = Vec::new();
        let mut lens = Vec::new();
        while acc.len() < message.len() {
            let ready = SleepPoll::new(Duration::from_micros(50))
                .wait_until(CAP, &mut || view.transfer_flag().ok() == Some(TransferFlag::ToPeer));
            assert!(ready);
            let descriptor = view.read_descriptor().unwrap();
            assert_eq!(descriptor.offset, 20);
            assert_eq!(descriptor.total as usize, message.len());
            lens.push(descriptor.len);
            let mut chunk = vec![0u8; descriptor.len as usize];
            view.read_chunk(&descriptor, &mut chunk).unwrap();
            acc.extend_from_slice(&chunk);
            view.set_transfer_flag(TransferFlag::Idle).unwrap();
        }

        assert_eq!(sender.join().unwrap(), 10);
        assert!(lens.iter().all(|len| *len as usize <= 32));
        assert_eq!(acc, message);
    }

    #[test]
    fn empty_message_leaves_channel_idle() {
        let key = unique_key();
        let listener = ShmChannel::create(key, 64, CAP).unwrap();
        let err = listener.send(b"").unwrap_err();
        assert!(matches!(err, LinkError::Frame(FrameError::EmptyMessage)));
        assert_eq!(listener.view().transfer_flag().unwrap(), TransferFlag::Idle);
    }

    #[test]
    fn corrupt_descriptor_is_protocol_error() {
        let key = unique_key();
        let listener = ShmChannel::create(key, 64, CAP).unwrap();
        let raw = SharedSegment::open(&segment_name(key)).unwrap();
        raw.write_i32(tether_frame::layout::CHUNK_LEN, 10).unwrap();
        raw.write_i32(tether_frame::layout::CHUNK_OFFSET, 24).unwrap();
        raw.write_i32(tether_frame::layout::TOTAL_LEN, 10).unwrap();
        SegmentView::new(&raw)
            .set_transfer_flag(TransferFlag::ToListener)
            .unwrap();

        let err = listener.receive().unwrap_err();
        assert_eq!(err.kind(), crate::FailureKind::Protocol);
    }

    #[test]
    fn sleep_poll_waiter_is_interchangeable() {
        let key = unique_key();
        let waiter = SleepPoll::new(Duration::from_millis(1));
        let listener = ShmChannel::create_with(key, 64, CAP, waiter).unwrap();
        let peer = ShmChannel::attach(key, CAP).unwrap();

        peer.send(b"polled").unwrap();
        assert_eq!(
            listener.receive().unwrap(),
            Received::Message(bytes::Bytes::from_static(b"polled"))
        );
    }
}
