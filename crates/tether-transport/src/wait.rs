//! Capped waits on a condition shared with another process.
//!
//! Shared-memory peers have no wake primitive in common, so the protocol
//! synchronizes by watching a flag byte. The waiting strategy is isolated
//! behind [`FlagWait`] so a futex-style primitive can replace spinning
//! without changing what the peers observe.

use std::time::{Duration, Instant};

use crossbeam_utils::Backoff;

/// Strategy for waiting until a condition holds.
pub trait FlagWait {
    /// Wait until `ready` returns true or `cap` elapses.
    ///
    /// Returns `true` when the condition was observed, `false` on timeout.
    fn wait_until(&self, cap: Duration, ready: &mut dyn FnMut() -> bool) -> bool;
}

/// Busy-wait with progressive backoff (spin, then yield).
#[derive(Debug, Clone, Copy, Default)]
pub struct SpinWait;

impl FlagWait for SpinWait {
    fn wait_until(&self, cap: Duration, ready: &mut dyn FnMut() -> bool) -> bool {
        let start = Instant::now();
        let backoff = Backoff::new();
        loop {
            if ready() {
                return true;
            }
            if start.elapsed() > cap {
                // The peer may have moved between the last check and the deadline.
                return ready();
            }
            backoff.snooze();
        }
    }
}

/// Poll with a fixed sleep between checks.
///
/// Used where latency matters less than CPU, e.g. waiting for a peer to
/// attach to a segment.
#[derive(Debug, Clone, Copy)]
pub struct SleepPoll {
    interval: Duration,
}

impl SleepPoll {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl FlagWait for SleepPoll {
    fn wait_until(&self, cap: Duration, ready: &mut dyn FnMut() -> bool) -> bool {
        let start = Instant::now();
        loop {
            if ready() {
                return true;
            }
            if start.elapsed() > cap {
                return ready();
            }
            std::thread::sleep(self.interval);
        }
    }
}
