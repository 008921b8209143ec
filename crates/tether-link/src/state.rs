//! Connection lifecycle and cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::error::{LinkError, Result};

/// Where a [`Connection`](crate::Connection) is in its lifecycle.
///
/// ```text
/// Unconnected ──bind──▶ Listening ──accept──▶ Connected
///      │                    │
///      └──cancel──▶ CancelRequested ◀──cancel
///                           │
///                 clear ────┴──▶ Unconnected / Listening
/// ```
///
/// A broken or closed peer sends `Connected` back to `Listening` or
/// `Unconnected`. Cancellation only affects waits, so a connected link
/// never enters `CancelRequested`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Unconnected,
    Listening,
    Connected,
    CancelRequested,
}

impl LinkState {
    /// Whether moving from `self` to `next` is a legal step.
    pub fn can_transition_to(self, next: LinkState) -> bool {
        use LinkState::*;
        matches!(
            (self, next),
            (Unconnected, Listening)
                | (Unconnected, Connected)
                | (Unconnected, CancelRequested)
                | (Listening, Connected)
                | (Listening, CancelRequested)
                | (Listening, Unconnected)
                | (Connected, Listening)
                | (Connected, Unconnected)
                | (CancelRequested, Unconnected)
                | (CancelRequested, Listening)
        )
    }

    /// Validated transition. Staying in the same state is always allowed.
    pub fn transition(&mut self, next: LinkState) -> Result<()> {
        if *self == next {
            return Ok(());
        }
        if !self.can_transition_to(next) {
            return Err(LinkError::InvalidTransition {
                from: *self,
                to: next,
            });
        }
        tracing::debug!(from = %self, to = %next, "link state change");
        *self = next;
        Ok(())
    }

    pub fn is_connected(self) -> bool {
        self == LinkState::Connected
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LinkState::Unconnected => "unconnected",
            LinkState::Listening => "listening",
            LinkState::Connected => "connected",
            LinkState::CancelRequested => "cancel_requested",
        }
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shareable cancel switch for connection waits.
///
/// Setting it makes the next poll slice of an accept or shared-memory
/// connect wait return `Cancelled`. A slice already in progress runs out
/// first.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }
}
