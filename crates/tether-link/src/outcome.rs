use bytes::Bytes;

/// Result of a receive call that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// One complete logical message.
    Message(Bytes),
    /// Nothing arrived within the allotted window; the connection is intact.
    TimedOut,
}

impl Received {
    pub fn into_message(self) -> Option<Bytes> {
        match self {
            Received::Message(bytes) => Some(bytes),
            Received::TimedOut => None,
        }
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, Received::TimedOut)
    }
}

/// Result of an accept or connect poll that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    /// No peer yet; call again.
    Pending,
    /// A cancel request ended the wait.
    Cancelled,
}

impl ConnectOutcome {
    pub fn is_connected(self) -> bool {
        self == ConnectOutcome::Connected
    }
}
