//! Client identity, hub membership entries and lifecycle state.

use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

/// Unique identifier for a client connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(String);

impl ClientId {
    /// Create a client ID from an existing value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random client ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Create a bounded outbound queue.
///
/// The capacity is clamped to at least one slot.
#[must_use]
pub fn outbound_queue(capacity: usize) -> (mpsc::Sender<Bytes>, mpsc::Receiver<Bytes>) {
    mpsc::channel(capacity.max(1))
}

/// Outcome of offering a payload to a client's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The payload was queued.
    Queued,
    /// The queue is at capacity.
    Full,
    /// The queue's consumer is gone.
    Closed,
}

/// The hub's membership entry for a client.
///
/// Holds the producing end of the client's outbound queue. Dropping the last
/// handle closes the queue, which tells the client's write loop to shut down.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ClientId,
    outbound: mpsc::Sender<Bytes>,
}

impl ClientHandle {
    /// Create a handle around an outbound queue.
    #[must_use]
    pub fn new(id: ClientId, outbound: mpsc::Sender<Bytes>) -> Self {
        Self { id, outbound }
    }

    /// The client's ID.
    #[must_use]
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Offer a payload without waiting.
    pub fn try_deliver(&self, payload: Bytes) -> Delivery {
        match self.outbound.try_send(payload) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

/// Per-client connection state.
///
/// Transitions only move forward; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ClientState {
    Connecting = 0,
    Registered = 1,
    Closing = 2,
    Closed = 3,
}

impl ClientState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ClientState::Connecting,
            1 => ClientState::Registered,
            2 => ClientState::Closing,
            _ => ClientState::Closed,
        }
    }
}

/// Lifecycle tracker shared by a client's read and write loops.
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
    live_loops: AtomicU8,
}

impl Lifecycle {
    /// A lifecycle in `Connecting`, expecting two loops.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ClientState::Connecting as u8),
            live_loops: AtomicU8::new(2),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ClientState {
        ClientState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `next` if it is ahead of the current state.
    ///
    /// Returns `true` if the state changed.
    pub fn advance(&self, next: ClientState) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (next as u8 > current).then_some(next as u8)
            })
            .is_ok()
    }

    /// Record that one of the loops has exited.
    ///
    /// The first exit moves the client to `Closing`, the last to `Closed`.
    pub fn loop_finished(&self) {
        self.advance(ClientState::Closing);
        if self.live_loops.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.advance(ClientState::Closed);
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
