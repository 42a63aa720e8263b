//! The relay core: one peer, one ordered queue, one background runtime.
//!
//! # Architecture
//!
//! ```text
//!  producer thread                      relay runtime (ServerSupervisor)
//! ┌─────────────────┐                 ┌──────────────────────────────────┐
//! │ SendCoordinator │  enqueue(p, t)  │ TransportLoop (accept loop)      │
//! │  exporter ──────┼──► SendQueue ───┼─► Session                        │
//! └─────────────────┘                 │     read loop  (log + discard)   │
//!          │ is_connected()           │     drain loop (one write/time)  │
//!          ▼                          └────────────┬─────────────────────┘
//!    ConnectionState ◄─────── connect/disconnect ──┘
//! ```
//!
//! [`ServerHandle`] bundles the shared pieces (connection state, queue,
//! lifecycle) so producers and pollers never touch globals.

pub mod connection;
pub mod coordinator;
pub mod queue;
pub mod session;
pub mod supervisor;
pub mod transport;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub use connection::{ConnectionState, PeerHandle};
pub use coordinator::SendCoordinator;
pub use queue::{Payload, SendQueue};
pub use supervisor::ServerSupervisor;

use crate::error::RelayError;

/// Lifecycle of the relay's background execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerLifecycle {
    /// Not running.
    Stopped = 0,
    /// Binding and spawning.
    Starting = 1,
    /// Accepting connections.
    Running = 2,
    /// Tearing down.
    Stopping = 3,
}

impl ServerLifecycle {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

#[derive(Debug)]
struct Shared {
    state: Arc<ConnectionState>,
    queue: Arc<SendQueue>,
    lifecycle: AtomicU8,
}

/// Cheap, cloneable handle to a relay's shared state.
///
/// Given to the send coordinator and to UI pollers. Stays valid across
/// server restarts.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    shared: Arc<Shared>,
}

impl ServerHandle {
    /// Handle with a queue of the given capacity, not attached to a server.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Arc::new(ConnectionState::new()),
                queue: Arc::new(SendQueue::new(queue_capacity)),
                lifecycle: AtomicU8::new(ServerLifecycle::Stopped as u8),
            }),
        }
    }

    /// Whether a peer is attached. Cheap enough to poll from a UI timer.
    pub fn is_connected(&self) -> bool {
        self.shared.state.is_connected()
    }

    /// The attached peer, if any.
    pub fn current_peer(&self) -> Option<PeerHandle> {
        self.shared.state.current_peer()
    }

    /// Queue a payload for the peer, waiting up to `timeout` for room.
    ///
    /// # Errors
    ///
    /// `EnqueueTimeout` or `Shutdown`, see [`SendQueue::enqueue`].
    pub fn enqueue(&self, payload: Payload, timeout: Duration) -> Result<(), RelayError> {
        self.shared.queue.enqueue(payload, timeout)
    }

    /// Current lifecycle stage.
    pub fn lifecycle(&self) -> ServerLifecycle {
        ServerLifecycle::from_u8(self.shared.lifecycle.load(Ordering::SeqCst))
    }

    /// The connection state.
    pub fn connection(&self) -> &Arc<ConnectionState> {
        &self.shared.state
    }

    /// The send queue.
    pub fn queue(&self) -> &Arc<SendQueue> {
        &self.shared.queue
    }

    pub(crate) fn set_lifecycle(&self, lifecycle: ServerLifecycle) {
        self.shared.lifecycle.store(lifecycle as u8, Ordering::SeqCst);
    }
}
