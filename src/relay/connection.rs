//! Connection state shared between the transport loop and its observers.
//!
//! Writers (the transport loop) serialize transitions through a mutex; the
//! connected flag is mirrored into an atomic so [`ConnectionState::is_connected`]
//! is a single load that never blocks, which is what a UI poller wants.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

/// Identity of the peer currently attached to the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerHandle {
    /// Monotonic id, unique per accepted connection within the process.
    pub id: u64,
    /// Remote socket address.
    pub addr: SocketAddr,
}

impl PeerHandle {
    /// Allocate a handle with a fresh id.
    pub fn next(addr: SocketAddr) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self {
            id: COUNTER.fetch_add(1, Ordering::Relaxed),
            addr,
        }
    }
}

impl std::fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer#{} ({})", self.id, self.addr)
    }
}

/// Whether a peer is attached, and which one.
pub struct ConnectionState {
    connected: AtomicBool,
    peer: Mutex<Option<PeerHandle>>,
    changes: watch::Sender<bool>,
}

impl std::fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionState")
            .field("connected", &self.is_connected())
            .field("peer", &self.current_peer())
            .finish()
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionState {
    /// New state, disconnected.
    pub fn new() -> Self {
        let (changes, _) = watch::channel(false);
        Self {
            connected: AtomicBool::new(false),
            peer: Mutex::new(None),
            changes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<PeerHandle>> {
        self.peer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach `peer`.
    ///
    /// If another peer was attached it is forced to disconnected first and
    /// returned, so the caller can account for it.
    pub fn set_connected(&self, peer: PeerHandle) -> Option<PeerHandle> {
        let mut slot = self.lock();
        let previous = slot.take();
        if let Some(prev) = previous {
            log::warn!("[Connection] {prev} superseded by {peer}");
            self.publish(false);
        }
        *slot = Some(peer);
        self.publish(true);
        log::info!("[Connection] Client connected: {peer}");
        previous
    }

    /// Detach whatever peer is attached.
    pub fn set_disconnected(&self) -> Option<PeerHandle> {
        let mut slot = self.lock();
        let previous = slot.take();
        if let Some(prev) = previous {
            self.publish(false);
            log::info!("[Connection] Client disconnected: {prev}");
        }
        previous
    }

    /// Detach the peer with `id`, but only if it is still the current one.
    ///
    /// Returns `false` when a different peer (or none) is attached.
    pub fn clear_peer(&self, id: u64) -> bool {
        let mut slot = self.lock();
        match *slot {
            Some(current) if current.id == id => {
                *slot = None;
                self.publish(false);
                log::info!("[Connection] Client disconnected: {current}");
                true
            }
            _ => false,
        }
    }

    /// Whether a peer is attached. Lock-free.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// The attached peer, if any.
    pub fn current_peer(&self) -> Option<PeerHandle> {
        *self.lock()
    }

    /// Watch connection changes from async code.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.changes.subscribe()
    }

    // Called with the peer lock held so the flag and the handle move together.
    fn publish(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        self.changes.send_replace(connected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(port: u16) -> PeerHandle {
        PeerHandle::next(SocketAddr::from(([127, 0, 0, 1], port)))
    }

    #[test]
    fn test_starts_disconnected() {
        let state = ConnectionState::new();
        assert!(!state.is_connected());
        assert_eq!(state.current_peer(), None);
    }

    #[test]
    fn test_connect_then_disconnect() {
        let state = ConnectionState::new();
        let p = peer(5000);
        assert_eq!(state.set_connected(p), None);
        assert!(state.is_connected());
        assert_eq!(state.current_peer(), Some(p));

        assert_eq!(state.set_disconnected(), Some(p));
        assert!(!state.is_connected());
        assert_eq!(state.set_disconnected(), None);
    }

    #[test]
    fn test_second_connect_supersedes_first() {
        let state = ConnectionState::new();
        let first = peer(5001);
        let second = peer(5002);
        state.set_connected(first);
        assert_eq!(state.set_connected(second), Some(first));
        assert_eq!(state.current_peer(), Some(second));
        assert!(state.is_connected());
    }

    #[test]
    fn test_stale_peer_cannot_clear_successor() {
        let state = ConnectionState::new();
        let first = peer(5003);
        let second = peer(5004);
        state.set_connected(first);
        state.set_connected(second);

        assert!(!state.clear_peer(first.id));
        assert_eq!(state.current_peer(), Some(second));

        assert!(state.clear_peer(second.id));
        assert!(!state.is_connected());
    }

    #[test]
    fn test_peer_ids_are_unique() {
        let a = peer(1);
        let b = peer(1);
        assert_ne!(a.id, b.id);
        assert!(a.to_string().starts_with("peer#"));
    }

    #[tokio::test]
    async fn test_subscribe_sees_transitions() {
        let state = ConnectionState::new();
        let mut rx = state.subscribe();
        assert!(!*rx.borrow_and_update());

        state.set_connected(peer(5005));
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());

        state.set_disconnected();
        rx.changed().await.unwrap();
        assert!(!*rx.borrow_and_update());
    }
}
