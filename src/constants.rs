//! Application-wide constants for scene-relay.
//!
//! Centralizes the fixed port, timeouts, capacities and intervals so the
//! relay, the supervisor and the binary agree on defaults.
//!
//! # Categories
//!
//! - **Network**: port and address probing
//! - **Timeouts**: enqueue, handshake and shutdown bounds
//! - **Queue**: send queue sizing
//! - **Polling**: status poller cadence

use std::time::Duration;

// ============================================================================
// Network
// ============================================================================

/// Port the relay listens on unless the caller overrides it.
pub const DEFAULT_PORT: u16 = 8765;

/// Address used to probe route selection when resolving the local address.
///
/// Nothing is ever sent to it: connecting a UDP socket only asks the OS which
/// interface it would route through.
pub const ROUTE_PROBE_ADDR: &str = "10.255.255.255:1";

/// URL scheme advertised to peers.
pub const URL_SCHEME: &str = "ws";

/// Name given to the relay runtime's worker threads.
pub const RUNTIME_THREAD_NAME: &str = "scene-relay";

/// Worker threads in the relay runtime (accept loop + one session).
pub const RUNTIME_WORKER_THREADS: usize = 2;

// ============================================================================
// Timeouts
// ============================================================================

/// How long `send()` waits for room in the queue before giving up.
pub const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `stop()` waits for the transport loop to exit.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on the WebSocket handshake of a freshly accepted socket.
///
/// The accept loop is blocked while a handshake runs, so a silent client
/// must not be able to stall it.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Time a closing session gets to flush its close frame.
pub const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_millis(500);

/// Time the accept loop waits for a superseded session to wind down
/// before aborting it.
pub const SUPERSEDE_TIMEOUT: Duration = Duration::from_secs(1);

/// Back-off after a failed `accept()`.
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

// ============================================================================
// Queue
// ============================================================================

/// Default number of payloads the send queue holds before producers wait.
///
/// Payloads are whole scene exports, so a small bound is plenty.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

// ============================================================================
// Polling
// ============================================================================

/// How often the status poller samples the connection flag.
pub const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Close code sent to a connection turned away because a peer is active
/// (1013, "try again later").
pub const CLOSE_CODE_TRY_AGAIN: u16 = 1013;
