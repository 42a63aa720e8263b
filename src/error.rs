//! Error taxonomy for the relay core.
//!
//! Transport variants (`AcceptFailed`, `Handshake`, `PeerRead`, `PeerWrite`)
//! are produced and logged inside the transport loop and never reach callers.
//! The caller-facing variants are returned by [`SendCoordinator::send`] and
//! [`ServerSupervisor::start`] and render as short user-presentable messages.
//!
//! [`SendCoordinator::send`]: crate::relay::SendCoordinator::send
//! [`ServerSupervisor::start`]: crate::relay::ServerSupervisor::start

use std::net::SocketAddr;

/// Errors produced by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// The listener could not be bound. Fatal to `start`.
    BindFailed {
        /// Address that was requested.
        addr: SocketAddr,
        /// OS error text.
        reason: String,
    },
    /// The background runtime could not be created.
    Runtime(String),
    /// `accept()` failed; the loop keeps going.
    AcceptFailed(String),
    /// WebSocket handshake with a new connection failed.
    Handshake(String),
    /// Reading from the peer failed.
    PeerRead(String),
    /// Writing a payload to the peer failed.
    PeerWrite(String),
    /// No peer is attached.
    NotConnected,
    /// The exporter could not produce a payload.
    ExportFailed(String),
    /// The queue stayed full for the whole enqueue timeout.
    EnqueueTimeout,
    /// The server stopped while (or before) the payload was being queued.
    Shutdown,
}

impl RelayError {
    /// Whether this error is meant to be shown to the person who asked for
    /// the send (as opposed to transport noise that is only logged).
    #[must_use]
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::BindFailed { .. }
                | Self::NotConnected
                | Self::ExportFailed(_)
                | Self::EnqueueTimeout
                | Self::Shutdown
        )
    }
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BindFailed { addr, reason } => {
                write!(f, "Could not listen on {addr}: {reason}")
            }
            Self::Runtime(msg) => write!(f, "Could not start relay runtime: {msg}"),
            Self::AcceptFailed(msg) => write!(f, "Accept failed: {msg}"),
            Self::Handshake(msg) => write!(f, "WebSocket handshake failed: {msg}"),
            Self::PeerRead(msg) => write!(f, "Read from peer failed: {msg}"),
            Self::PeerWrite(msg) => write!(f, "Write to peer failed: {msg}"),
            Self::NotConnected => write!(f, "No client connected"),
            Self::ExportFailed(msg) => write!(f, "Export failed: {msg}"),
            Self::EnqueueTimeout => write!(f, "Timed out waiting to queue payload"),
            Self::Shutdown => write!(f, "Relay is shutting down"),
        }
    }
}

impl std::error::Error for RelayError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_facing_messages() {
        assert_eq!(RelayError::NotConnected.to_string(), "No client connected");
        assert_eq!(
            RelayError::ExportFailed("disk full".to_string()).to_string(),
            "Export failed: disk full"
        );
        let bind = RelayError::BindFailed {
            addr: "127.0.0.1:8765".parse().unwrap(),
            reason: "Address in use".to_string(),
        };
        assert!(bind.to_string().contains("127.0.0.1:8765"));
    }

    #[test]
    fn test_transport_errors_are_not_user_facing() {
        assert!(!RelayError::PeerWrite("broken pipe".to_string()).is_user_facing());
        assert!(!RelayError::AcceptFailed("EMFILE".to_string()).is_user_facing());
        assert!(RelayError::EnqueueTimeout.is_user_facing());
        assert!(RelayError::Shutdown.is_user_facing());
    }

    #[test]
    fn test_works_with_anyhow() {
        let err: anyhow::Error = RelayError::Shutdown.into();
        assert_eq!(err.downcast_ref::<RelayError>(), Some(&RelayError::Shutdown));
    }
}
