//! Accept loop: owns the listener and admits at most one peer at a time.
//!
//! Each accepted socket is upgraded to a WebSocket in its own task, so a
//! socket that never completes the upgrade cannot hold up the next one.
//! Finished handshakes are admitted one at a time according to the
//! [`PeerPolicy`]. The admitted peer gets a [`Session`] whose read and
//! drain loops do the actual I/O. Transport errors never leave this module;
//! they are logged and only ever change the connection state.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::connection::{ConnectionState, PeerHandle};
use super::queue::SendQueue;
use super::session::Session;
use crate::config::PeerPolicy;
use crate::constants::{
    ACCEPT_RETRY_DELAY, CLOSE_CODE_TRY_AGAIN, CLOSE_FRAME_TIMEOUT, HANDSHAKE_TIMEOUT,
    SUPERSEDE_TIMEOUT,
};
use crate::error::RelayError;
use crate::ws::{self, WsReader, WsWriter};

/// Bind a listening socket.
///
/// Done with the std listener so it can happen before (and outside of) the
/// relay runtime; [`TransportLoop::serve`] converts it.
///
/// # Errors
///
/// [`RelayError::BindFailed`] if the address is in use, not local, or not
/// permitted.
pub fn bind(addr: SocketAddr) -> Result<std::net::TcpListener, RelayError> {
    let bind_failed = |e: std::io::Error| RelayError::BindFailed {
        addr,
        reason: e.to_string(),
    };
    let listener = std::net::TcpListener::bind(addr).map_err(bind_failed)?;
    listener.set_nonblocking(true).map_err(bind_failed)?;
    Ok(listener)
}

/// The relay's accept loop and its shared state.
#[derive(Debug)]
pub struct TransportLoop {
    state: Arc<ConnectionState>,
    queue: Arc<SendQueue>,
    policy: PeerPolicy,
    shutdown: CancellationToken,
}

impl TransportLoop {
    /// Create a loop feeding peers from `queue` and reporting into `state`.
    pub fn new(
        state: Arc<ConnectionState>,
        queue: Arc<SendQueue>,
        policy: PeerPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            state,
            queue,
            policy,
            shutdown,
        }
    }

    /// Serve until the shutdown token is cancelled.
    ///
    /// Must run inside a tokio runtime. On return the listener is closed, the
    /// active session (if any) has closed its socket, and the connection
    /// state is disconnected.
    ///
    /// # Errors
    ///
    /// [`RelayError::BindFailed`] if the listener cannot be registered with
    /// the runtime.
    pub async fn serve(self, listener: std::net::TcpListener) -> Result<(), RelayError> {
        let local = listener
            .local_addr()
            .map_err(|e| RelayError::AcceptFailed(e.to_string()))?;
        let listener = TcpListener::from_std(listener).map_err(|e| RelayError::BindFailed {
            addr: local,
            reason: e.to_string(),
        })?;
        log::info!("[Transport] WebSocket server running at ws://{local}");

        let mut active: Option<Session> = None;
        let mut handshakes: JoinSet<Option<Handshaken>> = JoinSet::new();

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        log::debug!("[Transport] Connection attempt from {addr}");
                        handshakes.spawn(handshake(stream, addr, self.shutdown.clone()));
                    }
                    Err(e) => {
                        let err = RelayError::AcceptFailed(e.to_string());
                        log::error!("[Transport] {err}");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                },
                Some(joined) = handshakes.join_next(), if !handshakes.is_empty() => match joined {
                    Ok(Some(newcomer)) => self.admit(newcomer, &mut active).await,
                    Ok(None) => {}
                    Err(e) => log::warn!("[Transport] Handshake task failed: {e}"),
                },
            }
        }

        drop(listener);
        handshakes.shutdown().await;
        if let Some(session) = active.take() {
            session.shutdown(&self.state, SUPERSEDE_TIMEOUT).await;
        }
        self.state.set_disconnected();
        log::info!("[Transport] Stopped listening on {local}");
        Ok(())
    }

    /// Apply the peer policy to a handshaken connection.
    async fn admit(&self, newcomer: Handshaken, active: &mut Option<Session>) {
        let Handshaken {
            addr,
            mut writer,
            reader,
        } = newcomer;

        if active.as_ref().is_some_and(Session::is_finished) {
            *active = None;
        }

        if let Some(current) = active.take() {
            match self.policy {
                PeerPolicy::Reject => {
                    log::warn!(
                        "[Transport] Rejecting {addr}: {} is already connected",
                        current.peer()
                    );
                    let reason = "another client is connected";
                    writer
                        .close_gracefully(CLOSE_CODE_TRY_AGAIN, reason, CLOSE_FRAME_TIMEOUT)
                        .await;
                    *active = Some(current);
                    return;
                }
                PeerPolicy::Supersede => {
                    log::info!("[Transport] {addr} supersedes {}", current.peer());
                    current.shutdown(&self.state, SUPERSEDE_TIMEOUT).await;
                }
            }
        }

        let peer = PeerHandle::next(addr);
        if let Some(stale) = self.state.set_connected(peer) {
            log::warn!("[Transport] Connection state still held {stale}, replaced");
        }
        *active = Some(Session::spawn(
            peer,
            writer,
            reader,
            Arc::clone(&self.state),
            Arc::clone(&self.queue),
            self.shutdown.child_token(),
        ));
    }
}

/// A connection that completed the WebSocket upgrade.
struct Handshaken {
    addr: SocketAddr,
    writer: WsWriter,
    reader: WsReader,
}

/// Upgrade one accepted socket, off the accept loop.
///
/// Returns `None` if the handshake fails, times out, or the server stops
/// first. Failures are logged here.
async fn handshake(
    stream: TcpStream,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Option<Handshaken> {
    let result = tokio::select! {
        () = shutdown.cancelled() => return None,
        result = tokio::time::timeout(HANDSHAKE_TIMEOUT, ws::accept(stream)) => result,
    };
    let err = match result {
        Ok(Ok((writer, reader))) => {
            return Some(Handshaken {
                addr,
                writer,
                reader,
            })
        }
        Ok(Err(e)) => RelayError::Handshake(format!("{addr}: {e:#}")),
        Err(_) => {
            RelayError::Handshake(format!("{addr}: timed out after {HANDSHAKE_TIMEOUT:?}"))
        }
    };
    log::warn!("[Transport] {err}");
    None
}
