//! Per-peer session: the read loop and the drain loop for one connection.
//!
//! Both loops run concurrently inside a single task and share a
//! cancellation token. Whichever side ends first (peer close, read error,
//! write error, supersede, server stop) cancels the token, the other side
//! winds down, and the task closes the socket and clears the connection
//! state for its peer.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::connection::{ConnectionState, PeerHandle};
use super::queue::SendQueue;
use crate::constants::CLOSE_FRAME_TIMEOUT;
use crate::error::RelayError;
use crate::ws::{WsMessage, WsReader, WsWriter};

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Peer sent a close frame or the stream ended.
    PeerClosed,
    /// Reading from the peer failed.
    ReadFailed(RelayError),
    /// Writing a payload failed; the payload was dropped.
    WriteFailed(RelayError),
    /// The session was cancelled (supersede or shutdown).
    Cancelled,
    /// The send queue was closed.
    QueueClosed,
}

/// A running session, owned by the accept loop.
pub struct Session {
    peer: PeerHandle,
    cancel: CancellationToken,
    handle: JoinHandle<SessionEnd>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.peer)
            .field("finished", &self.handle.is_finished())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Spawn the session task for a handshaken connection.
    ///
    /// `cancel` should be a child of the server's shutdown token so stopping
    /// the server also ends the session.
    pub(crate) fn spawn(
        peer: PeerHandle,
        writer: WsWriter,
        reader: WsReader,
        state: Arc<ConnectionState>,
        queue: Arc<SendQueue>,
        cancel: CancellationToken,
    ) -> Self {
        let handle = tokio::spawn(Self::run(
            peer,
            writer,
            reader,
            state,
            queue,
            cancel.clone(),
        ));
        Self {
            peer,
            cancel,
            handle,
        }
    }

    /// The peer this session serves.
    pub fn peer(&self) -> PeerHandle {
        self.peer
    }

    /// Whether the session task has already exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the session and wait for it to close its socket.
    ///
    /// If the task does not finish within `grace`, it is aborted and the
    /// peer's connection state is cleared here instead.
    pub(crate) async fn shutdown(self, state: &ConnectionState, grace: std::time::Duration) {
        self.cancel.cancel();
        let mut handle = self.handle;
        match tokio::time::timeout(grace, &mut handle).await {
            Ok(Ok(end)) => log::debug!("[Session] {} ended: {end:?}", self.peer),
            Ok(Err(e)) => log::warn!("[Session] {} task failed: {e}", self.peer),
            Err(_) => {
                log::warn!("[Session] {} did not stop within {grace:?}, aborting", self.peer);
                handle.abort();
                let _ = handle.await;
                state.clear_peer(self.peer.id);
            }
        }
    }

    async fn run(
        peer: PeerHandle,
        writer: WsWriter,
        reader: WsReader,
        state: Arc<ConnectionState>,
        queue: Arc<SendQueue>,
        cancel: CancellationToken,
    ) -> SessionEnd {
        let (read_end, (mut writer, drain_end)) = tokio::join!(
            Self::read_loop(peer, reader, &cancel),
            Self::drain_loop(peer, writer, &queue, &cancel),
        );

        // The first side to finish decides what happened.
        let end = match (read_end, drain_end) {
            (SessionEnd::Cancelled, other) => other,
            (read, _) => read,
        };

        let (code, reason) = match end {
            SessionEnd::Cancelled | SessionEnd::QueueClosed => (1001, "server going away"),
            _ => (1000, ""),
        };
        writer.close_gracefully(code, reason, CLOSE_FRAME_TIMEOUT).await;
        drop(writer);

        state.clear_peer(peer.id);
        match &end {
            SessionEnd::ReadFailed(e) | SessionEnd::WriteFailed(e) => {
                log::warn!("[Session] {peer} closed: {e}");
            }
            other => log::info!("[Session] {peer} closed: {other:?}"),
        }
        end
    }

    /// Logs and discards everything the peer sends.
    async fn read_loop(
        peer: PeerHandle,
        mut reader: WsReader,
        cancel: &CancellationToken,
    ) -> SessionEnd {
        let end = loop {
            let inbound = tokio::select! {
                () = cancel.cancelled() => break SessionEnd::Cancelled,
                inbound = reader.recv() => inbound,
            };
            match inbound {
                Some(Ok(WsMessage::Close { code, reason })) => {
                    log::info!("[Session] {peer} sent close ({code}) {reason}");
                    break SessionEnd::PeerClosed;
                }
                Some(Ok(msg)) => {
                    log::debug!("[Session] Received {} from {peer}, ignoring", msg.describe());
                }
                Some(Err(e)) => {
                    break SessionEnd::ReadFailed(RelayError::PeerRead(format!("{e:#}")));
                }
                None => break SessionEnd::PeerClosed,
            }
        };
        cancel.cancel();
        end
    }

    /// Writes queued payloads to the peer one at a time.
    ///
    /// Hands the writer back so the session can send a close frame.
    async fn drain_loop(
        peer: PeerHandle,
        mut writer: WsWriter,
        queue: &SendQueue,
        cancel: &CancellationToken,
    ) -> (WsWriter, SessionEnd) {
        let end = loop {
            let payload = tokio::select! {
                biased;
                () = cancel.cancelled() => break SessionEnd::Cancelled,
                payload = queue.dequeue() => payload,
            };
            let Some(payload) = payload else {
                break SessionEnd::QueueClosed;
            };

            let size = payload.len();
            if cancel.is_cancelled() {
                // Nothing written yet; leave it for the next peer.
                if queue.requeue(payload) {
                    log::debug!("[Session] Returned {size}-byte payload to the queue");
                }
                break SessionEnd::Cancelled;
            }

            log::info!("[Session] Sending {size} bytes to {peer}");
            // The write is polled first, so once cancellation is seen the
            // frame has already been handed to the socket.
            let result = tokio::select! {
                biased;
                result = writer.send_binary(payload.into_vec()) => result,
                () = cancel.cancelled() => {
                    log::warn!(
                        "[Session] Cancelled mid-write, dropped {size}-byte payload for {peer}"
                    );
                    break SessionEnd::Cancelled;
                }
            };
            match result {
                Ok(()) => log::info!("[Session] Sent {size} bytes to {peer}"),
                Err(e) => {
                    log::error!("[Session] Dropped {size}-byte payload for {peer}: {e:#}");
                    break SessionEnd::WriteFailed(RelayError::PeerWrite(format!("{e:#}")));
                }
            }
        };
        cancel.cancel();
        (writer, end)
    }
}
