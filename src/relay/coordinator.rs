//! Producer-side entry point: export a payload and hand it to the relay.

use std::sync::Arc;
use std::time::Duration;

use super::ServerHandle;
use crate::constants::DEFAULT_ENQUEUE_TIMEOUT;
use crate::error::RelayError;
use crate::exporter::Exporter;

/// Turns "send now" requests into queued payloads.
pub struct SendCoordinator {
    handle: ServerHandle,
    exporter: Arc<dyn Exporter>,
    enqueue_timeout: Duration,
}

impl std::fmt::Debug for SendCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendCoordinator")
            .field("handle", &self.handle)
            .field("enqueue_timeout", &self.enqueue_timeout)
            .finish_non_exhaustive()
    }
}

impl SendCoordinator {
    /// Coordinator with the default 5 second enqueue timeout.
    pub fn new(handle: ServerHandle, exporter: impl Exporter + 'static) -> Self {
        Self {
            handle,
            exporter: Arc::new(exporter),
            enqueue_timeout: DEFAULT_ENQUEUE_TIMEOUT,
        }
    }

    /// Override how long `send` waits for room in the queue.
    #[must_use]
    pub fn with_enqueue_timeout(mut self, timeout: Duration) -> Self {
        self.enqueue_timeout = timeout;
        self
    }

    /// Export a payload and queue it for the connected peer.
    ///
    /// Blocks for at most the enqueue timeout, plus however long the
    /// exporter takes.
    ///
    /// # Errors
    ///
    /// - [`RelayError::NotConnected`]: no peer; the exporter is not called.
    /// - [`RelayError::ExportFailed`]: the exporter failed; nothing queued.
    /// - [`RelayError::EnqueueTimeout`]: the queue stayed full; the payload
    ///   is dropped and the caller has to send again.
    /// - [`RelayError::Shutdown`]: the relay stopped meanwhile.
    pub fn send(&self) -> Result<(), RelayError> {
        if !self.handle.is_connected() {
            log::info!("No client connected");
            return Err(RelayError::NotConnected);
        }

        let payload = self.exporter.produce_payload().map_err(|e| {
            log::error!("Export failed: {e:#}");
            RelayError::ExportFailed(format!("{e:#}"))
        })?;

        let size = payload.len();
        log::info!("Adding {size} bytes to send queue");
        self.handle.enqueue(payload, self.enqueue_timeout)?;
        log::info!("Data successfully queued for sending");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{PeerHandle, Payload};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn connected_handle(capacity: usize) -> ServerHandle {
        let handle = ServerHandle::new(capacity);
        handle
            .connection()
            .set_connected(PeerHandle::next("127.0.0.1:40000".parse().unwrap()));
        handle
    }

    #[test]
    fn test_not_connected_skips_exporter() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let exporter = move || -> anyhow::Result<Payload> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Payload::from(vec![1]))
        };

        let handle = ServerHandle::new(4);
        let coordinator = SendCoordinator::new(handle.clone(), exporter);
        assert_eq!(coordinator.send(), Err(RelayError::NotConnected));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(handle.queue().is_empty());
    }

    #[test]
    fn test_export_failure_leaves_queue_empty() {
        let handle = connected_handle(4);
        let coordinator = SendCoordinator::new(handle.clone(), || -> anyhow::Result<Payload> {
            anyhow::bail!("scene has no objects")
        });

        match coordinator.send() {
            Err(RelayError::ExportFailed(msg)) => assert!(msg.contains("no objects")),
            other => panic!("Expected ExportFailed, got: {other:?}"),
        }
        assert!(handle.queue().is_empty());
    }

    #[test]
    fn test_success_queues_payload() {
        let handle = connected_handle(4);
        let coordinator = SendCoordinator::new(handle.clone(), || -> anyhow::Result<Payload> {
            Ok(Payload::from(vec![1, 2, 3]))
        });

        coordinator.send().unwrap();
        assert_eq!(handle.queue().try_dequeue().unwrap().as_bytes(), &[1, 2, 3]);
    }

    #[test]
    fn test_full_queue_times_out() {
        let handle = connected_handle(1);
        let coordinator = SendCoordinator::new(handle.clone(), || -> anyhow::Result<Payload> {
            Ok(Payload::from(vec![9]))
        })
        .with_enqueue_timeout(Duration::from_millis(50));

        coordinator.send().unwrap();
        assert_eq!(coordinator.send(), Err(RelayError::EnqueueTimeout));
        assert_eq!(handle.queue().len(), 1);
    }

    #[test]
    fn test_closed_queue_reports_shutdown() {
        let handle = connected_handle(4);
        handle.queue().close();
        let coordinator = SendCoordinator::new(handle, || -> anyhow::Result<Payload> {
            Ok(Payload::from(vec![9]))
        });
        assert_eq!(coordinator.send(), Err(RelayError::Shutdown));
    }

    #[test]
    fn test_unbounded_timeout_ends_on_shutdown() {
        let handle = connected_handle(1);
        let coordinator = SendCoordinator::new(handle.clone(), || -> anyhow::Result<Payload> {
            Ok(Payload::from(vec![5]))
        })
        .with_enqueue_timeout(Duration::MAX);
        coordinator.send().unwrap();

        let sender = std::thread::spawn(move || coordinator.send());
        std::thread::sleep(Duration::from_millis(50));
        handle.queue().close();
        assert_eq!(sender.join().unwrap(), Err(RelayError::Shutdown));
    }
}
