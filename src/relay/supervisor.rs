//! Owns the relay's background execution context.
//!
//! The supervisor builds a dedicated multi-thread tokio runtime per run and
//! spawns the [`TransportLoop`] on it, so the relay works the same whether
//! the host application is async or not. `start` and `stop` are plain
//! blocking calls that can be made from any thread.

use std::net::{IpAddr, SocketAddr};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

use super::transport::{self, TransportLoop};
use super::{ServerHandle, ServerLifecycle};
use crate::address;
use crate::config::RelayConfig;
use crate::constants::{RUNTIME_THREAD_NAME, RUNTIME_WORKER_THREADS};
use crate::error::RelayError;

/// State of one run (start → stop).
struct Running {
    runtime: tokio::runtime::Runtime,
    shutdown: CancellationToken,
    done_rx: std_mpsc::Receiver<Result<(), RelayError>>,
    local_addr: SocketAddr,
}

/// Starts, stops and restarts the relay.
///
/// Dropping the supervisor stops the relay.
pub struct ServerSupervisor {
    config: RelayConfig,
    handle: ServerHandle,
    running: Mutex<Option<Running>>,
}

impl std::fmt::Debug for ServerSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSupervisor")
            .field("lifecycle", &self.handle.lifecycle())
            .field("local_addr", &self.local_addr())
            .finish_non_exhaustive()
    }
}

impl ServerSupervisor {
    /// Create a stopped supervisor.
    pub fn new(config: RelayConfig) -> Self {
        let handle = ServerHandle::new(config.queue_capacity);
        Self {
            config,
            handle,
            running: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle for producers and pollers. Valid across restarts.
    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// The configuration this supervisor was created with.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Current lifecycle stage.
    pub fn lifecycle(&self) -> ServerLifecycle {
        self.handle.lifecycle()
    }

    /// Start on the configured address and port.
    ///
    /// # Errors
    ///
    /// See [`start`](Self::start).
    pub fn start_configured(&self) -> Result<(), RelayError> {
        self.start(self.config.listen_ip(), self.config.port)
    }

    /// Start listening on `address:port`. No-op if already running.
    ///
    /// # Errors
    ///
    /// [`RelayError::BindFailed`] if the port cannot be bound,
    /// [`RelayError::Runtime`] if the runtime cannot be built. The
    /// supervisor is left stopped in both cases.
    pub fn start(&self, address: IpAddr, port: u16) -> Result<(), RelayError> {
        let mut running = self.lock();
        if running.is_some() {
            log::debug!("[Supervisor] start() while running, ignoring");
            return Ok(());
        }

        self.handle.set_lifecycle(ServerLifecycle::Starting);
        match self.launch(SocketAddr::new(address, port)) {
            Ok(run) => {
                log::info!("[Supervisor] Relay running on {}", run.local_addr);
                *running = Some(run);
                self.handle.set_lifecycle(ServerLifecycle::Running);
                Ok(())
            }
            Err(e) => {
                log::error!("[Supervisor] {e}");
                self.handle.set_lifecycle(ServerLifecycle::Stopped);
                Err(e)
            }
        }
    }

    fn launch(&self, addr: SocketAddr) -> Result<Running, RelayError> {
        let listener = transport::bind(addr)?;
        let local_addr = listener.local_addr().map_err(|e| RelayError::BindFailed {
            addr,
            reason: e.to_string(),
        })?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(RUNTIME_WORKER_THREADS)
            .thread_name(RUNTIME_THREAD_NAME)
            .enable_all()
            .build()
            .map_err(|e| RelayError::Runtime(e.to_string()))?;

        self.handle.queue().reopen();
        let shutdown = CancellationToken::new();
        let transport = TransportLoop::new(
            Arc::clone(self.handle.connection()),
            Arc::clone(self.handle.queue()),
            self.config.peer_policy,
            shutdown.clone(),
        );

        let (done_tx, done_rx) = std_mpsc::channel();
        runtime.spawn(async move {
            let result = transport.serve(listener).await;
            if let Err(e) = &result {
                log::error!("[Supervisor] Transport loop failed: {e}");
            }
            let _ = done_tx.send(result);
        });

        Ok(Running {
            runtime,
            shutdown,
            done_rx,
            local_addr,
        })
    }

    /// Stop the relay. No-op if stopped.
    ///
    /// Cancels the accept loop and the active session, closes the send queue
    /// (pending `enqueue` calls return `Shutdown`, queued payloads are
    /// discarded), waits up to the configured stop timeout for the transport
    /// loop to exit, then releases the runtime.
    pub fn stop(&self) {
        let mut running = self.lock();
        let Some(run) = running.take() else {
            return;
        };

        self.handle.set_lifecycle(ServerLifecycle::Stopping);
        log::info!("[Supervisor] Stopping relay on {}", run.local_addr);

        run.shutdown.cancel();
        self.handle.queue().close();

        let timeout = self.config.stop_timeout();
        match run.done_rx.recv_timeout(timeout) {
            Ok(Ok(())) => log::debug!("[Supervisor] Transport loop exited"),
            Ok(Err(e)) => log::warn!("[Supervisor] Transport loop exited with error: {e}"),
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                log::warn!(
                    "[Supervisor] Transport loop did not exit within {timeout:?}, abandoning it"
                );
            }
            Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                log::warn!("[Supervisor] Transport loop vanished without reporting");
            }
        }

        // Safe from any context, including a runtime worker.
        run.runtime.shutdown_background();

        self.handle.connection().set_disconnected();
        self.handle.set_lifecycle(ServerLifecycle::Stopped);
        log::info!("[Supervisor] Relay stopped");
    }

    /// Address actually bound, while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock().as_ref().map(|run| run.local_addr)
    }

    /// `ws://` URL to advertise, while running.
    ///
    /// A wildcard bind is advertised under the resolved local address.
    pub fn advertised_url(&self) -> Option<String> {
        let local = self.local_addr()?;
        let ip = if local.ip().is_unspecified() {
            address::resolve_local_address()
        } else {
            local.ip()
        };
        Some(address::connection_url(ip, local.port()))
    }
}

impl Drop for ServerSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}
