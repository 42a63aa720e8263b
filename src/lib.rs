//! Scene Relay - pushes exported scene payloads to a single WebSocket viewer.
//!
//! A host application (typically a 3D tool) runs a small WebSocket server in
//! the background. One viewer connects at a time; each "send" exports the
//! current scene and delivers it to that viewer as one binary message.
//!
//! # Modules
//!
//! - [`relay`]: connection state, send queue, sessions, accept loop and the
//!   supervisor that owns the background runtime
//! - [`exporter`]: payload producers
//! - [`ws`]: WebSocket reader/writer halves shared by server and client
//! - [`address`]: local address resolution and connection URLs
//! - [`config`]: defaults and environment overrides
//! - [`poller`]: connection-status polling for UIs
//! - [`qr`]: terminal QR rendering of the connection URL
//!
//! # Example
//!
//! ```no_run
//! use scene_relay::{RelayConfig, SendCoordinator, ServerSupervisor, Payload};
//!
//! let supervisor = ServerSupervisor::new(RelayConfig::load());
//! supervisor.start_configured()?;
//!
//! let coordinator = SendCoordinator::new(supervisor.handle(), || {
//!     Ok(Payload::from(std::fs::read("scene.glb")?))
//! });
//! if let Err(e) = coordinator.send() {
//!     eprintln!("{e}");
//! }
//!
//! supervisor.stop();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod address;
pub mod config;
pub mod constants;
pub mod error;
pub mod exporter;
pub mod poller;
pub mod qr;
pub mod relay;
pub mod ws;

pub use config::{PeerPolicy, RelayConfig};
pub use error::RelayError;
pub use exporter::{CommandExporter, Exporter, FileExporter};
pub use poller::StatusPoller;
pub use relay::{
    ConnectionState, Payload, PeerHandle, SendCoordinator, SendQueue, ServerHandle,
    ServerLifecycle, ServerSupervisor,
};
