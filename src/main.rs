//! Scene Relay CLI - serve exported scenes to a WebSocket viewer.
//!
//! This is the main binary entry point. See the `scene_relay` library for
//! the relay itself.

use std::io::BufRead;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scene_relay::constants::{DEFAULT_PORT, STATUS_POLL_INTERVAL};
use scene_relay::ws::{self, WsMessage};
use scene_relay::{
    address, qr, CommandExporter, FileExporter, PeerPolicy, RelayConfig, SendCoordinator,
    ServerHandle, ServerSupervisor, StatusPoller,
};

/// QR area used when printing the connection URL.
const QR_MAX_WIDTH: u16 = 80;
const QR_MAX_HEIGHT: u16 = 40;

/// Bound on the receiver's closing handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

// CLI
#[derive(Parser)]
#[command(name = "scene-relay")]
#[command(version)]
#[command(about = "Push exported scenes to a connected WebSocket viewer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay and send on demand (commands read from stdin)
    Serve {
        /// Address to listen on (default: resolved local address)
        #[arg(long)]
        bind: Option<IpAddr>,
        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
        /// File to send; re-read on every send
        #[arg(long, conflicts_with = "export_cmd", required_unless_present = "export_cmd")]
        file: Option<PathBuf>,
        /// Shell command that writes the payload to --output
        #[arg(long, requires = "output")]
        export_cmd: Option<String>,
        /// File written by --export-cmd
        #[arg(long)]
        output: Option<PathBuf>,
        /// What to do when a second viewer connects
        #[arg(long)]
        policy: Option<PeerPolicy>,
        /// Don't print the QR code
        #[arg(long)]
        no_qr: bool,
    },
    /// Connect as a viewer and save received payloads
    Receive {
        /// Relay URL, e.g. ws://192.168.1.20:8765
        url: String,
        /// Directory for payload-<n>.bin files
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
        /// Exit after this many payloads
        #[arg(long)]
        count: Option<usize>,
    },
    /// Print the URL a viewer would connect to
    Address {
        /// Port to advertise
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
    /// Print the effective configuration as JSON
    Config,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            bind,
            port,
            file,
            export_cmd,
            output,
            policy,
            no_qr,
        } => {
            let mut config = RelayConfig::load();
            if bind.is_some() {
                config.bind_address = bind;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(policy) = policy {
                config.peer_policy = policy;
            }

            let supervisor = ServerSupervisor::new(config);
            let coordinator = match (file, export_cmd, output) {
                (Some(path), _, _) => {
                    SendCoordinator::new(supervisor.handle(), FileExporter::new(path))
                }
                (None, Some(cmd), Some(output)) => {
                    SendCoordinator::new(supervisor.handle(), CommandExporter::shell(&cmd, output))
                }
                _ => anyhow::bail!("either --file or --export-cmd with --output is required"),
            }
            .with_enqueue_timeout(supervisor.config().enqueue_timeout());

            run_serve(&supervisor, &coordinator, no_qr)?;
        }
        Commands::Receive {
            url,
            out_dir,
            count,
        } => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("Failed to build runtime")?;
            let received = runtime.block_on(run_receive(&url, &out_dir, count))?;
            println!("Received {received} payload(s)");
        }
        Commands::Address { port } => {
            println!("{}", address::connection_url(address::resolve_local_address(), port));
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&RelayConfig::load())?);
        }
    }

    Ok(())
}

/// Serve until `quit` or end of input.
fn run_serve(
    supervisor: &ServerSupervisor,
    coordinator: &SendCoordinator,
    no_qr: bool,
) -> Result<()> {
    supervisor.start_configured()?;

    let url = supervisor
        .advertised_url()
        .context("Relay stopped right after starting")?;
    println!("Viewer URL: {url}");
    if !no_qr {
        for line in qr::render_lines(&url, QR_MAX_WIDTH, QR_MAX_HEIGHT) {
            println!("{line}");
        }
    }
    println!("Commands: send (or empty line), status, quit");

    let poller = StatusPoller::spawn(supervisor.handle(), STATUS_POLL_INTERVAL, |connected| {
        if connected {
            println!("Viewer connected");
        } else {
            println!("Waiting for viewer...");
        }
    });

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read stdin")?;
        match line.trim() {
            "" | "send" => match coordinator.send() {
                Ok(()) => println!("Queued"),
                Err(e) => println!("{e}"),
            },
            "status" => print_status(&supervisor.handle()),
            "quit" | "exit" => break,
            other => println!("Unknown command: {other}"),
        }
    }

    drop(poller);
    supervisor.stop();
    Ok(())
}

fn print_status(handle: &ServerHandle) {
    match handle.current_peer() {
        Some(peer) => println!("Connected: {peer}"),
        None => println!("Not connected"),
    }
    println!(
        "Queue: {}/{} ({:?})",
        handle.queue().len(),
        handle.queue().capacity(),
        handle.lifecycle()
    );
}

/// Save binary messages from `url` until the relay closes or `count` is hit.
async fn run_receive(url: &str, out_dir: &Path, count: Option<usize>) -> Result<usize> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let (mut writer, mut reader) = ws::connect(url).await?;
    log::info!("Connected to {url}");

    let mut received = 0;
    while let Some(message) = reader.recv().await {
        match message? {
            WsMessage::Binary(data) => {
                received += 1;
                let path = out_dir.join(format!("payload-{received}.bin"));
                std::fs::write(&path, &data)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("Saved {} bytes to {}", data.len(), path.display());

                if count.is_some_and(|limit| received >= limit) {
                    writer
                        .close_gracefully(1000, "done", CLOSE_TIMEOUT)
                        .await;
                    break;
                }
            }
            WsMessage::Close { code, reason } => {
                log::info!("Relay closed the connection ({code}: {reason})");
                break;
            }
            other => log::debug!("Ignoring {}", other.describe()),
        }
    }

    Ok(received)
}
