//! Payload producers.
//!
//! The relay does not care what it forwards. Whatever produces the bytes
//! (a 3D tool writing a `.glb`, a test closure) implements [`Exporter`].

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};

use crate::relay::Payload;

/// Produces a payload on demand.
///
/// Called synchronously from the thread that asked for a send; it may block
/// briefly and may fail.
pub trait Exporter: Send + Sync {
    /// Produce the bytes to send.
    ///
    /// # Errors
    ///
    /// Any failure; it is reported to the caller as `ExportFailed`.
    fn produce_payload(&self) -> Result<Payload>;
}

impl<F> Exporter for F
where
    F: Fn() -> Result<Payload> + Send + Sync,
{
    fn produce_payload(&self) -> Result<Payload> {
        self()
    }
}

/// Reads a file that something else keeps up to date.
#[derive(Debug, Clone)]
pub struct FileExporter {
    path: PathBuf,
}

impl FileExporter {
    /// Export the contents of `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file being exported.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Exporter for FileExporter {
    fn produce_payload(&self) -> Result<Payload> {
        let data = std::fs::read(&self.path)
            .with_context(|| format!("Failed to read export file {}", self.path.display()))?;
        log::info!("Exported {} bytes from {}", data.len(), self.path.display());
        Ok(Payload::from(data))
    }
}

/// Runs an export command, then reads the file it wrote.
///
/// This is the shape of a headless scene export: the tool is told where to
/// write, and the relay picks the file up once the tool exits successfully.
#[derive(Debug, Clone)]
pub struct CommandExporter {
    program: String,
    args: Vec<String>,
    output: PathBuf,
}

impl CommandExporter {
    /// Run `program args...` and export `output` afterwards.
    pub fn new(program: impl Into<String>, args: Vec<String>, output: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            output: output.into(),
        }
    }

    /// Run a shell command line (`sh -c`) and export `output` afterwards.
    pub fn shell(command_line: &str, output: impl Into<PathBuf>) -> Self {
        Self::new("sh", vec!["-c".to_string(), command_line.to_string()], output)
    }
}

impl Exporter for CommandExporter {
    fn produce_payload(&self) -> Result<Payload> {
        log::debug!("Running export command: {} {:?}", self.program, self.args);
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .with_context(|| format!("Failed to run export command '{}'", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "Export command '{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            );
        }

        FileExporter::new(&self.output).produce_payload()
    }
}
