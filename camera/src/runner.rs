//! External-process command runner
//!
//! Runs one hardware command at a time as a child process and collects its
//! combined output with a bounded wait. A command that outlives its timeout
//! is killed so no process is left behind.

use crate::error::{CameraError, CameraResult};
use async_trait::async_trait;
use observatory_indi::{drain_output, spawn_output_reader};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// A tool that runs one command at a time
#[async_trait]
pub trait CommandPort: Send + Sync {
    /// Launch a command; fails if the previous one was not collected
    async fn start(&self, args: &[String]) -> CameraResult<()>;

    /// Wait for the command and return its output, killing it on timeout
    async fn collect_result(&self, timeout: Duration) -> CameraResult<String>;

    /// Wait for the command without reading its output
    async fn wait_only(&self, timeout: Duration) -> CameraResult<()>;

    /// Start a command and collect its output
    async fn run(&self, args: &[String], timeout: Duration) -> CameraResult<String> {
        self.start(args).await?;
        self.collect_result(timeout).await
    }
}

struct InFlight {
    command_line: String,
    child: Child,
    stdout: JoinHandle<String>,
    stderr: JoinHandle<String>,
}

/// Runs a fixed program with per-command arguments
pub struct ProcessRunner {
    program: PathBuf,
    base_args: Vec<String>,
    in_flight: Mutex<Option<InFlight>>,
}

impl ProcessRunner {
    /// `base_args` precede every command's own arguments
    pub fn new(program: impl Into<PathBuf>, base_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            base_args,
            in_flight: Mutex::new(None),
        }
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    /// Whether a command is running or being collected
    pub async fn is_busy(&self) -> bool {
        match self.in_flight.try_lock() {
            Ok(slot) => slot.is_some(),
            Err(_) => true,
        }
    }
}

fn nothing_in_flight() -> CameraError {
    CameraError::InvalidState("No command in flight".to_string())
}

/// Wait for the child, killing it once `limit` expires
async fn wait_or_kill(running: &mut InFlight, limit: Duration) {
    match timeout(limit, running.child.wait()).await {
        Ok(Ok(status)) if !status.success() => {
            tracing::debug!("'{}' exited with {}", running.command_line, status);
        }
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::warn!("Failed waiting on '{}': {}", running.command_line, e),
        Err(_) => {
            tracing::warn!("Timeout expired for '{}' after {:?}, killing it", running.command_line, limit);
            if let Err(e) = running.child.kill().await {
                tracing::error!("Failed to kill '{}': {}", running.command_line, e);
            }
        }
    }
}

#[async_trait]
impl CommandPort for ProcessRunner {
    async fn start(&self, args: &[String]) -> CameraResult<()> {
        // The slot stays locked while a command is collected
        let mut in_flight = self.in_flight.try_lock().map_err(|_| {
            CameraError::CommandAlreadyRunning(format!("{} (being collected)", self.program.display()))
        })?;
        if let Some(running) = in_flight.as_ref() {
            return Err(CameraError::CommandAlreadyRunning(running.command_line.clone()));
        }

        let mut all_args = self.base_args.clone();
        all_args.extend_from_slice(args);
        let command_line = format!("{} {}", self.program.display(), all_args.join(" "));
        tracing::debug!("Starting command: {}", command_line);

        let mut child = Command::new(&self.program)
            .args(&all_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CameraError::invalid_command(&command_line, format!("failed to launch: {}", e)))?;

        let stdout = spawn_output_reader(child.stdout.take());
        let stderr = spawn_output_reader(child.stderr.take());
        *in_flight = Some(InFlight {
            command_line,
            child,
            stdout,
            stderr,
        });
        Ok(())
    }

    async fn collect_result(&self, limit: Duration) -> CameraResult<String> {
        let mut slot = self.in_flight.lock().await;
        let running = slot.as_mut().ok_or_else(nothing_in_flight)?;
        wait_or_kill(running, limit).await;

        let InFlight { stdout, stderr, .. } = slot.take().ok_or_else(nothing_in_flight)?;
        let mut output = drain_output(stdout).await;
        output.push_str(&drain_output(stderr).await);
        Ok(output)
    }

    async fn wait_only(&self, limit: Duration) -> CameraResult<()> {
        let mut slot = self.in_flight.lock().await;
        let running = slot.as_mut().ok_or_else(nothing_in_flight)?;
        wait_or_kill(running, limit).await;
        slot.take();
        Ok(())
    }
}
