//! Process launcher and registry
//!
//! Runs shell commands in a working directory with captured standard
//! output. Test invocations are registered in a process registry keyed by
//! the requesting test id so a cancellation signal can locate and kill
//! them; entries are removed on completion or termination.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Mutex;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// Captured result of an unregistered shell command.
#[derive(Debug)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
}

/// Outcome of one registered test invocation.
#[derive(Debug)]
pub enum ExecOutcome {
    /// Exit code 0; captured standard output.
    Passed(String),
    /// Nonzero exit; captured standard output.
    Failed(String),
    /// Killed by the cancellation signal before completing.
    Terminated,
}

/// In-flight test processes keyed by test id.
#[derive(Default)]
pub struct ProcessRegistry {
    inner: Mutex<HashMap<String, Child>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, id: &str, child: Child) {
        self.lock().insert(id.to_string(), child);
    }

    fn deregister(&self, id: &str) -> Option<Child> {
        self.lock().remove(id)
    }

    /// Kill and reap the process registered under `id`, if any.
    pub async fn kill_if_present(&self, id: &str) {
        let child = self.lock().remove(id);
        if let Some(mut child) = child {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Child>> {
        self.inner.lock().expect("process registry poisoned")
    }
}

fn shell_command(cmd: &str, cwd: &Path) -> Command {
    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(cmd)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    command
}

/// Run a shell command to completion and capture its standard output.
/// Used by discovery; not tracked in the registry.
pub async fn exec_shell(cmd: &str, cwd: &Path) -> Result<CommandOutput> {
    let output = shell_command(cmd, cwd)
        .output()
        .await
        .with_context(|| format!("Failed to execute: {}", cmd))?;

    Ok(CommandOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
    })
}

/// Run one test invocation, registered under `id` for the lifetime of the
/// process. The registry entry is gone on every return path.
pub async fn exec_test(
    registry: &ProcessRegistry,
    id: &str,
    cmd: &str,
    cwd: &Path,
    cancel: &CancellationToken,
) -> Result<ExecOutcome> {
    let mut child = shell_command(cmd, cwd)
        .spawn()
        .with_context(|| format!("Failed to spawn: {}", cmd))?;

    let mut stdout_pipe = child
        .stdout
        .take()
        .context("Failed to capture test stdout")?;
    registry.register(id, child);

    let mut buf = Vec::new();
    tokio::select! {
        res = stdout_pipe.read_to_end(&mut buf) => {
            // A read error must not strand the child in the registry.
            if let Err(e) = res {
                registry.kill_if_present(id).await;
                return Err(e).context("Failed to read test output");
            }
        }
        _ = cancel.cancelled() => {
            registry.kill_if_present(id).await;
            // The pipe closes once the child is dead; drain the remainder.
            let _ = stdout_pipe.read_to_end(&mut buf).await;
            return Ok(ExecOutcome::Terminated);
        }
    }

    // The cancellation path may have taken the entry and killed the
    // process while we were still draining output.
    let mut child = match registry.deregister(id) {
        Some(child) => child,
        None => return Ok(ExecOutcome::Terminated),
    };

    let status = child.wait().await.context("Failed to wait on test process")?;
    let stdout = String::from_utf8_lossy(&buf).to_string();

    if status.success() {
        Ok(ExecOutcome::Passed(stdout))
    } else {
        Ok(ExecOutcome::Failed(stdout))
    }
}
