//! Handle to a running crawl worker process.
//!
//! The [`Child`] is owned by a reaper task that waits for exit and performs
//! forced kills on request, so status checks and termination never contend
//! with a pending `wait`.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, error, info, warn};

use grandguru_shared::{GrandGuruError, Result, WorkerControl};

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, absent when killed by a signal or if waiting failed.
    pub code: Option<i32>,
    pub success: bool,
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => f.write_str("terminated by signal"),
        }
    }
}

/// Result of [`WorkerProcess::terminate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// The process had already exited.
    AlreadyExited,
    /// The process exited after the shutdown request.
    Graceful,
    /// The process had to be killed.
    Killed,
    /// The process was still alive after the kill.
    Unresponsive,
}

/// Pipes taken from a freshly spawned worker.
pub struct WorkerPipes {
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// A spawned worker process.
///
/// The graceful phase of [`terminate`](Self::terminate) is a
/// `{"type":"shutdown"}` line on stdin followed by closing stdin; no OS
/// signal is sent. The bundled `grandguru worker` honours it. A worker that
/// never reads stdin gets no early notice: it runs until the grace period
/// elapses and is then killed.
pub struct WorkerProcess {
    pid: Option<u32>,
    stdin: Mutex<Option<ChildStdin>>,
    kill_tx: mpsc::Sender<()>,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
}

impl WorkerProcess {
    /// Spawn `command` with piped stdio and start its reaper.
    pub fn spawn(mut command: Command) -> Result<(Arc<Self>, WorkerPipes)> {
        command
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| GrandGuruError::Worker(format!("failed to spawn worker: {e}")))?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GrandGuruError::Worker("failed to capture worker stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| GrandGuruError::Worker("failed to capture worker stderr".into()))?;

        let pid = child.id();
        let (kill_tx, kill_rx) = mpsc::channel(1);
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(reap(child, kill_rx, exit_tx));

        info!(?pid, "worker spawned");

        let process = Arc::new(Self {
            pid,
            stdin: Mutex::new(stdin),
            kill_tx,
            exit_rx,
        });
        Ok((process, WorkerPipes { stdout, stderr }))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_running(&self) -> bool {
        self.exit_rx.borrow().is_none()
    }

    /// Exit information, once the process has been reaped.
    pub fn exit_info(&self) -> Option<ExitInfo> {
        *self.exit_rx.borrow()
    }

    /// Wait for the process to exit.
    pub async fn wait(&self) -> ExitInfo {
        let mut rx = self.exit_rx.clone();
        match rx.wait_for(|status| status.is_some()).await {
            Ok(status) => (*status).unwrap_or(ExitInfo {
                code: None,
                success: false,
            }),
            // The reaper always publishes before dropping its sender.
            Err(_) => self.exit_info().unwrap_or(ExitInfo {
                code: None,
                success: false,
            }),
        }
    }

    /// Wait up to `limit` for the process to exit.
    pub async fn wait_timeout(&self, limit: Duration) -> Option<ExitInfo> {
        tokio::time::timeout(limit, self.wait()).await.ok()
    }

    /// Ask the worker to finish: write a shutdown line and close its stdin.
    pub async fn request_shutdown(&self) {
        let Some(mut stdin) = self.stdin.lock().await.take() else {
            return;
        };
        let line = match serde_json::to_string(&WorkerControl::Shutdown) {
            Ok(json) => json + "\n",
            Err(e) => {
                warn!(error = %e, "failed to encode shutdown request");
                return;
            }
        };
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            // Broken pipe: the worker is already gone.
            debug!(error = %e, "shutdown request not delivered");
        }
        let _ = stdin.flush().await;
    }

    /// Close stdin without a shutdown request (end of input).
    pub async fn close_stdin(&self) {
        self.stdin.lock().await.take();
    }

    /// Request a forced kill. Failures are logged by the reaper.
    pub fn kill(&self) {
        let _ = self.kill_tx.try_send(());
    }

    /// Graceful shutdown, then a forced kill if the process is still alive
    /// after `grace`.
    pub async fn terminate(&self, grace: Duration) -> TerminateOutcome {
        if !self.is_running() {
            return TerminateOutcome::AlreadyExited;
        }

        self.request_shutdown().await;
        if self.wait_timeout(grace).await.is_some() {
            info!(pid = ?self.pid, "worker exited after shutdown request");
            return TerminateOutcome::Graceful;
        }

        warn!(pid = ?self.pid, grace_ms = grace.as_millis() as u64, "worker ignored shutdown, killing");
        self.kill();
        match self.wait_timeout(grace).await {
            Some(_) => TerminateOutcome::Killed,
            None => {
                error!(pid = ?self.pid, "worker still running after kill");
                TerminateOutcome::Unresponsive
            }
        }
    }
}

/// Own the child until it exits; kill it on request.
async fn reap(
    mut child: Child,
    mut kill_rx: mpsc::Receiver<()>,
    exit_tx: watch::Sender<Option<ExitInfo>>,
) {
    let mut kill_requested = false;
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            Some(()) = kill_rx.recv(), if !kill_requested => {
                kill_requested = true;
                if let Err(e) = child.start_kill() {
                    error!(pid = ?child.id(), error = %e, "failed to kill worker");
                }
            }
        }
    };

    let info = match status {
        Ok(status) => ExitInfo {
            code: status.code(),
            success: status.success(),
        },
        Err(e) => {
            error!(error = %e, "failed to wait for worker");
            ExitInfo {
                code: None,
                success: false,
            }
        }
    };
    debug!(%info, "worker reaped");
    let _ = exit_tx.send(Some(info));
}
