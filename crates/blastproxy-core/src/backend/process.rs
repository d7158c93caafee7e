//! Backend process lifecycle

use std::fmt;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::BackendTarget;
use crate::error::{ProxyError, ProxyResult};
use crate::ledger::{LedgerEntry, ResourceKind, SharedLedger};

/// How a backend process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendExit {
    /// Exit code, `None` when ended by a signal
    pub code: Option<i32>,
    /// The proxy killed it during teardown
    pub killed_by_proxy: bool,
}

impl BackendExit {
    fn from_status(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            killed_by_proxy: false,
        }
    }

    fn killed() -> Self {
        Self {
            code: None,
            killed_by_proxy: true,
        }
    }
}

impl fmt::Display for BackendExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.killed_by_proxy, self.code) {
            (true, _) => write!(f, "killed by proxy"),
            (false, Some(code)) => write!(f, "exit code {}", code),
            (false, None) => write!(f, "terminated by signal"),
        }
    }
}

/// A running backend emulator owned by one session
pub struct BackendProcess {
    child: Child,
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    exit: Option<BackendExit>,
    entry: Option<LedgerEntry>,
}

impl BackendProcess {
    /// Start the backend and record it in the ledger
    ///
    /// The ledger entry exists before this returns, so any failure later in
    /// session setup still goes through the normal release path.
    pub fn spawn(target: &BackendTarget, ledger: &SharedLedger) -> ProxyResult<Self> {
        if !target.has_executable() {
            return Err(ProxyError::spawn_failed(
                &target.executable,
                "backend executable is not configured",
            ));
        }

        let mut cmd = Command::new(&target.executable);
        cmd.args(target.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| ProxyError::spawn_failed(&target.executable, e.to_string()))?;

        let pid = child.id();
        let entry = ledger.track(
            ResourceKind::Process,
            format!("{} (pid {:?})", target.executable.display(), pid),
        );

        if let Some(stderr) = child.stderr.take() {
            spawn_log_drain(stderr, pid, "stderr");
        }

        info!(
            "Backend '{}' started with PID {:?} for image '{}'",
            target.executable.display(),
            pid,
            target.image.display()
        );

        Ok(Self {
            stdin: child.stdin.take(),
            stdout: child.stdout.take(),
            child,
            pid,
            exit: None,
            entry: Some(entry),
        })
    }

    /// Process ID, if the OS reported one
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Hand over stdin/stdout for use as the relay channel
    pub(crate) fn take_stdio(&mut self) -> Option<(ChildStdin, ChildStdout)> {
        match (self.stdin.take(), self.stdout.take()) {
            (Some(stdin), Some(stdout)) => Some((stdin, stdout)),
            (stdin, stdout) => {
                self.stdin = stdin;
                self.stdout = stdout;
                None
            }
        }
    }

    /// Log stdout instead of relaying it, keeping the pipe from filling up
    pub(crate) fn drain_stdout(&mut self) {
        if let Some(stdout) = self.stdout.take() {
            spawn_log_drain(stdout, self.pid, "stdout");
        }
    }

    /// Wait for the process to end on its own
    ///
    /// Cancel safe; may be polled again after a previous call was dropped.
    pub async fn wait(&mut self) -> BackendExit {
        if let Some(exit) = self.exit {
            return exit;
        }

        let exit = match self.child.wait().await {
            Ok(status) => BackendExit::from_status(status),
            Err(e) => {
                warn!("Failed to wait for backend PID {:?}: {}", self.pid, e);
                BackendExit {
                    code: None,
                    killed_by_proxy: false,
                }
            }
        };
        self.exit = Some(exit);
        exit
    }

    /// Whether the process is still running
    pub fn is_running(&mut self) -> bool {
        if self.exit.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.exit = Some(BackendExit::from_status(status));
                false
            }
            Ok(None) => true,
            Err(_) => false,
        }
    }

    /// Force the process down if still running and release its ledger entry
    ///
    /// This is the only place the entry is released.
    pub async fn terminate(mut self) -> BackendExit {
        let exit = if self.is_running() {
            debug!("Killing backend PID {:?}", self.pid);
            if let Err(e) = self.child.kill().await {
                warn!("Failed to kill backend PID {:?}: {}", self.pid, e);
            }
            BackendExit::killed()
        } else {
            self.exit.unwrap_or(BackendExit {
                code: None,
                killed_by_proxy: false,
            })
        };

        self.stdin.take();
        self.stdout.take();

        if let Some(entry) = self.entry.take() {
            entry.release();
        }

        info!("Backend PID {:?} closed ({})", self.pid, exit);
        exit
    }
}

impl fmt::Debug for BackendProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendProcess")
            .field("pid", &self.pid)
            .field("exit", &self.exit)
            .finish()
    }
}

fn spawn_log_drain<R>(pipe: R, pid: Option<u32>, stream: &'static str)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!("backend {:?} {}: {}", pid, stream, line);
        }
    });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::ledger::Ledger;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn script(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("backend.sh");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn test_spawn_missing_executable() {
        let ledger = Ledger::new();
        let target = BackendTarget::new("/nonexistent/blastem", "sonic.bin");

        let err = BackendProcess::spawn(&target, &ledger).unwrap_err();
        assert_eq!(err.error_code(), "PROXY_SPAWN_FAILED");
        assert_eq!(ledger.stats().processes_tracked, 0);
    }

    #[tokio::test]
    async fn test_spawn_unset_executable() {
        let ledger = Ledger::new();
        let err = BackendProcess::spawn(&BackendTarget::new("", "sonic.bin"), &ledger).unwrap_err();
        assert!(err.to_string().contains("not configured"));
        assert_eq!(ledger.stats().processes_tracked, 0);
    }

    #[tokio::test]
    async fn test_terminate_kills_running_process() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::new();
        let target = BackendTarget::new("sh", script(&dir, "sleep 30\n"));
        let mut process = BackendProcess::spawn(&target, &ledger).unwrap();

        assert!(process.is_running());
        assert_eq!(ledger.stats().live_processes, 1);

        let exit = process.terminate().await;
        assert!(exit.killed_by_proxy);
        assert!(ledger.stats().is_clean());
        assert_eq!(ledger.stats().processes_released, 1);
    }

    #[tokio::test]
    async fn test_wait_then_terminate_does_not_kill() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::new();
        let target = BackendTarget::new("sh", script(&dir, "exit 3\n"));
        let mut process = BackendProcess::spawn(&target, &ledger).unwrap();

        let exit = process.wait().await;
        assert_eq!(exit.code, Some(3));
        assert!(!exit.killed_by_proxy);

        let exit = process.terminate().await;
        assert_eq!(exit.code, Some(3));
        assert!(ledger.stats().is_clean());
    }
}
