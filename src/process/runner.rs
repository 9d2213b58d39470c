//! Guarded execution of external commands
//!
//! Children are spawned in their own process group so a timeout or a
//! manual kill terminates the whole tree, not just the direct child.
//! Timeouts never rely on the child's cooperation: SIGTERM, a short
//! grace period, then SIGKILL to the group.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::guard;

/// Default per-command timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace between SIGTERM and SIGKILL during a tree kill
const KILL_GRACE: Duration = Duration::from_millis(100);

/// Error types for process execution
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Blocked command ({pattern}): {command}")]
    Blocked { command: String, pattern: String },

    #[error("Command timed out after {timeout:?}: {command}")]
    Timeout {
        command: String,
        timeout: Duration,
        stdout: String,
        stderr: String,
    },

    #[error("Command failed with exit code {exit_code}: {command}")]
    Failed {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProcessError {
    /// Captured stderr, when the error carries output
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::Timeout { stderr, .. } | Self::Failed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }

    /// Captured stdout, when the error carries output
    pub fn stdout(&self) -> Option<&str> {
        match self {
            Self::Timeout { stdout, .. } | Self::Failed { stdout, .. } => Some(stdout),
            _ => None,
        }
    }
}

/// Options for a single command execution
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Working directory (inherited if unset)
    pub cwd: Option<PathBuf>,

    /// Extra environment variables
    pub env: Vec<(String, String)>,

    /// Run through `sh -c` instead of direct exec
    pub shell: bool,

    /// Wall-clock budget for the command
    pub timeout: Duration,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            env: Vec::new(),
            shell: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ProcessOptions {
    pub fn in_dir(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: Some(cwd.into()),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_shell(mut self) -> Self {
        self.shell = true;
        self
    }
}

/// Outcome of a completed command
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub killed: bool,
}

impl ProcessResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.killed
    }
}

/// A chunk of streamed output
#[derive(Debug, Clone)]
pub enum OutputChunk {
    Stdout(String),
    Stderr(String),
}

/// Terminate a process tree by signalling its process group
#[cfg(unix)]
pub async fn kill_tree(pid: u32) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = Pid::from_raw(pid as i32);
    let _ = killpg(pgid, Signal::SIGTERM);
    tokio::time::sleep(KILL_GRACE).await;
    let _ = killpg(pgid, Signal::SIGKILL);
}

#[cfg(not(unix))]
pub async fn kill_tree(_pid: u32) {
    // Process-group semantics are unix-only; kill_on_drop covers the child
}

/// Executes external commands with screening, timeouts, and tree kill
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    fn build_command(&self, command: &str, options: &ProcessOptions) -> Result<Command, ProcessError> {
        let mut cmd = if options.shell {
            let mut c = Command::new("sh");
            c.arg("-c").arg(command);
            c
        } else {
            let tokens = guard::tokenize_shell(command);
            let Some((program, args)) = tokens.split_first() else {
                return Err(ProcessError::Spawn {
                    command: command.to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
                });
            };
            let mut c = Command::new(program);
            c.args(args);
            c
        };

        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        Ok(cmd)
    }

    /// Run a command to completion, collecting output
    ///
    /// A timeout kills the process tree and surfaces `ProcessError::Timeout`
    /// with whatever output was captured. A non-zero exit surfaces
    /// `ProcessError::Failed`.
    pub async fn run(&self, command: &str, options: ProcessOptions) -> Result<ProcessResult, ProcessError> {
        guard::screen(command).map_err(|pattern| ProcessError::Blocked {
            command: command.to_string(),
            pattern,
        })?;

        let timeout = options.timeout;
        debug!(%command, ?timeout, "ProcessRunner::run");

        let mut cmd = self.build_command(command, &options)?;
        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            command: command.to_string(),
            source,
        })?;
        let pid = child.id().unwrap_or_default();

        let stdout_task = spawn_collector(child.stdout.take());
        let stderr_task = spawn_collector(child.stderr.take());

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(source)) => {
                return Err(ProcessError::Spawn {
                    command: command.to_string(),
                    source,
                });
            }
            Err(_elapsed) => {
                warn!(%command, pid, "Command exceeded timeout, killing process tree");
                kill_tree(pid).await;
                let _ = child.wait().await;
                None
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let duration = start.elapsed();

        match status {
            None => Err(ProcessError::Timeout {
                command: command.to_string(),
                timeout,
                stdout,
                stderr,
            }),
            Some(status) => {
                let exit_code = status.code().unwrap_or(-1);
                if exit_code == 0 {
                    Ok(ProcessResult {
                        exit_code,
                        stdout,
                        stderr,
                        duration,
                        killed: false,
                    })
                } else {
                    Err(ProcessError::Failed {
                        command: command.to_string(),
                        exit_code,
                        stdout,
                        stderr,
                    })
                }
            }
        }
    }

    /// Run a command, streaming output line-by-line through a channel
    ///
    /// Unlike [`run`](Self::run), a killed process (timeout or manual
    /// `kill()`) resolves successfully with `killed = true`.
    pub async fn run_streaming(
        &self,
        command: &str,
        options: ProcessOptions,
    ) -> Result<StreamingHandle, ProcessError> {
        guard::screen(command).map_err(|pattern| ProcessError::Blocked {
            command: command.to_string(),
            pattern,
        })?;

        let timeout = options.timeout;
        debug!(%command, ?timeout, "ProcessRunner::run_streaming");

        let mut cmd = self.build_command(command, &options)?;
        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            command: command.to_string(),
            source,
        })?;
        let pid = child.id().unwrap_or_default();

        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();
        let killed = Arc::new(AtomicBool::new(false));

        let stdout_task = spawn_streamer(child.stdout.take(), chunk_tx.clone(), OutputChunk::Stdout);
        let stderr_task = spawn_streamer(child.stderr.take(), chunk_tx, OutputChunk::Stderr);

        let killed_flag = killed.clone();
        let command_owned = command.to_string();
        tokio::spawn(async move {
            let status = match tokio::time::timeout(timeout, child.wait()).await {
                Ok(Ok(status)) => Some(status),
                Ok(Err(_)) => None,
                Err(_elapsed) => {
                    warn!(command = %command_owned, pid, "Streaming command exceeded timeout, killing tree");
                    killed_flag.store(true, Ordering::SeqCst);
                    kill_tree(pid).await;
                    let _ = child.wait().await;
                    None
                }
            };

            let stdout = stdout_task.await.unwrap_or_default();
            let stderr = stderr_task.await.unwrap_or_default();
            let killed = killed_flag.load(Ordering::SeqCst);

            let result = ProcessResult {
                exit_code: status.and_then(|s| s.code()).unwrap_or(-1),
                stdout,
                stderr,
                duration: start.elapsed(),
                killed,
            };
            let _ = done_tx.send(result);
        });

        Ok(StreamingHandle {
            command: command.to_string(),
            pid,
            chunks: chunk_rx,
            killed,
            done: done_rx,
        })
    }
}

/// Handle to a streaming command
pub struct StreamingHandle {
    command: String,
    /// OS process ID (also the process-group ID)
    pub pid: u32,
    /// Line-oriented output; closed when the process exits
    pub chunks: mpsc::UnboundedReceiver<OutputChunk>,
    killed: Arc<AtomicBool>,
    done: oneshot::Receiver<ProcessResult>,
}

impl StreamingHandle {
    /// Kill the process tree; `wait` will resolve with `killed = true`
    pub async fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
        kill_tree(self.pid).await;
    }

    /// Wait for the process to finish
    ///
    /// Killed processes (manual or timeout) resolve `Ok` with
    /// `killed = true`; only an un-killed non-zero exit is an error.
    pub async fn wait(self) -> Result<ProcessResult, ProcessError> {
        let result = self.done.await.map_err(|_| ProcessError::Spawn {
            command: self.command.clone(),
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "process driver dropped"),
        })?;

        if !result.killed && result.exit_code != 0 {
            return Err(ProcessError::Failed {
                command: self.command,
                exit_code: result.exit_code,
                stdout: result.stdout,
                stderr: result.stderr,
            });
        }
        Ok(result)
    }
}

fn spawn_collector<R>(reader: Option<R>) -> tokio::task::JoinHandle<String>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut out = String::new();
        if let Some(reader) = reader {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                out.push_str(&line);
                out.push('\n');
            }
        }
        out
    })
}

fn spawn_streamer<R>(
    reader: Option<R>,
    tx: mpsc::UnboundedSender<OutputChunk>,
    wrap: fn(String) -> OutputChunk,
) -> tokio::task::JoinHandle<String>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut out = String::new();
        if let Some(reader) = reader {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                out.push_str(&line);
                out.push('\n');
                let _ = tx.send(wrap(line));
            }
        }
        out
    })
}
