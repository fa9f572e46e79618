//! Allow-listed subprocess execution inside the sandbox root.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use super::path::PathSandbox;
use crate::errors::SandboxError;

/// Timeout applied when the caller does not pass one.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Captured result of a finished command.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CommandOutput {
    pub command: String,
    pub args: Vec<String>,
    /// `-1` when the process was terminated by a signal
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs allow-listed programs with a working directory confined to the root.
#[derive(Debug, Clone)]
pub struct CommandSandbox {
    paths: PathSandbox,
    allowed: HashSet<String>,
    default_timeout: Duration,
}

impl CommandSandbox {
    pub fn new<I, S>(root: impl Into<PathBuf>, allowed_commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: PathSandbox::new(root),
            allowed: allowed_commands.into_iter().map(Into::into).collect(),
            default_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        self.paths.root()
    }

    pub fn is_allowed(&self, command: &str) -> bool {
        self.allowed.contains(command)
    }

    /// The allow-list, sorted.
    pub fn allowed_commands(&self) -> Vec<&str> {
        let mut commands: Vec<&str> = self.allowed.iter().map(String::as_str).collect();
        commands.sort_unstable();
        commands
    }

    /// Run `command` with `args` in `cwd` (relative to the root; the root
    /// itself when `None`). The process is killed if it outlives `timeout`.
    pub async fn run(
        &self,
        command: &str,
        args: &[String],
        cwd: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, SandboxError> {
        self.run_with_cancel(command, args, cwd, timeout, &CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), but also kills the process as soon as
    /// `cancel` fires.
    ///
    /// The deadline covers draining the output pipes too, so a background
    /// process that inherits them cannot stretch the call. On Unix the
    /// command leads its own process group and the whole group is killed.
    pub async fn run_with_cancel(
        &self,
        command: &str,
        args: &[String],
        cwd: Option<&str>,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, SandboxError> {
        if !self.is_allowed(command) {
            tracing::warn!(command = %command, "Rejected command not in allow-list");
            return Err(SandboxError::CommandValidation {
                command: command.to_string(),
            });
        }

        let working_dir = self.paths.resolve(cwd.unwrap_or(""))?;
        let timeout = timeout.unwrap_or(self.default_timeout);

        tracing::debug!(
            command = %command,
            args = ?args,
            cwd = %working_dir.display(),
            timeout_secs = timeout.as_secs_f64(),
            "Spawning sandboxed command"
        );

        let mut cmd = Command::new(command);
        cmd.args(args)
            .current_dir(&working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| SandboxError::io(&working_dir, e))?;
        // `Child::id` is gone once the child is reaped; the group may outlive it.
        let pid = child.id();

        // Drain both pipes concurrently so a chatty process cannot fill one
        // pipe and deadlock while we wait on the other.
        let stdout_task = spawn_reader(child.stdout.take());
        let stderr_task = spawn_reader(child.stderr.take());
        let readers: Vec<AbortHandle> = stdout_task
            .iter()
            .chain(stderr_task.iter())
            .map(|task| task.abort_handle())
            .collect();

        let outcome = tokio::select! {
            finished = wait_and_collect(&mut child, stdout_task, stderr_task) => Some(finished),
            _ = tokio::time::sleep(timeout) => None,
            _ = cancel.cancelled() => None,
        };

        let Some(finished) = outcome else {
            terminate(&mut child, pid, command).await;
            readers.iter().for_each(AbortHandle::abort);
            if cancel.is_cancelled() {
                return Err(SandboxError::CommandCancelled {
                    command: command.to_string(),
                });
            }
            tracing::warn!(command = %command, timeout_secs = timeout.as_secs_f64(), "Command timed out");
            return Err(SandboxError::CommandTimeout {
                command: command.to_string(),
                timeout,
            });
        };

        let (status, stdout, stderr) = finished.map_err(|e| SandboxError::io(&working_dir, e))?;
        Ok(CommandOutput {
            command: command.to_string(),
            args: args.to_vec(),
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }
}

type ReaderTask = tokio::task::JoinHandle<Vec<u8>>;

fn spawn_reader<R>(pipe: Option<R>) -> Option<ReaderTask>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    pipe.map(|mut pipe| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            // A read error only truncates the captured stream.
            let _ = pipe.read_to_end(&mut buf).await;
            buf
        })
    })
}

async fn collect(task: Option<ReaderTask>) -> String {
    match task {
        Some(task) => String::from_utf8_lossy(&task.await.unwrap_or_default()).into_owned(),
        None => String::new(),
    }
}

/// Exit status plus both streams, once the process has exited and every
/// holder of its pipes has closed them.
async fn wait_and_collect(
    child: &mut Child,
    stdout_task: Option<ReaderTask>,
    stderr_task: Option<ReaderTask>,
) -> std::io::Result<(ExitStatus, String, String)> {
    let status = child.wait().await?;
    let (stdout, stderr) = tokio::join!(collect(stdout_task), collect(stderr_task));
    Ok((status, stdout, stderr))
}

/// Kill the command (with its process group on Unix) and reap it so no
/// zombie or orphan is left behind.
async fn terminate(child: &mut Child, pid: Option<u32>, command: &str) {
    #[cfg(unix)]
    kill_process_group(pid, command);
    #[cfg(not(unix))]
    let _ = pid;

    if let Err(e) = child.kill().await {
        // Already reaped when only a grandchild kept the pipes open.
        if e.kind() != std::io::ErrorKind::InvalidInput {
            tracing::warn!(command = %command, error = %e, "Failed to kill command");
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>, command: &str) {
    let Some(pid) = pid else {
        return;
    };
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // The child was spawned with `process_group(0)`, so its pid is the pgid.
    let result = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if result == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            tracing::warn!(command = %command, error = %err, "Failed to kill process group");
        }
    }
}
