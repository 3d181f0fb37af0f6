// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External process execution.
//!
//! Every piece of anvil that needs an outside tool, mostly the Git binary,
//! goes through [`Syscall`]. A syscall always runs with an explicit working
//! directory instead of changing the working directory of the current
//! process, and always runs under a bounded timeout.
//!
//! A non-zero exit status is __not__ an error here. Callers receive the exit
//! code along with captured stdout and stderr, and decide for themselves what
//! a failure means. Only infrastructure problems are errors: the program could
//! not be started, its output could not be collected, or it ran past its
//! timeout. In the timeout case the process, and on Unix its entire process
//! group, is killed before the error is returned.

use std::{
    ffi::OsString,
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
};
use tracing::{debug, instrument};

/// Default upper bound for any single external command.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Builder for one external command invocation.
#[derive(Debug, Clone)]
pub struct Syscall {
    program: OsString,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    current_dir: Option<PathBuf>,
    timeout: Duration,
}

impl Syscall {
    /// Construct new syscall for target program.
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append a listing of arguments.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set environment variable for the child process only.
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Run the child process inside target directory.
    pub fn current_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.current_dir = Some(path.as_ref().to_path_buf());
        self
    }

    /// Replace the default timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Execute the command, and wait for it to exit or time out.
    ///
    /// # Errors
    ///
    /// - Return [`SyscallError::Spawn`] if the process cannot be started.
    /// - Return [`SyscallError::Collect`] if output cannot be read.
    /// - Return [`SyscallError::Timeout`] if the timeout elapsed, after the
    ///   process has been killed.
    #[instrument(skip(self), fields(program = ?self.program, args = ?self.args), level = "debug")]
    pub async fn run(self) -> Result<SyscallOutput> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.envs {
            command.env(key, value);
        }
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        // INVARIANT: Child leads its own process group so a timeout can take
        // out helpers it spawned, e.g., ssh or git-remote-https.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| SyscallError::Spawn {
            program: self.to_string(),
            source,
        })?;

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        // INVARIANT: Both pipes drain together, otherwise a child filling one
        // pipe blocks while we wait for EOF on the other.
        let collect = async {
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            tokio::try_join!(
                drain(stdout_pipe.as_mut(), &mut stdout),
                drain(stderr_pipe.as_mut(), &mut stderr),
            )?;
            Ok::<_, std::io::Error>((stdout, stderr))
        };
        let waited = async {
            let (stdout, stderr) = collect.await?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, stdout, stderr))
        };

        let (status, stdout, stderr) = match tokio::time::timeout(self.timeout, waited).await {
            Ok(Ok(done)) => done,
            Ok(Err(source)) => {
                return Err(SyscallError::Collect {
                    program: self.to_string(),
                    source,
                })
            }
            Err(_) => {
                kill_tree(&mut child).await;
                return Err(SyscallError::Timeout {
                    program: self.to_string(),
                    timeout: self.timeout,
                });
            }
        };

        let output = SyscallOutput {
            exit_code: status.code(),
            stdout: chomp(String::from_utf8_lossy(&stdout).into_owned()),
            stderr: chomp(String::from_utf8_lossy(&stderr).into_owned()),
        };
        debug!(exit_code = ?output.exit_code, "syscall finished");

        Ok(output)
    }
}

impl Display for Syscall {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(fmt, " {}", arg.to_string_lossy())?;
        }

        Ok(())
    }
}

/// Captured result of a finished external command.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyscallOutput {
    /// Exit code, or `None` if the process was terminated by a signal.
    pub exit_code: Option<i32>,

    /// Standard output with trailing newlines chomped.
    pub stdout: String,

    /// Standard error with trailing newlines chomped.
    pub stderr: String,
}

impl SyscallOutput {
    /// Command exited with status zero.
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Best diagnostic text the command produced.
    ///
    /// Prefers stderr, since that is where Git reports failures, and falls
    /// back to stdout.
    pub fn diagnostic(&self) -> &str {
        if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        }
    }
}

async fn drain(
    pipe: Option<&mut (impl AsyncRead + Unpin)>,
    buffer: &mut Vec<u8>,
) -> std::io::Result<usize> {
    match pipe {
        Some(pipe) => pipe.read_to_end(buffer).await,
        None => Ok(0),
    }
}

async fn kill_tree(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // INVARIANT: Negative PID addresses the process group led by child.
        let _ = Command::new("kill")
            .arg("-KILL")
            .arg("--")
            .arg(format!("-{pid}"))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
    }

    let _ = child.kill().await;
}

fn chomp(message: String) -> String {
    message
        .strip_suffix("\r\n")
        .or(message.strip_suffix('\n'))
        .map(ToString::to_string)
        .unwrap_or(message)
}

/// External process execution error types.
#[derive(Debug, thiserror::Error)]
pub enum SyscallError {
    /// Process could not be started at all.
    #[error("failed to start `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Output of a running process could not be collected.
    #[error("failed to collect output of `{program}`")]
    Collect {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Process ran longer than allowed and was killed.
    #[error("`{program}` timed out after {}s", timeout.as_secs())]
    Timeout { program: String, timeout: Duration },
}

/// Friendly result alias :3
pub type Result<T, E = SyscallError> = std::result::Result<T, E>;
