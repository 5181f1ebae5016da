//! Structured invocation of external tools.
//!
//! Every compiler, the lowering tool and every benchmarked executable is run
//! through [`ToolCommand`]: an explicit argument vector (never a shell
//! string), an explicit working directory, an explicit stream policy and an
//! exit-status check that maps onto [`CommandError`].

use std::ffi::{OsStr, OsString};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, error};

use crate::error::CommandError;

/// What happens to the child's stdout/stderr.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Streams {
    /// Capture both streams (build steps; stderr is reported on failure).
    #[default]
    Capture,
    /// Send both streams to the null device (benchmark runs).
    Discard,
}

/// Result of a successful invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Captured stdout (empty when discarded).
    pub stdout: String,
    /// Captured stderr (empty when discarded).
    pub stderr: String,
    /// Wall-clock time from spawn to exit.
    pub elapsed: Duration,
}

/// An external command invocation.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: OsString,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    streams: Streams,
    timeout: Option<Duration>,
}

impl ToolCommand {
    /// Create a command for `program` with no arguments.
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            cwd: None,
            streams: Streams::default(),
            timeout: None,
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Run in `dir` instead of the current directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    #[must_use]
    pub const fn streams(mut self, streams: Streams) -> Self {
        self.streams = streams;
        self
    }

    /// Kill the child if it has not exited after `timeout`.
    #[must_use]
    pub const fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn program(&self) -> &OsStr {
        &self.program
    }

    #[must_use]
    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    #[must_use]
    pub fn get_current_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Human-readable command line, for logs and error messages.
    #[must_use]
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(&self.args)
            .map(|part| {
                let part = part.to_string_lossy();
                if part.is_empty() || part.contains(char::is_whitespace) {
                    format!("'{part}'")
                } else {
                    part.into_owned()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).stdin(Stdio::null());
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        match self.streams {
            Streams::Capture => cmd.stdout(Stdio::piped()).stderr(Stdio::piped()),
            Streams::Discard => cmd.stdout(Stdio::null()).stderr(Stdio::null()),
        };
        cmd
    }

    /// Run to completion and check the exit status.
    ///
    /// # Errors
    /// Fails if the process cannot be spawned, exits non-zero, or exceeds
    /// the configured timeout.
    pub fn run(&self) -> Result<CommandOutput, CommandError> {
        let command = self.display();
        debug!(cwd = ?self.cwd, "{command}");

        let start = Instant::now();
        let mut child = self.to_command().spawn().map_err(|source| CommandError::Spawn {
            command: command.clone(),
            source,
        })?;

        let readers = PipeReaders::take(&mut child);
        let waited = match self.timeout {
            None => child.wait().map(|status| Some((status, start.elapsed()))),
            Some(timeout) => wait_with_timeout(child, start, timeout),
        };
        let (stdout, stderr) = readers.join();

        let (status, elapsed) = match waited {
            Ok(Some(exited)) => exited,
            Ok(None) => {
                let timeout = self.timeout.unwrap_or_default();
                error!(timeout_secs = timeout.as_secs_f64(), "{command} timed out");
                return Err(CommandError::TimedOut { command, timeout });
            }
            Err(source) => return Err(CommandError::Spawn { command, source }),
        };

        if !status.success() {
            if stderr.is_empty() {
                error!(status = %status, "{command}");
            } else {
                error!(status = %status, stderr = %stderr, "{command}");
            }
            return Err(CommandError::Exit {
                command,
                status,
                stderr,
            });
        }

        Ok(CommandOutput {
            stdout,
            stderr,
            elapsed,
        })
    }
}

/// Wait for `child` on a separate thread, killing it once `timeout` has
/// passed since `start`.
///
/// The exit instant is taken by the waiting thread, so the elapsed time is
/// the same as an untimed wait. Returns `Ok(None)` on timeout.
fn wait_with_timeout(
    mut child: Child,
    start: Instant,
    timeout: Duration,
) -> std::io::Result<Option<(ExitStatus, Duration)>> {
    let pid = i32::try_from(child.id())
        .map(Pid::from_raw)
        .map_err(std::io::Error::other)?;
    let (tx, rx) = mpsc::channel();
    let waiter = thread::spawn(move || {
        let exited = child.wait().map(|status| (status, start.elapsed()));
        let _ = tx.send(exited);
    });

    let remaining = timeout.saturating_sub(start.elapsed());
    match rx.recv_timeout(remaining) {
        Ok(exited) => {
            let _ = waiter.join();
            exited.map(Some)
        }
        Err(RecvTimeoutError::Timeout) => {
            let _ = signal::kill(pid, Signal::SIGKILL);
            let _ = waiter.join();
            Ok(None)
        }
        Err(RecvTimeoutError::Disconnected) => {
            let _ = waiter.join();
            Err(std::io::Error::other("child waiter exited without a status"))
        }
    }
}

/// Background readers draining captured pipes so a chatty child never blocks.
struct PipeReaders {
    stdout: Option<JoinHandle<String>>,
    stderr: Option<JoinHandle<String>>,
}

impl PipeReaders {
    fn take(child: &mut Child) -> Self {
        Self {
            stdout: child.stdout.take().map(|pipe| thread::spawn(move || drain(pipe))),
            stderr: child.stderr.take().map(|pipe| thread::spawn(move || drain(pipe))),
        }
    }

    fn join(self) -> (String, String) {
        let join = |handle: Option<JoinHandle<String>>| {
            handle
                .and_then(|h| h.join().ok())
                .unwrap_or_default()
        };
        (join(self.stdout), join(self.stderr))
    }
}

fn drain(mut pipe: impl Read) -> String {
    let mut bytes = Vec::new();
    let _ = pipe.read_to_end(&mut bytes);
    String::from_utf8_lossy(&bytes).into_owned()
}
