//! External command execution with timeouts.
//!
//! Signature checks and the instance inventory are delegated to external
//! tools (`cosign`, `kubectl`). This module wraps process spawning behind the
//! [`CommandExecutor`] trait so callers can be tested without the tools
//! installed, and bounds every invocation by a timeout so a hung tool cannot
//! outlive the run's deadline.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use wait_timeout::ChildExt;

/// Errors arising from running an external command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The program could not be started (usually: not installed).
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// The program that failed to start.
        program: String,
        /// The underlying spawn error.
        #[source]
        source: std::io::Error,
    },

    /// The program did not exit within its timeout and was killed.
    #[error("{program} timed out after {}s", .timeout.as_secs())]
    TimedOut {
        /// The program that was killed.
        program: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// Waiting for the program or collecting its output failed.
    #[error("I/O error while running {program}: {source}")]
    Io {
        /// The program being run.
        program: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Abstraction for running external commands.
#[cfg_attr(test, mockall::automock)]
pub trait CommandExecutor {
    /// Run `program` with `args`, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Spawn`] when the program cannot be started,
    /// [`CommandError::TimedOut`] when it outlives `timeout`, and
    /// [`CommandError::Io`] when its output cannot be collected.
    fn run(&self, program: &str, args: &[String], timeout: Duration)
    -> Result<Output, CommandError>;
}

/// Executes commands on the host system.
///
/// # Examples
///
/// ```no_run
/// use modpull::command::{CommandExecutor, SystemCommandExecutor};
/// use std::time::Duration;
///
/// let executor = SystemCommandExecutor;
/// let output = executor.run("cosign", &["version".to_owned()], Duration::from_secs(10))?;
/// assert!(output.status.success());
/// # Ok::<(), modpull::command::CommandError>(())
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandExecutor;

impl CommandExecutor for SystemCommandExecutor {
    fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<Output, CommandError> {
        log::debug!("running {program} {}", args.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CommandError::Spawn {
                program: program.to_owned(),
                source,
            })?;

        // Drain both pipes while waiting so a chatty child cannot block on a
        // full pipe buffer.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = wait_or_kill(&mut child, program, timeout)?;

        Ok(Output {
            status,
            stdout: join_drain(stdout, program)?,
            stderr: join_drain(stderr, program)?,
        })
    }
}

fn wait_or_kill(
    child: &mut Child,
    program: &str,
    timeout: Duration,
) -> Result<ExitStatus, CommandError> {
    let io_error = |source| CommandError::Io {
        program: program.to_owned(),
        source,
    };

    match child.wait_timeout(timeout).map_err(io_error)? {
        Some(status) => Ok(status),
        None => {
            if let Err(e) = child.kill() {
                log::debug!("failed to kill {program}: {e}");
            }
            child.wait().map_err(io_error)?;
            Err(CommandError::TimedOut {
                program: program.to_owned(),
                timeout,
            })
        }
    }
}

type DrainHandle = Option<JoinHandle<std::io::Result<Vec<u8>>>>;

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> DrainHandle {
    pipe.map(|mut reader| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            reader.read_to_end(&mut buffer)?;
            Ok(buffer)
        })
    })
}

fn join_drain(drained: DrainHandle, program: &str) -> Result<Vec<u8>, CommandError> {
    let Some(handle) = drained else {
        return Ok(Vec::new());
    };
    let joined = handle.join().unwrap_or_else(|_| {
        Err(std::io::Error::other("output reader thread panicked"))
    });
    joined.map_err(|source| CommandError::Io {
        program: program.to_owned(),
        source,
    })
}

/// Return the trimmed, lossily decoded stderr of `output`, falling back to
/// the exit status when the tool printed nothing.
#[must_use]
pub fn failure_summary(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        format!("exited with {}", output.status)
    } else {
        trimmed.to_owned()
    }
}
