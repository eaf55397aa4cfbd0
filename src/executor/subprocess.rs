//! Bounded subprocess execution.
//!
//! Programs are exec'd directly (no shell) under the C locale, with
//! captured output and a hard deadline after which the child is killed
//! and reaped.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{ControlErrorKind, DaemonError};

use super::timeout::sanitize_output;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Lines of stderr carried into a control error.
const STDERR_LINES: usize = 20;

/// Exit status and captured output of a finished process.
#[derive(Debug, Clone)]
pub struct SubprocessResult {
    pub success: bool,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl SubprocessResult {
    /// Turn a non-zero exit into a `ControlErrorKind::Failed` naming
    /// `unit` and `action`, with trimmed stderr.
    pub fn ensure_success(self, unit: &str, action: &str) -> Result<Self, DaemonError> {
        if self.success {
            return Ok(self);
        }

        let stderr = sanitize_output(&self.stderr, STDERR_LINES);
        warn!(
            unit = %unit,
            action = %action,
            exit_code = ?self.exit_code,
            stderr = %stderr,
            "Command failed"
        );
        Err(DaemonError::Control {
            kind: ControlErrorKind::Failed {
                unit: unit.to_string(),
                action: action.to_string(),
                exit_code: self.exit_code,
                stderr,
            },
        })
    }
}

/// Builder for one subprocess invocation.
pub struct SubprocessBuilder {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl SubprocessBuilder {
    /// A 5 second deadline applies unless `timeout` is called.
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.args.extend(args.into_iter().map(|s| s.as_ref().to_string()));
        self
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.args.push(arg.to_string());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run to completion or deadline.
    ///
    /// A non-zero exit is returned as a result, not an error. Spawn
    /// failures are `ControlErrorKind::Spawn`; a process still running at
    /// the deadline is killed and reported as `ControlErrorKind::Timeout`.
    /// Output is drained while waiting so a chatty child cannot stall on a
    /// full pipe.
    pub fn run(self) -> Result<SubprocessResult, DaemonError> {
        debug!(
            program = %self.program,
            args = ?self.args,
            timeout_ms = self.timeout.as_millis() as u64,
            "Executing subprocess"
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e.to_string()))?;

        let started = Instant::now();
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let status = self.wait_until_deadline(&mut child, started)?;

        let result = SubprocessResult {
            success: status.success(),
            exit_code: status.code(),
            stdout: collect(stdout),
            stderr: collect(stderr),
        };
        debug!(
            program = %self.program,
            exit_code = ?result.exit_code,
            duration_ms = started.elapsed().as_millis() as u64,
            "Subprocess finished"
        );
        Ok(result)
    }

    /// Poll until the child exits, killing and reaping it at the deadline.
    fn wait_until_deadline(&self, child: &mut Child, started: Instant) -> Result<ExitStatus, DaemonError> {
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) if started.elapsed() > self.timeout => {
                    warn!(
                        program = %self.program,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Process exceeded its deadline, killing"
                    );
                    if let Err(e) = child.kill() {
                        warn!(error = %e, "Failed to kill process");
                    }
                    let _ = child.wait();
                    return Err(DaemonError::Control {
                        kind: ControlErrorKind::Timeout {
                            unit: self.command_line(),
                            action: "run".to_string(),
                            timeout_secs: self.timeout.as_secs(),
                        },
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => return Err(self.spawn_error(format!("failed to poll process: {}", e))),
            }
        }
    }

    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn spawn_error(&self, message: String) -> DaemonError {
        DaemonError::Control {
            kind: ControlErrorKind::Spawn {
                program: self.program.clone(),
                message,
            },
        }
    }
}

/// Read a pipe to its end on a helper thread.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            if let Err(e) = pipe.read_to_end(&mut buf) {
                debug!(error = %e, "Pipe read ended early");
            }
            buf
        })
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}
