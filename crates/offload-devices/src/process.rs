//! External-process runner shared by every device step.
//!
//! An [`Invocation`] is one program plus its arguments and a time bound. It
//! always runs with stdin closed and stdout/stderr captured; the combined
//! output (stdout first, then stderr) is returned on success and carried
//! verbatim in [`ProcessError::Failed`] otherwise.
//!
//! The wait races the step timeout and a [`CancellationToken`]. Whichever
//! fires first abandons the wait, and `kill_on_drop` takes the child down
//! with it, so a hung `mount` or `ffmpeg` never outlives its task.

use std::ffi::{OsStr, OsString};
use std::process::{Output, Stdio};
use std::time::Duration;

use offload_core::ProcessError;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Upper bound used when a caller does not set one.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct Invocation {
    program: String,
    args: Vec<OsString>,
    timeout: Duration,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run to completion. Non-zero exit is an error carrying the output.
    pub async fn run(self, cancel: &CancellationToken) -> Result<String, ProcessError> {
        let output = self.execute(cancel).await?;
        let combined = combined_output(&output);
        if output.status.success() {
            Ok(combined)
        } else {
            Err(ProcessError::Failed {
                program: self.program,
                status: output.status.to_string(),
                output: combined,
            })
        }
    }

    /// Run and report only whether the program exited successfully.
    ///
    /// For predicates like `mountpoint -q`, where a non-zero exit is an
    /// answer rather than a failure.
    pub async fn probe(self, cancel: &CancellationToken) -> Result<bool, ProcessError> {
        Ok(self.execute(cancel).await?.status.success())
    }

    async fn execute(&self, cancel: &CancellationToken) -> Result<Output, ProcessError> {
        tracing::debug!(program = %self.program, args = ?self.args, "spawning");

        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        tokio::select! {
            waited = tokio::time::timeout(self.timeout, child.wait_with_output()) => match waited {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(source)) => Err(ProcessError::Spawn {
                    program: self.program.clone(),
                    source,
                }),
                Err(_) => Err(ProcessError::TimedOut {
                    program: self.program.clone(),
                    after: self.timeout,
                }),
            },
            _ = cancel.cancelled() => Err(ProcessError::Cancelled {
                program: self.program.clone(),
            }),
        }
    }
}

fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}
