//! Instrumented wrappers around subprocess invocation.
//!
//! Every OS mutation, query and daemon launch goes through the
//! [`CommandRunner`] trait so the invoked command line and its exit status
//! show up in the operator's log, and so tests can substitute a recording
//! fake for the real system.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::error::{LocalnetError, Result};

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion; a non-zero exit is an error.
    async fn run(&self, argv: &[&str]) -> Result<()>;

    /// Run to completion and return the combined stdout/stderr text;
    /// a non-zero exit is an error carrying the stderr text.
    async fn output(&self, argv: &[&str]) -> Result<String>;

    /// Spawn a long-running daemon with its output piped for capture.
    fn spawn(&self, argv: &[&str]) -> Result<Daemon>;
}

/// Runs commands against the real system.
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, argv: &[&str]) -> Result<()> {
        self.output(argv).await.map(|_| ())
    }

    async fn output(&self, argv: &[&str]) -> Result<String> {
        let (program, command) = split_argv(argv)?;
        info!("run: {command}");

        let output = Command::new(program)
            .args(&argv[1..])
            .output()
            .await
            .map_err(|err| LocalnetError::CommandUnavailable {
                command: command.clone(),
                message: err.to_string(),
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            warn!("done: {command} ({})", output.status);
            if stderr.contains("Operation not permitted") || stderr.contains("Permission denied") {
                return Err(LocalnetError::PermissionDenied);
            }
            return Err(LocalnetError::CommandFailed {
                command,
                code: output.status.code(),
                message: stderr.trim().to_string(),
            });
        }
        debug!("done: {command} ({})", output.status);

        // Several of the wrapped tools (dhcpd among them) report their
        // version on stderr, so callers get both streams.
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        if !stderr.trim().is_empty() {
            combined.push_str(&stderr);
        }
        Ok(combined)
    }

    fn spawn(&self, argv: &[&str]) -> Result<Daemon> {
        let (program, command) = split_argv(argv)?;
        info!("spawn: {command}");

        let child = Command::new(program)
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| LocalnetError::CommandUnavailable {
                command: command.clone(),
                message: err.to_string(),
            })?;

        Ok(Daemon {
            command,
            child: Some(child),
        })
    }
}

fn split_argv<'a>(argv: &[&'a str]) -> Result<(&'a str, String)> {
    match argv.first() {
        Some(program) => Ok((*program, argv.join(" "))),
        None => Err(LocalnetError::CommandUnavailable {
            command: String::new(),
            message: "empty command line".into(),
        }),
    }
}

/// Handle to a spawned long-running subprocess.
pub struct Daemon {
    command: String,
    child: Option<Child>,
}

impl Daemon {
    /// Take the piped output streams for capture registration.
    pub fn take_output(&mut self) -> (Option<ChildStdout>, Option<ChildStderr>) {
        match &mut self.child {
            Some(child) => (child.stdout.take(), child.stderr.take()),
            None => (None, None),
        }
    }

    /// SIGTERM the daemon and wait until it has exited.
    pub async fn terminate(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        if let Some(pid) = child.id() {
            unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        }
        let status = child.wait().await?;
        debug!("daemon exited: {} ({status})", self.command);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn detached(command: String) -> Self {
        Self {
            command,
            child: None,
        }
    }
}
