use std::{process::Stdio, time::Duration};

use tokio::process::Command;

use crate::error::ExecError;

/// Exit status plus fully captured output of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn first_stdout_line(&self) -> Option<&str> {
        self.stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
    }
}

pub fn display_command(program: &str, args: &[String]) -> String {
    let mut out = program.to_string();
    for a in args {
        out.push(' ');
        out.push_str(a);
    }
    out
}

/// Runs external programs to completion, capturing stdout and stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandExecutor;

impl CommandExecutor {
    /// Runs `program` with `args`; a non-zero exit is still `Ok`, callers
    /// decide what it means. The child is killed if `timeout` elapses.
    pub async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, ExecError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| ExecError::Launch {
            program: program.to_string(),
            source,
        })?;

        let waited = match timeout {
            Some(after) => match tokio::time::timeout(after, child.wait_with_output()).await {
                Ok(res) => res,
                Err(_) => {
                    tracing::warn!(
                        command = %display_command(program, args),
                        timeout_ms = after.as_millis() as u64,
                        "command timed out; killed"
                    );
                    return Err(ExecError::Timeout {
                        program: program.to_string(),
                        after,
                    });
                }
            },
            None => child.wait_with_output().await,
        };

        let output = waited.map_err(|source| ExecError::Io {
            program: program.to_string(),
            source,
        })?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
