//! Thin wrapper over the container runtime CLI (`docker` or a compatible binary).

use std::{process::Stdio, time::Duration};

use hangar_container::{ContainerAction, ProcessIdentity};
use tokio::process::Command;

use crate::config::RuntimeConfig;
use crate::error::{OrchestratorError, Result};
use crate::executor::{CommandExecutor, CommandOutput, display_command};

/// Rejects identities that could be read as flags or carry shell metacharacters.
pub fn validate_identity(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(OrchestratorError::InvalidInput(
            "container identity must be non-empty".to_string(),
        ));
    }
    if id.len() > 128 {
        return Err(OrchestratorError::InvalidInput(
            "container identity exceeds maximum length".to_string(),
        ));
    }
    if id.starts_with('-')
        || !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(OrchestratorError::InvalidInput(format!(
            "container identity '{id}' contains invalid characters"
        )));
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn set_parent_death_signal() -> std::io::Result<()> {
    // Attach clients must not outlive the agent.
    let rc = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) };
    if rc == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Runs in the child after stdio is wired up: fd 2 becomes a copy of fd 1.
#[cfg(unix)]
fn merge_stderr_into_stdout() -> std::io::Result<()> {
    let rc = unsafe { libc::dup2(libc::STDOUT_FILENO, libc::STDERR_FILENO) };
    if rc == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ContainerRuntime {
    binary: String,
    executor: CommandExecutor,
    command_timeout: Duration,
    stats_timeout: Duration,
}

impl ContainerRuntime {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            binary: config.runtime_bin.clone(),
            executor: CommandExecutor,
            command_timeout: config.command_timeout,
            stats_timeout: config.stats_timeout,
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Runs a verb without interpreting the exit status.
    pub async fn run_raw(&self, args: &[String], timeout: Duration) -> Result<CommandOutput> {
        Ok(self.executor.run(&self.binary, args, Some(timeout)).await?)
    }

    /// Runs a verb and turns a non-zero exit into `CommandFailed`.
    async fn run_checked(&self, args: &[String], timeout: Duration) -> Result<CommandOutput> {
        let out = self.run_raw(args, timeout).await?;
        if !out.success() {
            return Err(OrchestratorError::CommandFailed {
                command: display_command(&self.binary, args),
                exit_code: out.exit_code,
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(out)
    }

    /// `run` with a prepared argument vector (see `launch::resolve`).
    pub async fn create(&self, run_args: &[String]) -> Result<CommandOutput> {
        self.run_raw(run_args, self.command_timeout).await
    }

    /// Full id of the container carrying exactly `name`, if any.
    pub async fn lookup_by_name(&self, name: &str) -> Result<Option<String>> {
        let pattern = format!("name=^/?{}$", name.replace('.', "\\."));
        let args = vec![
            "ps".to_string(),
            "-aq".to_string(),
            "--no-trunc".to_string(),
            "--filter".to_string(),
            pattern,
        ];
        let out = self.run_checked(&args, self.stats_timeout).await?;
        Ok(out.first_stdout_line().map(str::to_string))
    }

    pub async fn action(&self, id: &ProcessIdentity, action: ContainerAction) -> Result<()> {
        validate_identity(id.as_str())?;
        let args = vec![action.as_verb().to_string(), id.0.clone()];
        self.run_checked(&args, self.command_timeout).await?;
        Ok(())
    }

    pub async fn remove(&self, id: &ProcessIdentity) -> Result<()> {
        validate_identity(id.as_str())?;
        let args = vec!["rm".to_string(), id.0.clone()];
        self.run_checked(&args, self.command_timeout).await?;
        Ok(())
    }

    /// Whether the container reports `State.Running == true`.
    pub async fn is_running(&self, id: &ProcessIdentity) -> Result<bool> {
        validate_identity(id.as_str())?;
        let args = vec![
            "inspect".to_string(),
            "--format".to_string(),
            "{{.State.Running}}".to_string(),
            id.0.clone(),
        ];
        let out = self.run_checked(&args, self.stats_timeout).await?;
        let state = out.first_stdout_line().unwrap_or_default();
        Ok(state.trim_matches('\'') == "true")
    }

    /// One-shot stats sample as the runtime's JSON line.
    pub async fn stats_json(&self, id: &ProcessIdentity) -> Result<String> {
        validate_identity(id.as_str())?;
        let args = vec![
            "stats".to_string(),
            "--no-stream".to_string(),
            "--format".to_string(),
            "{{json .}}".to_string(),
            id.0.clone(),
        ];
        let out = self.run_checked(&args, self.stats_timeout).await?;
        Ok(out.first_stdout_line().unwrap_or_default().to_string())
    }

    pub async fn exec(&self, id: &ProcessIdentity, argv: &[String]) -> Result<CommandOutput> {
        validate_identity(id.as_str())?;
        if argv.is_empty() {
            return Err(OrchestratorError::InvalidInput(
                "exec requires a command".to_string(),
            ));
        }
        let mut args = vec!["exec".to_string(), id.0.clone()];
        args.extend(argv.iter().cloned());
        self.run_checked(&args, self.command_timeout).await
    }

    /// Server version, used as a reachability probe.
    pub async fn version(&self) -> Result<String> {
        let args = vec![
            "version".to_string(),
            "--format".to_string(),
            "{{.Server.Version}}".to_string(),
        ];
        let out = self.run_checked(&args, self.stats_timeout).await?;
        Ok(out.first_stdout_line().unwrap_or_default().to_string())
    }

    /// Attach command for a console session. Not spawned.
    ///
    /// stdin and stdout are piped. stderr is redirected into the stdout pipe
    /// so the combined output reads back in the order it was written.
    pub fn attach_command(&self, id: &ProcessIdentity) -> Result<Command> {
        validate_identity(id.as_str())?;
        let mut cmd = Command::new(&self.binary);
        cmd.args(["attach", "--sig-proxy=false", id.as_str()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(merge_stderr_into_stdout);
        }
        #[cfg(target_os = "linux")]
        unsafe {
            cmd.pre_exec(set_parent_death_signal);
        }

        Ok(cmd)
    }
}
