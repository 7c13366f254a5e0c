//! Error taxonomy for container orchestration.

use std::{path::PathBuf, time::Duration};

use thiserror::Error;

/// Outcome of a command that did not produce an exit status.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The program never ran (missing binary, permission denied).
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program ran past its deadline and was killed.
    #[error("{program} timed out after {}ms", after.as_millis())]
    Timeout { program: String, after: Duration },

    /// Collecting output from a started program failed.
    #[error("i/o error while running {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Launch(ExecError),

    #[error("runtime command `{command}` failed (exit code {exit_code:?}): {stderr}")]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error(transparent)]
    Timeout(ExecError),

    /// The command started but its output could not be collected.
    #[error(transparent)]
    Io(ExecError),

    /// The create command ran but no container id could be determined. A
    /// container named `name` may exist and need manual cleanup.
    #[error("could not determine container id for `{name}`; create stderr: {create_stderr}")]
    IdentityResolution { name: String, create_stderr: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("failed to prepare data directory {}: {source}", path.display())]
    DataPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("port {port} is unavailable: {reason}")]
    PortUnavailable { port: u16, reason: String },

    /// changePort removed the old container but could not start the new one.
    #[error(
        "old container {removed} was removed but the replacement failed to start; the instance has no running container: {source}"
    )]
    Recreate {
        removed: String,
        #[source]
        source: Box<OrchestratorError>,
    },

    #[error("instance registry error: {0}")]
    Registry(String),

    #[error("template catalog error: {0}")]
    Catalog(String),
}

impl OrchestratorError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        OrchestratorError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::Launch(_) => "launch_failed",
            OrchestratorError::CommandFailed { .. } => "command_failed",
            OrchestratorError::Timeout(_) => "command_timeout",
            OrchestratorError::Io(_) => "command_io_failed",
            OrchestratorError::IdentityResolution { .. } => "identity_unresolved",
            OrchestratorError::NotFound { .. } => "not_found",
            OrchestratorError::DataPath { .. } => "data_path_failed",
            OrchestratorError::InvalidInput(_) => "invalid_input",
            OrchestratorError::PortUnavailable { .. } => "port_unavailable",
            OrchestratorError::Recreate { .. } => "recreate_failed",
            OrchestratorError::Registry(_) => "registry_failed",
            OrchestratorError::Catalog(_) => "catalog_failed",
        }
    }
}

impl From<ExecError> for OrchestratorError {
    fn from(value: ExecError) -> Self {
        match value {
            ExecError::Launch { .. } => OrchestratorError::Launch(value),
            ExecError::Timeout { .. } => OrchestratorError::Timeout(value),
            ExecError::Io { .. } => OrchestratorError::Io(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_maps_to_timeout_variant() {
        let err: OrchestratorError = ExecError::Timeout {
            program: "docker".to_string(),
            after: Duration::from_millis(1500),
        }
        .into();
        assert_eq!(err.code(), "command_timeout");
        assert_eq!(err.to_string(), "docker timed out after 1500ms");
    }

    #[test]
    fn launch_failure_is_distinct_from_command_failure() {
        let launch: OrchestratorError = ExecError::Launch {
            program: "docker".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        }
        .into();
        assert_eq!(launch.code(), "launch_failed");

        let failed = OrchestratorError::CommandFailed {
            command: "docker stop abc".to_string(),
            exit_code: Some(1),
            stderr: "No such container: abc".to_string(),
        };
        assert_eq!(failed.code(), "command_failed");
        assert!(failed.to_string().contains("No such container"));
    }

    #[test]
    fn pipe_failure_after_start_is_not_a_launch_failure() {
        let err: OrchestratorError = ExecError::Io {
            program: "docker".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::BrokenPipe),
        }
        .into();
        assert!(matches!(err, OrchestratorError::Io(_)));
        assert_eq!(err.code(), "command_io_failed");
        assert!(err.to_string().starts_with("i/o error while running docker"));
    }

    #[test]
    fn recreate_reports_missing_container() {
        let err = OrchestratorError::Recreate {
            removed: "abc123".to_string(),
            source: Box::new(OrchestratorError::InvalidInput("boom".to_string())),
        };
        let msg = err.to_string();
        assert!(msg.contains("abc123"));
        assert!(msg.contains("no running container"));
    }
}
