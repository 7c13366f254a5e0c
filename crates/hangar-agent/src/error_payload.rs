use hangar_runtime::OrchestratorError;
use tonic::Status;

pub const PREFIX: &str = "HANGAR_ERROR_JSON:";

const MAX_MESSAGE_BYTES: usize = 32 * 1024;
const MAX_HINT_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

fn truncate_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }

    let suffix = "…(truncated)";
    let keep = max_bytes.saturating_sub(suffix.len()).max(1);
    let mut end = keep.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = s[..end].to_string();
    out.push_str(suffix);
    out
}

pub fn encode(code: &str, message: impl Into<String>, hint: Option<String>) -> String {
    let payload = ErrorPayload {
        code: code.to_string(),
        message: truncate_utf8(&message.into(), MAX_MESSAGE_BYTES),
        hint: hint.map(|h| truncate_utf8(&h, MAX_HINT_BYTES)),
    };

    let json = serde_json::to_string(&payload)
        .unwrap_or_else(|_| "{\"code\":\"internal\",\"message\":\"serialize_failed\"}".to_string());

    format!("{PREFIX}{json}")
}

fn hint_for(err: &OrchestratorError) -> Option<String> {
    match err {
        OrchestratorError::Launch(_) => Some(
            "Is the container runtime installed and on PATH? Set HANGAR_RUNTIME_BIN to override."
                .to_string(),
        ),
        OrchestratorError::Timeout(_) => Some(
            "The runtime did not answer in time; raise HANGAR_COMMAND_TIMEOUT_MS if image pulls are slow."
                .to_string(),
        ),
        OrchestratorError::IdentityResolution { name, .. } => Some(format!(
            "A container named {name} may exist without a record; remove it manually."
        )),
        OrchestratorError::Recreate { .. } => Some(
            "The instance has no container now. Retry the port change or delete the instance."
                .to_string(),
        ),
        OrchestratorError::DataPath { .. } => {
            Some("Check permissions and free space under HANGAR_DATA_ROOT.".to_string())
        }
        OrchestratorError::PortUnavailable { .. } => {
            Some("Pick another port, or pass 0 to let the agent choose.".to_string())
        }
        _ => None,
    }
}

/// gRPC status carrying the structured payload as its message.
pub fn status(err: &OrchestratorError) -> Status {
    let msg = encode(err.code(), err.to_string(), hint_for(err));
    match err {
        OrchestratorError::NotFound { .. } => Status::not_found(msg),
        OrchestratorError::InvalidInput(_) => Status::invalid_argument(msg),
        OrchestratorError::PortUnavailable { .. } => Status::failed_precondition(msg),
        OrchestratorError::Launch(_) => Status::unavailable(msg),
        OrchestratorError::Timeout(_) => Status::deadline_exceeded(msg),
        _ => Status::internal(msg),
    }
}

pub fn invalid_argument(message: impl Into<String>) -> Status {
    Status::invalid_argument(encode("invalid_input", message, None))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(status: &Status) -> serde_json::Value {
        let json = status.message().strip_prefix(PREFIX).unwrap();
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn encode_truncates_on_char_boundary() {
        let long = "é".repeat(MAX_MESSAGE_BYTES);
        let s = encode("test", long, Some("h".repeat(MAX_HINT_BYTES + 10)));
        let v: serde_json::Value = serde_json::from_str(&s[PREFIX.len()..]).unwrap();

        let msg = v["message"].as_str().unwrap();
        assert!(msg.len() <= MAX_MESSAGE_BYTES);
        assert!(msg.ends_with("…(truncated)"));
        assert!(v["hint"].as_str().unwrap().len() <= MAX_HINT_BYTES);
    }

    #[test]
    fn maps_errors_to_grpc_codes() {
        let s = status(&OrchestratorError::not_found("instance", "abc"));
        assert_eq!(s.code(), tonic::Code::NotFound);
        assert_eq!(payload(&s)["code"], "not_found");
        assert!(payload(&s).get("hint").is_none());

        let s = status(&OrchestratorError::PortUnavailable {
            port: 25565,
            reason: "already in use".to_string(),
        });
        assert_eq!(s.code(), tonic::Code::FailedPrecondition);
        assert!(payload(&s)["hint"].as_str().is_some());

        let s = status(&OrchestratorError::CommandFailed {
            command: "docker stop abc".to_string(),
            exit_code: Some(1),
            stderr: "No such container: abc".to_string(),
        });
        assert_eq!(s.code(), tonic::Code::Internal);
        assert!(
            payload(&s)["message"]
                .as_str()
                .unwrap()
                .contains("No such container")
        );

        let s = status(&OrchestratorError::from(hangar_runtime::ExecError::Io {
            program: "docker".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::BrokenPipe),
        }));
        assert_eq!(s.code(), tonic::Code::Internal);
        assert_eq!(payload(&s)["code"], "command_io_failed");
        assert!(payload(&s).get("hint").is_none());
    }
}
