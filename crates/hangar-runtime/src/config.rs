use std::{path::PathBuf, time::Duration};

const DEFAULT_RUNTIME_BIN: &str = "docker";
const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_STATS_TIMEOUT_MS: u64 = 5_000;

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_u64(name: &str) -> Option<u64> {
    env_string(name).and_then(|v| v.parse::<u64>().ok())
}

fn absolute_or_raw(p: PathBuf) -> PathBuf {
    std::path::absolute(&p).unwrap_or(p)
}

/// Settings shared by every orchestration component.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Root for instance data directories; also the file-browser sandbox root.
    pub data_root: PathBuf,
    pub runtime_bin: String,
    pub command_timeout: Duration,
    pub stats_timeout: Duration,
    pub templates_dir: PathBuf,
    pub rcon_password: String,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let data_root = env_string("HANGAR_DATA_ROOT").unwrap_or_else(|| "./data".to_string());
        let templates_dir =
            env_string("HANGAR_TEMPLATES_DIR").unwrap_or_else(|| "./templates".to_string());

        let command_timeout = Duration::from_millis(
            env_u64("HANGAR_COMMAND_TIMEOUT_MS")
                .map(|v| v.clamp(1_000, 60 * 60 * 1000))
                .unwrap_or(DEFAULT_COMMAND_TIMEOUT_MS),
        );
        let stats_timeout = Duration::from_millis(
            env_u64("HANGAR_STATS_TIMEOUT_MS")
                .map(|v| v.clamp(250, 60_000))
                .unwrap_or(DEFAULT_STATS_TIMEOUT_MS),
        );

        let rcon_password = match env_string("HANGAR_RCON_PASSWORD") {
            Some(v) => v,
            None => {
                tracing::warn!(
                    "HANGAR_RCON_PASSWORD not set; generated a password valid until the agent restarts"
                );
                uuid::Uuid::new_v4().simple().to_string()
            }
        };

        Self {
            data_root: absolute_or_raw(PathBuf::from(data_root)),
            runtime_bin: env_string("HANGAR_RUNTIME_BIN")
                .unwrap_or_else(|| DEFAULT_RUNTIME_BIN.to_string()),
            command_timeout,
            stats_timeout,
            templates_dir: PathBuf::from(templates_dir),
            rcon_password,
        }
    }

    /// Config rooted at `data_root` with defaults for everything else.
    pub fn with_data_root(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: absolute_or_raw(data_root.into()),
            runtime_bin: DEFAULT_RUNTIME_BIN.to_string(),
            command_timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
            stats_timeout: Duration::from_millis(DEFAULT_STATS_TIMEOUT_MS),
            templates_dir: PathBuf::from("./templates"),
            rcon_password: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn registry_dir(&self) -> PathBuf {
        self.data_root.join("registry")
    }
}
