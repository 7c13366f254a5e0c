use std::{collections::BTreeMap, fmt, path::PathBuf, str::FromStr};

use specta::Type;

/// Length of the container id prefix the runtime CLI prints in `ps` output.
pub const SHORT_IDENTITY_LEN: usize = 12;

/// Registry-owned identifier of one deployed instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, Type)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Runtime-assigned handle of the container backing an instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, Type)]
pub struct ProcessIdentity(pub String);

impl ProcessIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Fixed-length prefix form; ids shorter than the prefix are kept whole.
    pub fn short(raw: &str) -> Self {
        let raw = raw.trim();
        let end = raw
            .char_indices()
            .nth(SHORT_IDENTITY_LEN)
            .map(|(i, _)| i)
            .unwrap_or(raw.len());
        Self(raw[..end].to_string())
    }
}

impl fmt::Display for ProcessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one interactive console connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, Type)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Argument-building policy used when creating the container.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, Type,
)]
#[serde(rename_all = "snake_case")]
pub enum LaunchKind {
    /// Fixed port/environment contract of the Minecraft server image family.
    Dedicated,
    /// Ports and environment passed through from the template.
    #[default]
    Generic,
}

impl fmt::Display for LaunchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchKind::Dedicated => f.write_str("dedicated"),
            LaunchKind::Generic => f.write_str("generic"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, Type)]
pub struct ResourceLimits {
    pub memory_mb: u32,
    pub cpus: f64,
    /// Informational only; the runtime does not enforce it.
    #[serde(default)]
    pub disk_mb: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: 1024,
            cpus: 1.0,
            disk_mb: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, Type)]
pub struct Instance {
    pub id: InstanceId,
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub template_id: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub process_identity: Option<ProcessIdentity>,
    /// Allocated on first launch, then reused for the life of the instance.
    #[serde(default)]
    pub data_path: Option<PathBuf>,
    pub host_port: u16,
    #[serde(default)]
    pub limits: ResourceLimits,
    #[serde(default)]
    pub launch_kind: LaunchKind,
}

impl Instance {
    pub fn new(name: impl Into<String>, image: impl Into<String>, host_port: u16) -> Self {
        Self {
            id: InstanceId::new(),
            name: name.into(),
            image: image.into(),
            template_id: String::new(),
            owner: None,
            process_identity: None,
            data_path: None,
            host_port,
            limits: ResourceLimits::default(),
            launch_kind: LaunchKind::Generic,
        }
    }

    /// Identity if one was recorded and it is not blank.
    pub fn live_identity(&self) -> Option<&ProcessIdentity> {
        self.process_identity.as_ref().filter(|p| !p.is_empty())
    }
}

/// Read-only deployment blueprint from the template catalog.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, Type)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub image: String,
    /// Host port label -> container port label.
    #[serde(default)]
    pub ports: BTreeMap<String, String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub launch_kind: LaunchKind,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub subcategory: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, Type)]
#[serde(rename_all = "snake_case")]
pub enum ContainerAction {
    Stop,
    Start,
    Restart,
    Kill,
}

impl ContainerAction {
    /// The runtime CLI verb for this action.
    pub fn as_verb(self) -> &'static str {
        match self {
            ContainerAction::Stop => "stop",
            ContainerAction::Start => "start",
            ContainerAction::Restart => "restart",
            ContainerAction::Kill => "kill",
        }
    }
}

impl fmt::Display for ContainerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_verb())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAction(pub String);

impl fmt::Display for UnknownAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown container action: {}", self.0)
    }
}

impl std::error::Error for UnknownAction {}

impl FromStr for ContainerAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stop" => Ok(ContainerAction::Stop),
            "start" => Ok(ContainerAction::Start),
            "restart" => Ok(ContainerAction::Restart),
            "kill" => Ok(ContainerAction::Kill),
            other => Err(UnknownAction(other.to_string())),
        }
    }
}

/// Display-formatted resource sample, as printed by the runtime's stats verb.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, Type)]
pub struct StatsSnapshot {
    pub cpu_percent: String,
    pub memory_usage: String,
    pub net_io: String,
    pub block_io: String,
    pub offline: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatsSnapshot {
    pub fn offline() -> Self {
        Self {
            cpu_percent: "0%".to_string(),
            memory_usage: "0 MiB / 0 MiB".to_string(),
            net_io: "0 B / 0 B".to_string(),
            block_io: "0 B / 0 B".to_string(),
            offline: true,
            error: None,
        }
    }

    pub fn offline_with_error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::offline()
        }
    }
}

impl Default for StatsSnapshot {
    fn default() -> Self {
        Self::offline()
    }
}
