//! Builds the runtime `run` argument vector for an instance.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use hangar_container::{Instance, LaunchKind, Template};

use crate::config::RuntimeConfig;
use crate::data_dir;
use crate::error::{OrchestratorError, Result};

/// Where every instance's data directory is mounted inside its container.
pub const DATA_MOUNT: &str = "/data";

pub const DEDICATED_GAME_PORT: u16 = 25565;
pub const DEDICATED_RCON_PORT: u16 = 25575;

#[derive(Debug, Clone, PartialEq)]
pub struct LaunchPlan {
    pub container_name: String,
    pub data_path: PathBuf,
    pub args: Vec<String>,
}

/// Replaces every character outside `[A-Za-z0-9_.-]` with `_`.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Timestamp-suffixed container name. Two creates of the same name in the
/// same millisecond collide.
///
/// The runtime rejects names that do not start with an alphanumeric
/// character, so such names get an `i` prefix.
pub fn container_name(name: &str, now_ms: u128) -> String {
    let base = sanitize_name(name);
    if base.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        format!("{base}_{now_ms}")
    } else {
        format!("i{base}_{now_ms}")
    }
}

fn now_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

fn format_cpus(cpus: f64) -> String {
    if cpus.fract() == 0.0 {
        format!("{cpus:.1}")
    } else {
        format!("{cpus}")
    }
}

/// Entries the dedicated family needs for unattended operation.
pub fn forced_environment(rcon_password: &str) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("EULA".to_string(), "TRUE".to_string());
    env.insert("ENABLE_RCON".to_string(), "true".to_string());
    env.insert("RCON_PASSWORD".to_string(), rcon_password.to_string());
    env.insert("RCON_PORT".to_string(), DEDICATED_RCON_PORT.to_string());
    env
}

/// Template environment, with forced entries winning for the dedicated family.
pub fn resolve_environment(
    kind: LaunchKind,
    template_env: &BTreeMap<String, String>,
    rcon_password: &str,
) -> BTreeMap<String, String> {
    match kind {
        LaunchKind::Generic => template_env.clone(),
        LaunchKind::Dedicated => {
            let mut env = template_env.clone();
            env.extend(forced_environment(rcon_password));
            env
        }
    }
}

/// Host ports a launch will bind, in `-p` order.
pub fn host_ports(instance: &Instance, template: &Template) -> Result<Vec<(String, String)>> {
    match template.launch_kind {
        LaunchKind::Generic => Ok(template
            .ports
            .iter()
            .map(|(h, c)| (h.clone(), c.clone()))
            .collect()),
        LaunchKind::Dedicated => {
            let port = instance.host_port;
            if port == 0 || port == u16::MAX {
                return Err(OrchestratorError::InvalidInput(format!(
                    "dedicated launch needs a host port in 1..=65534 (got {port})"
                )));
            }
            Ok(vec![
                (port.to_string(), DEDICATED_GAME_PORT.to_string()),
                ((port + 1).to_string(), DEDICATED_RCON_PORT.to_string()),
            ])
        }
    }
}

/// Pure argument construction; `data_path` must already exist.
pub fn build_run_args(
    instance: &Instance,
    template: &Template,
    data_path: &Path,
    container_name: &str,
    rcon_password: &str,
) -> Result<Vec<String>> {
    if template.image.trim().is_empty() {
        return Err(OrchestratorError::InvalidInput(format!(
            "template {} has no image",
            template.id
        )));
    }
    let cpus = instance.limits.cpus;
    if !cpus.is_finite() || cpus < 0.0 {
        return Err(OrchestratorError::InvalidInput(format!(
            "cpu limit must be a non-negative number (got {cpus})"
        )));
    }

    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        // Keep stdin open so console sessions can write to the server.
        "-i".to_string(),
        "--name".to_string(),
        container_name.to_string(),
    ];

    // Zero means "no limit".
    if instance.limits.memory_mb > 0 {
        args.push("--memory".to_string());
        args.push(format!("{}m", instance.limits.memory_mb));
    }
    if cpus > 0.0 {
        args.push("--cpus".to_string());
        args.push(format_cpus(cpus));
    }

    for (host, container) in host_ports(instance, template)? {
        args.push("-p".to_string());
        args.push(format!("{host}:{container}"));
    }

    args.push("-v".to_string());
    args.push(format!("{}:{DATA_MOUNT}", data_path.display()));

    for (k, v) in resolve_environment(template.launch_kind, &template.environment, rcon_password)
    {
        args.push("-e".to_string());
        args.push(format!("{k}={v}"));
    }

    args.push(template.image.clone());
    Ok(args)
}

/// Allocates the data directory if needed and builds the full launch plan.
///
/// Directory creation failure aborts before anything is launched.
pub fn resolve(
    instance: &mut Instance,
    template: &Template,
    config: &RuntimeConfig,
) -> Result<LaunchPlan> {
    let data_path = data_dir::ensure_data_path(instance, &config.data_root)?;
    let name = container_name(&instance.name, now_millis());
    let args = build_run_args(instance, template, &data_path, &name, &config.rcon_password)?;
    instance.launch_kind = template.launch_kind;

    Ok(LaunchPlan {
        container_name: name,
        data_path,
        args,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hangar_container::ResourceLimits;

    fn generic_template() -> Template {
        let mut ports = BTreeMap::new();
        ports.insert("8080".to_string(), "80".to_string());
        let mut environment = BTreeMap::new();
        environment.insert("FOO".to_string(), "bar".to_string());
        Template {
            id: "web/nginx/nginx".to_string(),
            name: "nginx".to_string(),
            image: "nginx:latest".to_string(),
            ports,
            environment,
            launch_kind: LaunchKind::Generic,
            category: "Web".to_string(),
            subcategory: "Nginx".to_string(),
        }
    }

    fn dedicated_template() -> Template {
        let mut environment = BTreeMap::new();
        environment.insert("EULA".to_string(), "false".to_string());
        environment.insert("TYPE".to_string(), "PAPER".to_string());
        Template {
            id: "games/minecraft/paper".to_string(),
            name: "Paper".to_string(),
            image: "itzg/minecraft-server".to_string(),
            ports: BTreeMap::new(),
            environment,
            launch_kind: LaunchKind::Dedicated,
            category: "Games".to_string(),
            subcategory: "Minecraft".to_string(),
        }
    }

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn sanitize_replaces_disallowed_characters() {
        assert_eq!(sanitize_name("My Server #1"), "My_Server__1");
        assert_eq!(sanitize_name("ok_name.v2-b"), "ok_name.v2-b");
        assert_eq!(sanitize_name("été"), "_t_");
        assert_eq!(sanitize_name(" x "), "_x_");
        assert_eq!(sanitize_name(""), "");
    }

    #[test]
    fn container_name_starts_with_alphanumeric() {
        assert_eq!(container_name("a b", 1700000000123), "a_b_1700000000123");
        assert_eq!(container_name("été", 5), "i_t__5");
        assert_eq!(container_name("", 5), "i_5");
        assert_eq!(container_name(".hidden", 5), "i.hidden_5");
    }

    #[test]
    fn generic_passes_template_through() {
        let mut inst = Instance::new("web", "nginx:latest", 8080);
        inst.limits = ResourceLimits {
            memory_mb: 512,
            cpus: 1.0,
            disk_mb: 0,
        };
        let t = generic_template();
        let args = build_run_args(&inst, &t, Path::new("/srv/d/1"), "web_1", "pw").unwrap();

        assert!(has_pair(&args, "-p", "8080:80"));
        assert!(has_pair(&args, "-e", "FOO=bar"));
        assert!(has_pair(&args, "--memory", "512m"));
        assert!(has_pair(&args, "--cpus", "1.0"));
        assert!(has_pair(&args, "-v", "/srv/d/1:/data"));
        assert!(has_pair(&args, "--name", "web_1"));
        assert_eq!(args.last().map(String::as_str), Some("nginx:latest"));
        assert!(!args.iter().any(|a| a.starts_with("EULA=")));
    }

    #[test]
    fn dedicated_forces_environment_and_ports() {
        let mut inst = Instance::new("survival", "itzg/minecraft-server", 25600);
        inst.limits.cpus = 1.5;
        let t = dedicated_template();
        let args = build_run_args(&inst, &t, Path::new("/srv/d/2"), "survival_1", "pw").unwrap();

        assert!(has_pair(&args, "-e", "EULA=TRUE"));
        assert!(!has_pair(&args, "-e", "EULA=false"));
        assert!(has_pair(&args, "-e", "TYPE=PAPER"));
        assert!(has_pair(&args, "-e", "RCON_PASSWORD=pw"));
        assert!(has_pair(&args, "-p", "25600:25565"));
        assert!(has_pair(&args, "-p", "25601:25575"));
        assert!(has_pair(&args, "--cpus", "1.5"));
        assert_eq!(
            args.last().map(String::as_str),
            Some("itzg/minecraft-server")
        );
    }

    #[test]
    fn dedicated_rejects_unusable_port() {
        let inst = Instance::new("s", "itzg/minecraft-server", u16::MAX);
        let err = host_ports(&inst, &dedicated_template()).unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }

    #[test]
    fn zero_limits_are_omitted() {
        let mut inst = Instance::new("web", "nginx:latest", 8080);
        inst.limits = ResourceLimits {
            memory_mb: 0,
            cpus: 0.0,
            disk_mb: 0,
        };
        let args =
            build_run_args(&inst, &generic_template(), Path::new("/d"), "web_1", "pw").unwrap();
        assert!(!args.iter().any(|a| a == "--memory" || a == "--cpus"));
    }

    #[test]
    fn resolve_fails_before_launch_when_directory_cannot_be_created() {
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let cfg = RuntimeConfig::with_data_root(&blocker);

        let mut inst = Instance::new("web", "nginx:latest", 8080);
        let err = resolve(&mut inst, &generic_template(), &cfg).unwrap_err();
        assert_eq!(err.code(), "data_path_failed");
        assert!(inst.data_path.is_none());
    }

    #[test]
    fn resolve_records_data_path_and_kind() {
        let root = tempfile::tempdir().unwrap();
        let cfg = RuntimeConfig::with_data_root(root.path());
        let mut inst = Instance::new("Survival World", "itzg/minecraft-server", 25565);
        let plan = resolve(&mut inst, &dedicated_template(), &cfg).unwrap();

        assert!(plan.data_path.is_dir());
        assert_eq!(inst.data_path.as_ref(), Some(&plan.data_path));
        assert_eq!(inst.launch_kind, LaunchKind::Dedicated);
        assert!(plan.container_name.starts_with("Survival_World_"));
        assert!(has_pair(&plan.args, "--name", &plan.container_name));
    }
}
