use std::path::{Component, Path, PathBuf};

use hangar_container::Instance;

use crate::error::{OrchestratorError, Result};

pub const INSTANCES_DIR: &str = "instances";

/// Makes sure `instance.data_path` names an existing directory under `root`.
///
/// A fresh `<root>/instances/<uuid>` is assigned only when the instance has
/// none; an existing path is re-created if it went missing but never replaced.
pub fn ensure_data_path(instance: &mut Instance, root: &Path) -> Result<PathBuf> {
    let path = match &instance.data_path {
        Some(p) => p.clone(),
        None => root
            .join(INSTANCES_DIR)
            .join(uuid::Uuid::new_v4().to_string()),
    };

    std::fs::create_dir_all(&path).map_err(|source| OrchestratorError::DataPath {
        path: path.clone(),
        source,
    })?;

    if instance.data_path.is_none() {
        tracing::info!(instance_id = %instance.id, path = %path.display(), "allocated data directory");
        instance.data_path = Some(path.clone());
    }
    Ok(path)
}

fn normalize_rel_path(rel: &str) -> Result<PathBuf> {
    let p = Path::new(rel);
    if p.is_absolute() {
        return Err(OrchestratorError::InvalidInput(
            "path must be relative".to_string(),
        ));
    }

    let mut out = PathBuf::new();
    for c in p.components() {
        match c {
            Component::CurDir => {}
            Component::Normal(seg) => out.push(seg),
            Component::ParentDir => {
                return Err(OrchestratorError::InvalidInput(
                    "path traversal is not allowed".to_string(),
                ));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(OrchestratorError::InvalidInput(
                    "path must be relative".to_string(),
                ));
            }
        }
    }
    Ok(out)
}

/// Resolves a client-supplied relative path inside an instance data directory.
pub fn scoped_path(data_path: &Path, rel: &str) -> Result<PathBuf> {
    Ok(data_path.join(normalize_rel_path(rel)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_once_and_reuses() {
        let root = tempfile::tempdir().unwrap();
        let mut inst = Instance::new("survival", "itzg/minecraft-server", 25565);

        let first = ensure_data_path(&mut inst, root.path()).unwrap();
        assert!(first.is_dir());
        assert!(first.starts_with(root.path().join(INSTANCES_DIR)));
        assert_eq!(inst.data_path.as_ref(), Some(&first));

        let second = ensure_data_path(&mut inst, root.path()).unwrap();
        assert_eq!(first, second);
        let entries = std::fs::read_dir(root.path().join(INSTANCES_DIR))
            .unwrap()
            .count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn recreates_missing_directory_at_same_path() {
        let root = tempfile::tempdir().unwrap();
        let mut inst = Instance::new("a", "nginx", 8080);
        let path = ensure_data_path(&mut inst, root.path()).unwrap();
        std::fs::remove_dir(&path).unwrap();
        assert_eq!(ensure_data_path(&mut inst, root.path()).unwrap(), path);
        assert!(path.is_dir());
    }

    #[test]
    fn creation_failure_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let mut inst = Instance::new("a", "nginx", 8080);
        inst.data_path = Some(blocker.join("nested"));
        let err = ensure_data_path(&mut inst, root.path()).unwrap_err();
        assert_eq!(err.code(), "data_path_failed");
    }

    #[test]
    fn scoped_path_rejects_escape() {
        let base = Path::new("/srv/hangar/instances/abc");
        assert_eq!(
            scoped_path(base, "./world/level.dat").unwrap(),
            base.join("world/level.dat")
        );
        assert_eq!(scoped_path(base, "").unwrap(), base.to_path_buf());
        assert!(scoped_path(base, "../other").is_err());
        assert!(scoped_path(base, "/etc/passwd").is_err());
    }
}
