//! Persistence for instance descriptors.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use hangar_container::{Instance, InstanceId};
use tokio::io::AsyncWriteExt;

use crate::error::{OrchestratorError, Result};

#[async_trait]
pub trait InstanceRegistry: Send + Sync {
    async fn get(&self, id: &InstanceId) -> Result<Option<Instance>>;
    /// Insert or replace.
    async fn put(&self, instance: &Instance) -> Result<()>;
    /// Removing an unknown id is not an error.
    async fn remove(&self, id: &InstanceId) -> Result<()>;
    async fn list(&self) -> Result<Vec<Instance>>;
}

#[derive(Debug, Default)]
pub struct MemoryRegistry {
    instances: DashMap<InstanceId, Instance>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstanceRegistry for MemoryRegistry {
    async fn get(&self, id: &InstanceId) -> Result<Option<Instance>> {
        Ok(self.instances.get(id).map(|e| e.value().clone()))
    }

    async fn put(&self, instance: &Instance) -> Result<()> {
        self.instances.insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn remove(&self, id: &InstanceId) -> Result<()> {
        self.instances.remove(id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Instance>> {
        let mut out: Vec<Instance> = self.instances.iter().map(|e| e.value().clone()).collect();
        out.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        Ok(out)
    }
}

fn registry_err(what: &str, path: &Path, e: impl std::fmt::Display) -> OrchestratorError {
    OrchestratorError::Registry(format!("{what} {}: {e}", path.display()))
}

/// One `<id>.json` file per instance under a single directory.
#[derive(Debug, Clone)]
pub struct JsonFileRegistry {
    dir: PathBuf,
}

impl JsonFileRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &InstanceId) -> Result<PathBuf> {
        let raw = id.as_str();
        if raw.is_empty()
            || raw.len() > 128
            || !raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(OrchestratorError::InvalidInput(format!(
                "invalid instance id: {raw}"
            )));
        }
        Ok(self.dir.join(format!("{raw}.json")))
    }
}

#[async_trait]
impl InstanceRegistry for JsonFileRegistry {
    async fn get(&self, id: &InstanceId) -> Result<Option<Instance>> {
        let path = self.path_for(id)?;
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(registry_err("failed to read", &path, e)),
        };
        serde_json::from_slice::<Instance>(&raw)
            .map(Some)
            .map_err(|e| registry_err("failed to parse", &path, e))
    }

    async fn put(&self, instance: &Instance) -> Result<()> {
        let path = self.path_for(&instance.id)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| registry_err("failed to create", &self.dir, e))?;

        let data = serde_json::to_vec_pretty(instance)
            .map_err(|e| registry_err("failed to serialize", &path, e))?;

        let tmp = path.with_extension("json.tmp");
        let mut f = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| registry_err("failed to create", &tmp, e))?;
        f.write_all(&data)
            .await
            .map_err(|e| registry_err("failed to write", &tmp, e))?;
        f.flush()
            .await
            .map_err(|e| registry_err("failed to flush", &tmp, e))?;
        drop(f);

        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| registry_err("failed to persist", &path, e))?;
        Ok(())
    }

    async fn remove(&self, id: &InstanceId) -> Result<()> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(registry_err("failed to remove", &path, e)),
        }
    }

    async fn list(&self) -> Result<Vec<Instance>> {
        let mut rd = match tokio::fs::read_dir(&self.dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(registry_err("failed to read", &self.dir, e)),
        };

        let mut out = Vec::new();
        while let Some(entry) = rd
            .next_entry()
            .await
            .map_err(|e| registry_err("failed to read", &self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = tokio::fs::read(&path)
                .await
                .map_err(|e| e.to_string())
                .and_then(|raw| serde_json::from_slice::<Instance>(&raw).map_err(|e| e.to_string()));
            match parsed {
                Ok(inst) => out.push(inst),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable instance record");
                }
            }
        }
        out.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        Ok(out)
    }
}
