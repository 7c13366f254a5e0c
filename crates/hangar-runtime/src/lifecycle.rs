use std::sync::Arc;

use dashmap::DashMap;
use hangar_container::{ContainerAction, Instance, InstanceId, LaunchKind, ProcessIdentity, Template};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::RuntimeConfig;
use crate::error::{OrchestratorError, Result};
use crate::executor::CommandOutput;
use crate::launch;
use crate::port_alloc;
use crate::runtime::{ContainerRuntime, validate_identity};

/// One async mutex per instance; operations on different instances never contend.
#[derive(Debug, Default)]
struct InstanceLocks {
    locks: DashMap<InstanceId, Arc<Mutex<()>>>,
}

impl InstanceLocks {
    async fn acquire(&self, id: &InstanceId) -> InstanceGuard {
        let lock = self.locks.entry(id.clone()).or_default().clone();
        InstanceGuard {
            _guard: lock.lock_owned().await,
        }
    }

    /// Drops the entry if nobody holds or waits on it.
    fn forget(&self, id: &InstanceId) {
        self.locks.remove_if(id, |_, l| Arc::strong_count(l) == 1);
    }
}

/// Exclusive hold on one instance, released on drop.
#[derive(Debug)]
pub struct InstanceGuard {
    _guard: OwnedMutexGuard<()>,
}

/// Creates, controls and removes the containers backing instances.
///
/// Every mutating call holds the instance's lock for its whole duration, so
/// two operations on one instance never run runtime commands concurrently.
/// Commands are bounded by the configured timeout, which also bounds how long
/// the lock can be held.
///
/// Callers that must read or persist instance state under the same lock take
/// it with [`LifecycleManager::lock`] and use the `*_locked` variants.
#[derive(Debug, Clone)]
pub struct LifecycleManager {
    runtime: ContainerRuntime,
    config: Arc<RuntimeConfig>,
    locks: Arc<InstanceLocks>,
}

impl LifecycleManager {
    pub fn new(config: Arc<RuntimeConfig>) -> Self {
        Self {
            runtime: ContainerRuntime::new(&config),
            config,
            locks: Arc::new(InstanceLocks::default()),
        }
    }

    pub fn runtime(&self) -> &ContainerRuntime {
        &self.runtime
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Waits for exclusive access to `id`.
    pub async fn lock(&self, id: &InstanceId) -> InstanceGuard {
        self.locks.acquire(id).await
    }

    /// Drops the lock entry for `id` if nobody holds or waits on it.
    pub fn forget(&self, id: &InstanceId) {
        self.locks.forget(id);
    }

    /// Launches a container for `instance` and records its identity on it.
    pub async fn create(
        &self,
        instance: &mut Instance,
        template: &Template,
    ) -> Result<ProcessIdentity> {
        let guard = self.locks.acquire(&instance.id).await;
        self.create_locked(&guard, instance, template).await
    }

    pub async fn create_locked(
        &self,
        _guard: &InstanceGuard,
        instance: &mut Instance,
        template: &Template,
    ) -> Result<ProcessIdentity> {
        let plan = launch::resolve(instance, template, &self.config)?;
        tracing::info!(
            instance_id = %instance.id,
            container = %plan.container_name,
            image = %template.image,
            launch = %template.launch_kind,
            "creating container"
        );

        let out = self.runtime.create(&plan.args).await?;
        if !out.success() {
            return Err(OrchestratorError::CommandFailed {
                command: format!("{} run {}", self.runtime.binary(), template.image),
                exit_code: out.exit_code,
                stderr: out.stderr.trim().to_string(),
            });
        }

        let identity = self.resolve_identity(&plan.container_name, &out).await?;
        instance.process_identity = Some(identity.clone());
        tracing::info!(
            instance_id = %instance.id,
            container = %identity,
            data_path = %plan.data_path.display(),
            "container created"
        );
        Ok(identity)
    }

    /// Takes the id printed by `run`, falling back to a lookup by name.
    async fn resolve_identity(&self, name: &str, out: &CommandOutput) -> Result<ProcessIdentity> {
        if let Some(line) = out.first_stdout_line()
            && validate_identity(line).is_ok()
        {
            return Ok(ProcessIdentity::short(line));
        }

        tracing::warn!(container = %name, "run printed no container id; looking it up by name");
        match self.runtime.lookup_by_name(name).await {
            Ok(Some(id)) => Ok(ProcessIdentity::short(&id)),
            Ok(None) => Err(OrchestratorError::IdentityResolution {
                name: name.to_string(),
                create_stderr: out.stderr.trim().to_string(),
            }),
            Err(err) => {
                tracing::warn!(container = %name, error = %err, "container lookup failed");
                Err(OrchestratorError::IdentityResolution {
                    name: name.to_string(),
                    create_stderr: out.stderr.trim().to_string(),
                })
            }
        }
    }

    pub async fn perform_action(
        &self,
        instance_id: &InstanceId,
        identity: &ProcessIdentity,
        action: ContainerAction,
    ) -> Result<()> {
        let guard = self.locks.acquire(instance_id).await;
        self.perform_action_locked(&guard, instance_id, identity, action)
            .await
    }

    pub async fn perform_action_locked(
        &self,
        _guard: &InstanceGuard,
        instance_id: &InstanceId,
        identity: &ProcessIdentity,
        action: ContainerAction,
    ) -> Result<()> {
        if identity.is_empty() {
            return Err(OrchestratorError::InvalidInput(format!(
                "instance {instance_id} has no container"
            )));
        }
        self.runtime.action(identity, action).await?;
        tracing::info!(instance_id = %instance_id, container = %identity, %action, "container action done");
        Ok(())
    }

    /// Stops (best effort) and removes the container. An absent or blank
    /// identity is a successful no-op.
    pub async fn delete(
        &self,
        instance_id: &InstanceId,
        identity: Option<&ProcessIdentity>,
    ) -> Result<()> {
        let res = {
            let guard = self.locks.acquire(instance_id).await;
            self.delete_locked(&guard, instance_id, identity).await
        };
        if res.is_ok() {
            self.locks.forget(instance_id);
        }
        res
    }

    /// Same as [`LifecycleManager::delete`] for a caller already holding the
    /// instance's lock. Does not forget the lock entry.
    pub async fn delete_locked(
        &self,
        _guard: &InstanceGuard,
        instance_id: &InstanceId,
        identity: Option<&ProcessIdentity>,
    ) -> Result<()> {
        let Some(identity) = identity.filter(|p| !p.is_empty()) else {
            tracing::info!(instance_id = %instance_id, "no container recorded; nothing to delete");
            return Ok(());
        };
        self.remove_container(instance_id, identity).await
    }

    async fn remove_container(
        &self,
        instance_id: &InstanceId,
        identity: &ProcessIdentity,
    ) -> Result<()> {
        if let Err(err) = self.runtime.action(identity, ContainerAction::Stop).await {
            tracing::warn!(
                instance_id = %instance_id,
                container = %identity,
                error = %err,
                "stop before delete failed; continuing with removal"
            );
        }
        self.runtime.remove(identity).await?;
        tracing::info!(instance_id = %instance_id, container = %identity, "container removed");
        Ok(())
    }

    /// Destroys the current container and recreates it on `new_port`, reusing
    /// the data directory.
    ///
    /// Everything that can be checked up front (data directory, argument
    /// construction, port availability) is checked before the old container is
    /// touched. If removal succeeds but the new create fails, the instance is
    /// left without a container: its identity is cleared, `host_port` holds the
    /// new port, and `OrchestratorError::Recreate` is returned.
    pub async fn change_port(
        &self,
        instance: &mut Instance,
        template: &Template,
        new_port: u16,
    ) -> Result<ProcessIdentity> {
        let guard = self.locks.acquire(&instance.id).await;
        self.change_port_locked(&guard, instance, template, new_port)
            .await
    }

    pub async fn change_port_locked(
        &self,
        guard: &InstanceGuard,
        instance: &mut Instance,
        template: &Template,
        new_port: u16,
    ) -> Result<ProcessIdentity> {
        let mut candidate = instance.clone();
        candidate.host_port = new_port;
        launch::resolve(&mut candidate, template, &self.config)?;
        if new_port != instance.host_port && template.launch_kind == LaunchKind::Dedicated {
            port_alloc::allocate_port_pair(new_port)?;
        }
        // The data directory may have just been allocated by the pre-flight.
        instance.data_path = candidate.data_path.clone();

        let old = instance.live_identity().cloned();
        if let Some(old) = &old {
            self.remove_container(&instance.id, old).await?;
        }

        instance.process_identity = None;
        let previous_port = instance.host_port;
        instance.host_port = new_port;

        match self.create_locked(guard, instance, template).await {
            Ok(identity) => {
                tracing::info!(
                    instance_id = %instance.id,
                    previous_port,
                    new_port,
                    container = %identity,
                    "port changed"
                );
                Ok(identity)
            }
            Err(err) => match old {
                Some(removed) => {
                    tracing::error!(
                        instance_id = %instance.id,
                        removed = %removed,
                        error = %err,
                        "port change removed the old container but recreate failed"
                    );
                    Err(OrchestratorError::Recreate {
                        removed: removed.0,
                        source: Box::new(err),
                    })
                }
                None => Err(err),
            },
        }
    }

    /// One-off command inside a running container. Not serialized with
    /// lifecycle operations.
    pub async fn exec(&self, identity: &ProcessIdentity, argv: &[String]) -> Result<CommandOutput> {
        self.runtime.exec(identity, argv).await
    }
}
