use std::sync::Arc;

use hangar_container::{
    ContainerAction, Instance, InstanceId, LaunchKind, ProcessIdentity, StatsSnapshot, Template,
};

use crate::catalog::TemplateCatalog;
use crate::config::RuntimeConfig;
use crate::console::ConsoleRegistry;
use crate::error::{OrchestratorError, Result};
use crate::executor::CommandOutput;
use crate::lifecycle::{InstanceGuard, LifecycleManager};
use crate::port_alloc;
use crate::registry::InstanceRegistry;
use crate::runtime::ContainerRuntime;
use crate::stats::StatsPoller;

/// Registry-backed entry point: resolves ids to descriptors and templates,
/// delegates to the lifecycle, stats and console components, and writes the
/// resulting state back.
///
/// Mutating operations hold the instance's lock from reading the record to
/// writing it back, so a queued operation always sees its predecessor's
/// result.
pub struct InstanceManager {
    registry: Arc<dyn InstanceRegistry>,
    catalog: Arc<TemplateCatalog>,
    lifecycle: LifecycleManager,
    stats: StatsPoller,
    console: Arc<ConsoleRegistry>,
}

impl InstanceManager {
    pub fn new(
        config: Arc<RuntimeConfig>,
        registry: Arc<dyn InstanceRegistry>,
        catalog: TemplateCatalog,
    ) -> Self {
        let lifecycle = LifecycleManager::new(config);
        let runtime = lifecycle.runtime().clone();
        Self {
            console: Arc::new(ConsoleRegistry::new(runtime.clone(), registry.clone())),
            stats: StatsPoller::new(runtime),
            registry,
            catalog: Arc::new(catalog),
            lifecycle,
        }
    }

    pub fn runtime(&self) -> &ContainerRuntime {
        self.lifecycle.runtime()
    }

    pub fn config(&self) -> &RuntimeConfig {
        self.lifecycle.config()
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    pub fn console(&self) -> &Arc<ConsoleRegistry> {
        &self.console
    }

    pub async fn get_instance(&self, id: &InstanceId) -> Result<Instance> {
        self.registry
            .get(id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("instance", id.as_str()))
    }

    pub async fn list_instances(&self) -> Result<Vec<Instance>> {
        self.registry.list().await
    }

    /// Takes the instance's lock, then reads its record.
    async fn load_locked(&self, id: &InstanceId) -> Result<(InstanceGuard, Instance)> {
        let guard = self.lifecycle.lock(id).await;
        match self.get_instance(id).await {
            Ok(instance) => Ok((guard, instance)),
            Err(err) => {
                drop(guard);
                self.lifecycle.forget(id);
                Err(err)
            }
        }
    }

    fn template_for(&self, instance: &Instance) -> Result<&Template> {
        self.catalog
            .get(&instance.template_id)
            .or_else(|| self.catalog.find_by_image(&instance.image))
            .ok_or_else(|| OrchestratorError::not_found("template", instance.template_id.clone()))
    }

    fn live_identity(instance: &Instance) -> Result<ProcessIdentity> {
        instance.live_identity().cloned().ok_or_else(|| {
            OrchestratorError::not_found("container for instance", instance.id.as_str())
        })
    }

    fn pick_port(kind: LaunchKind, requested: u16) -> Result<u16> {
        match kind {
            LaunchKind::Dedicated => port_alloc::allocate_port_pair(requested),
            LaunchKind::Generic if requested == 0 => port_alloc::allocate_tcp_port(0),
            LaunchKind::Generic => Ok(requested),
        }
    }

    /// Launches `instance` from `template_id` and records it. A `host_port`
    /// of 0 is replaced by a free port. Nothing is recorded if the launch fails.
    pub async fn create_instance(
        &self,
        mut instance: Instance,
        template_id: &str,
    ) -> Result<Instance> {
        let template = self
            .catalog
            .get(template_id)
            .ok_or_else(|| OrchestratorError::not_found("template", template_id))?;

        instance.template_id = template.id.clone();
        instance.image = template.image.clone();
        instance.process_identity = None;
        instance.host_port = Self::pick_port(template.launch_kind, instance.host_port)?;

        let guard = self.lifecycle.lock(&instance.id).await;
        if let Err(err) = self
            .lifecycle
            .create_locked(&guard, &mut instance, template)
            .await
        {
            if let OrchestratorError::IdentityResolution { name, .. } = &err {
                tracing::warn!(
                    instance_id = %instance.id,
                    container = %name,
                    "a container may exist without a record; remove it manually"
                );
            }
            return Err(err);
        }

        self.registry.put(&instance).await?;
        Ok(instance)
    }

    pub async fn act(&self, id: &InstanceId, action: ContainerAction) -> Result<()> {
        let (guard, instance) = self.load_locked(id).await?;
        let identity = Self::live_identity(&instance)?;
        self.lifecycle
            .perform_action_locked(&guard, id, &identity, action)
            .await
    }

    /// Removes the container and then the record. With `force`, a container
    /// removal failure is logged and the record is removed anyway.
    pub async fn delete_instance(&self, id: &InstanceId, force: bool) -> Result<()> {
        let res = {
            let (guard, instance) = self.load_locked(id).await?;
            self.delete_locked(&guard, &instance, force).await
        };
        self.lifecycle.forget(id);
        res
    }

    async fn delete_locked(
        &self,
        guard: &InstanceGuard,
        instance: &Instance,
        force: bool,
    ) -> Result<()> {
        let id = &instance.id;
        match self
            .lifecycle
            .delete_locked(guard, id, instance.process_identity.as_ref())
            .await
        {
            Ok(()) => {}
            Err(err) if force => {
                tracing::warn!(
                    instance_id = %id,
                    error = %err,
                    "container removal failed; dropping the record anyway"
                );
            }
            Err(err) => return Err(err),
        }
        self.registry.remove(id).await?;
        tracing::info!(instance_id = %id, force, "instance deleted");
        Ok(())
    }

    /// Recreates the container on `port` (0 picks a free one). On the
    /// recreate window the cleared identity is recorded before the error is
    /// returned.
    pub async fn change_port(&self, id: &InstanceId, port: u16) -> Result<Instance> {
        let (guard, mut instance) = self.load_locked(id).await?;
        let template = self.template_for(&instance)?;
        let port = if port == 0 {
            Self::pick_port(template.launch_kind, 0)?
        } else {
            port
        };

        match self
            .lifecycle
            .change_port_locked(&guard, &mut instance, template, port)
            .await
        {
            Ok(_) => {
                self.registry.put(&instance).await?;
                Ok(instance)
            }
            Err(err @ OrchestratorError::Recreate { .. }) => {
                if let Err(persist) = self.registry.put(&instance).await {
                    tracing::error!(
                        instance_id = %id,
                        error = %persist,
                        "failed to record cleared identity after recreate failure"
                    );
                }
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Never fails for a known instance; see [`StatsPoller::get_stats`].
    pub async fn stats(&self, id: &InstanceId) -> Result<StatsSnapshot> {
        let instance = self.get_instance(id).await?;
        Ok(self
            .stats
            .get_stats(instance.process_identity.as_ref())
            .await)
    }

    pub async fn exec(&self, id: &InstanceId, argv: &[String]) -> Result<CommandOutput> {
        let instance = self.get_instance(id).await?;
        let identity = Self::live_identity(&instance)?;
        self.lifecycle.exec(&identity, argv).await
    }
}
