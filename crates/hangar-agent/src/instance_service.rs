use std::sync::Arc;

use hangar_container::{ContainerAction, Instance, InstanceId, ResourceLimits, StatsSnapshot, Template};
use hangar_proto::agent_v1::instance_service_server::{InstanceService, InstanceServiceServer};
use hangar_proto::agent_v1::{
    self as pb, ChangePortRequest, ChangePortResponse, CreateInstanceRequest,
    CreateInstanceResponse, DeleteInstanceRequest, DeleteInstanceResponse, ExecRequest,
    ExecResponse, GetInstanceRequest, GetInstanceResponse, GetStatsRequest, GetStatsResponse,
    ListInstancesRequest, ListInstancesResponse, ListTemplatesRequest, ListTemplatesResponse,
    PerformActionRequest, PerformActionResponse,
};
use hangar_runtime::{InstanceManager, OrchestratorError};
use tonic::{Request, Response, Status};

use crate::error_payload;

fn instance_to_proto(inst: &Instance) -> pb::Instance {
    pb::Instance {
        instance_id: inst.id.0.clone(),
        name: inst.name.clone(),
        image: inst.image.clone(),
        template_id: inst.template_id.clone(),
        owner: inst.owner.clone().unwrap_or_default(),
        process_identity: inst
            .live_identity()
            .map(|p| p.0.clone())
            .unwrap_or_default(),
        data_path: inst
            .data_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        host_port: u32::from(inst.host_port),
        limits: Some(pb::ResourceLimits {
            memory_mb: inst.limits.memory_mb,
            cpus: inst.limits.cpus,
            disk_mb: inst.limits.disk_mb,
        }),
        launch_kind: inst.launch_kind.to_string(),
    }
}

fn template_to_proto(t: &Template) -> pb::Template {
    pb::Template {
        template_id: t.id.clone(),
        name: t.name.clone(),
        image: t.image.clone(),
        ports: t.ports.clone().into_iter().collect(),
        environment: t.environment.clone().into_iter().collect(),
        launch_kind: t.launch_kind.to_string(),
        category: t.category.clone(),
        subcategory: t.subcategory.clone(),
    }
}

fn stats_to_proto(s: StatsSnapshot) -> pb::StatsSnapshot {
    pb::StatsSnapshot {
        cpu_percent: s.cpu_percent,
        memory_usage: s.memory_usage,
        net_io: s.net_io,
        block_io: s.block_io,
        offline: s.offline,
        error: s.error.unwrap_or_default(),
    }
}

fn parse_instance_id(raw: &str) -> Result<InstanceId, Status> {
    let id = raw.trim();
    if id.is_empty() {
        return Err(error_payload::invalid_argument("instance_id is required"));
    }
    Ok(InstanceId(id.to_string()))
}

fn parse_port(raw: u32) -> Result<u16, Status> {
    u16::try_from(raw)
        .map_err(|_| error_payload::invalid_argument(format!("host_port out of range: {raw}")))
}

fn limits_from_proto(limits: Option<pb::ResourceLimits>) -> ResourceLimits {
    match limits {
        Some(l) => ResourceLimits {
            memory_mb: l.memory_mb,
            cpus: l.cpus,
            disk_mb: l.disk_mb,
        },
        None => ResourceLimits::default(),
    }
}

/// Logs at the service boundary and converts to a gRPC status.
fn fail(op: &'static str, instance_id: &str, err: OrchestratorError) -> Status {
    match &err {
        OrchestratorError::NotFound { .. } | OrchestratorError::InvalidInput(_) => {
            tracing::debug!(op, instance_id, code = err.code(), error = %err, "request rejected");
        }
        _ => {
            tracing::warn!(op, instance_id, code = err.code(), error = %err, "request failed");
        }
    }
    error_payload::status(&err)
}

pub struct InstanceApi {
    manager: Arc<InstanceManager>,
}

#[tonic::async_trait]
impl InstanceService for InstanceApi {
    async fn create_instance(
        &self,
        request: Request<CreateInstanceRequest>,
    ) -> Result<Response<CreateInstanceResponse>, Status> {
        let req = request.into_inner();
        let template_id = req.template_id.trim();
        if template_id.is_empty() {
            return Err(error_payload::invalid_argument("template_id is required"));
        }
        let name = req.name.trim();
        if name.is_empty() {
            return Err(error_payload::invalid_argument("name is required"));
        }

        let mut inst = Instance::new(name, "", parse_port(req.host_port)?);
        inst.owner = Some(req.owner).filter(|o| !o.trim().is_empty());
        inst.limits = limits_from_proto(req.limits);

        let created = self
            .manager
            .create_instance(inst, template_id)
            .await
            .map_err(|e| fail("create_instance", "", e))?;
        tracing::info!(instance_id = %created.id, template_id, "instance created");

        Ok(Response::new(CreateInstanceResponse {
            instance: Some(instance_to_proto(&created)),
        }))
    }

    async fn get_instance(
        &self,
        request: Request<GetInstanceRequest>,
    ) -> Result<Response<GetInstanceResponse>, Status> {
        let id = parse_instance_id(&request.into_inner().instance_id)?;
        let inst = self
            .manager
            .get_instance(&id)
            .await
            .map_err(|e| fail("get_instance", id.as_str(), e))?;
        Ok(Response::new(GetInstanceResponse {
            instance: Some(instance_to_proto(&inst)),
        }))
    }

    async fn list_instances(
        &self,
        _request: Request<ListInstancesRequest>,
    ) -> Result<Response<ListInstancesResponse>, Status> {
        let instances = self
            .manager
            .list_instances()
            .await
            .map_err(|e| fail("list_instances", "", e))?;
        Ok(Response::new(ListInstancesResponse {
            instances: instances.iter().map(instance_to_proto).collect(),
        }))
    }

    async fn perform_action(
        &self,
        request: Request<PerformActionRequest>,
    ) -> Result<Response<PerformActionResponse>, Status> {
        let req = request.into_inner();
        let id = parse_instance_id(&req.instance_id)?;
        let action: ContainerAction = req
            .action
            .parse()
            .map_err(|e: hangar_container::UnknownAction| {
                error_payload::invalid_argument(e.to_string())
            })?;

        self.manager
            .act(&id, action)
            .await
            .map_err(|e| fail("perform_action", id.as_str(), e))?;
        Ok(Response::new(PerformActionResponse {}))
    }

    async fn delete_instance(
        &self,
        request: Request<DeleteInstanceRequest>,
    ) -> Result<Response<DeleteInstanceResponse>, Status> {
        let req = request.into_inner();
        let id = parse_instance_id(&req.instance_id)?;
        self.manager
            .delete_instance(&id, req.force)
            .await
            .map_err(|e| fail("delete_instance", id.as_str(), e))?;
        Ok(Response::new(DeleteInstanceResponse {}))
    }

    async fn change_port(
        &self,
        request: Request<ChangePortRequest>,
    ) -> Result<Response<ChangePortResponse>, Status> {
        let req = request.into_inner();
        let id = parse_instance_id(&req.instance_id)?;
        let port = parse_port(req.host_port)?;
        let inst = self
            .manager
            .change_port(&id, port)
            .await
            .map_err(|e| fail("change_port", id.as_str(), e))?;
        Ok(Response::new(ChangePortResponse {
            instance: Some(instance_to_proto(&inst)),
        }))
    }

    async fn get_stats(
        &self,
        request: Request<GetStatsRequest>,
    ) -> Result<Response<GetStatsResponse>, Status> {
        let id = parse_instance_id(&request.into_inner().instance_id)?;
        let stats = self
            .manager
            .stats(&id)
            .await
            .map_err(|e| fail("get_stats", id.as_str(), e))?;
        Ok(Response::new(GetStatsResponse {
            stats: Some(stats_to_proto(stats)),
        }))
    }

    async fn exec(&self, request: Request<ExecRequest>) -> Result<Response<ExecResponse>, Status> {
        let req = request.into_inner();
        let id = parse_instance_id(&req.instance_id)?;
        let out = self
            .manager
            .exec(&id, &req.argv)
            .await
            .map_err(|e| fail("exec", id.as_str(), e))?;
        Ok(Response::new(ExecResponse {
            exit_code: out.exit_code,
            stdout: out.stdout,
            stderr: out.stderr,
        }))
    }

    async fn list_templates(
        &self,
        _request: Request<ListTemplatesRequest>,
    ) -> Result<Response<ListTemplatesResponse>, Status> {
        Ok(Response::new(ListTemplatesResponse {
            templates: self
                .manager
                .catalog()
                .list()
                .map(template_to_proto)
                .collect(),
        }))
    }
}

pub fn server(manager: Arc<InstanceManager>) -> InstanceServiceServer<InstanceApi> {
    InstanceServiceServer::new(InstanceApi { manager })
}
