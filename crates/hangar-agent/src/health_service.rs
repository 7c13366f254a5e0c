use std::sync::Arc;

use hangar_proto::agent_v1::agent_health_service_server::{
    AgentHealthService, AgentHealthServiceServer,
};
use hangar_proto::agent_v1::{HealthCheckRequest, HealthCheckResponse};
use hangar_runtime::InstanceManager;
use tonic::{Request, Response, Status};

#[cfg(unix)]
fn free_bytes(p: &std::path::Path) -> u64 {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;
    let c = match CString::new(p.as_os_str().as_bytes()) {
        Ok(v) => v,
        Err(_) => return 0,
    };
    let mut s: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c.as_ptr(), &mut s) };
    if rc != 0 {
        return 0;
    }
    (s.f_bsize as u64).saturating_mul(s.f_bavail as u64)
}

#[cfg(not(unix))]
fn free_bytes(_p: &std::path::Path) -> u64 {
    0
}

fn data_root_writable(root: &std::path::Path) -> bool {
    std::fs::create_dir_all(root)
        .and_then(|_| {
            let probe = root.join(".hangar_write_probe");
            std::fs::write(&probe, b"ok\n").and_then(|_| std::fs::remove_file(probe))
        })
        .is_ok()
}

pub struct HealthApi {
    manager: Arc<InstanceManager>,
}

#[tonic::async_trait]
impl AgentHealthService for HealthApi {
    async fn check(
        &self,
        _request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        let data_root = self.manager.config().data_root.clone();

        let (runtime_reachable, runtime_version, runtime_error) =
            match self.manager.runtime().version().await {
                Ok(v) => (true, v, String::new()),
                Err(e) => (false, String::new(), e.to_string()),
            };

        let reply = HealthCheckResponse {
            status: if runtime_reachable {
                "SERVING".to_string()
            } else {
                "DEGRADED".to_string()
            },
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            data_root: data_root.display().to_string(),
            data_root_writable: data_root_writable(&data_root),
            data_root_free_bytes: free_bytes(&data_root),
            runtime_reachable,
            runtime_version,
            runtime_error,
            open_console_sessions: u32::try_from(self.manager.console().len())
                .unwrap_or(u32::MAX),
        };
        Ok(Response::new(reply))
    }
}

pub fn server(manager: Arc<InstanceManager>) -> AgentHealthServiceServer<HealthApi> {
    AgentHealthServiceServer::new(HealthApi { manager })
}
