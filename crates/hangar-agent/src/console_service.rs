use std::{pin::Pin, sync::Arc};

use futures_util::{Stream, StreamExt};
use hangar_container::{InstanceId, SessionId};
use hangar_proto::agent_v1::console_service_server::{ConsoleService, ConsoleServiceServer};
use hangar_proto::agent_v1::{ConsoleInput, ConsoleOutput};
use hangar_runtime::ConsoleRegistry;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};

use crate::error_payload;

const OUTPUT_BUFFER: usize = 256;

type AttachStream = Pin<Box<dyn Stream<Item = Result<ConsoleOutput, Status>> + Send>>;

pub struct ConsoleApi {
    console: Arc<ConsoleRegistry>,
}

/// Routes input lines to the session until the client stops sending, then
/// closes the session.
async fn pump_input(
    console: Arc<ConsoleRegistry>,
    session_id: SessionId,
    mut inbound: Streaming<ConsoleInput>,
) {
    loop {
        match inbound.message().await {
            Ok(Some(msg)) => console.input(&session_id, &msg.line).await,
            Ok(None) => break,
            Err(status) => {
                tracing::debug!(session_id = %session_id, %status, "console client stream error");
                break;
            }
        }
    }
    console.close(&session_id).await;
}

#[tonic::async_trait]
impl ConsoleService for ConsoleApi {
    type AttachStream = AttachStream;

    async fn attach(
        &self,
        request: Request<Streaming<ConsoleInput>>,
    ) -> Result<Response<Self::AttachStream>, Status> {
        let mut inbound = request.into_inner();
        let first = inbound
            .message()
            .await?
            .ok_or_else(|| error_payload::invalid_argument("empty console stream"))?;
        let instance_id = first.instance_id.trim();
        if instance_id.is_empty() {
            return Err(error_payload::invalid_argument(
                "first console message must carry instance_id",
            ));
        }
        let instance_id = InstanceId(instance_id.to_string());

        let session_id = SessionId::new();
        let (tx, rx) = mpsc::channel::<String>(OUTPUT_BUFFER);

        let sid = session_id.0.clone();
        let outbound = ReceiverStream::new(rx).map(move |line| {
            Ok(ConsoleOutput {
                session_id: sid.clone(),
                line,
            })
        });

        // A failed open has already queued its diagnostic line; the stream
        // delivers it and ends.
        if self
            .console
            .open(session_id.clone(), &instance_id, tx)
            .await
            .is_ok()
        {
            if !first.line.is_empty() {
                self.console.input(&session_id, &first.line).await;
            }
            tokio::spawn(pump_input(self.console.clone(), session_id, inbound));
        }

        Ok(Response::new(Box::pin(outbound) as Self::AttachStream))
    }
}

pub fn server(console: Arc<ConsoleRegistry>) -> ConsoleServiceServer<ConsoleApi> {
    ConsoleServiceServer::new(ConsoleApi { console })
}
