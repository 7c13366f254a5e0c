//! Interactive attach sessions.
//!
//! Each session owns one attach subprocess whose stderr shares its stdout
//! pipe. A single background task forwards that combined output to the
//! session's client channel line by line. Input is written to the
//! subprocess's stdin. Closing a session removes it from the registry and
//! kills the subprocess if it is still alive.

use std::{fmt, sync::Arc};

use dashmap::DashMap;
use hangar_container::{InstanceId, ProcessIdentity, SessionId};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout},
    sync::{Mutex, mpsc},
};

use crate::error::{ExecError, OrchestratorError, Result};
use crate::registry::InstanceRegistry;
use crate::runtime::ContainerRuntime;

/// Prefix of the single diagnostic line sent when a session cannot open.
pub const DIAGNOSTIC_PREFIX: &str = "[hangar]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Attaching,
    Streaming,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Attaching => f.write_str("attaching"),
            SessionState::Streaming => f.write_str("streaming"),
            SessionState::Closed => f.write_str("closed"),
        }
    }
}

/// The child and its stdin are locked separately: a write stuck on a full
/// pipe must not keep `close` from killing the child.
struct AttachedSession {
    instance_id: InstanceId,
    child: Mutex<Child>,
    stdin: Mutex<Option<ChildStdin>>,
}

impl AttachedSession {
    async fn is_alive(&self) -> bool {
        matches!(self.child.lock().await.try_wait(), Ok(None))
    }
}

/// A spawned attach process, before registration.
struct Attached {
    identity: ProcessIdentity,
    session: AttachedSession,
    output: ChildStdout,
}

/// Live console sessions keyed by session id. Construct once and share by
/// `Arc`.
pub struct ConsoleRegistry {
    runtime: ContainerRuntime,
    instances: Arc<dyn InstanceRegistry>,
    sessions: DashMap<SessionId, Arc<AttachedSession>>,
}

impl ConsoleRegistry {
    pub fn new(runtime: ContainerRuntime, instances: Arc<dyn InstanceRegistry>) -> Self {
        Self {
            runtime,
            instances,
            sessions: DashMap::new(),
        }
    }

    pub fn state(&self, session_id: &SessionId) -> SessionState {
        if self.sessions.contains_key(session_id) {
            SessionState::Streaming
        } else {
            SessionState::Closed
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Attaches to the instance's container and starts forwarding its output
    /// to `client`.
    ///
    /// On failure one diagnostic line is sent to `client`, nothing is
    /// registered, and the error is returned.
    pub async fn open(
        &self,
        session_id: SessionId,
        instance_id: &InstanceId,
        client: mpsc::Sender<String>,
    ) -> Result<()> {
        tracing::info!(
            session_id = %session_id,
            instance_id = %instance_id,
            state = %SessionState::Attaching,
            "opening console session"
        );

        match self.attach(&session_id, instance_id).await {
            Ok(attached) => {
                self.sessions
                    .insert(session_id.clone(), Arc::new(attached.session));
                tokio::spawn(forward_output(session_id.clone(), attached.output, client));
                tracing::info!(
                    session_id = %session_id,
                    instance_id = %instance_id,
                    container = %attached.identity,
                    state = %SessionState::Streaming,
                    "console session open"
                );
                Ok(())
            }
            Err(err) => {
                tracing::warn!(
                    session_id = %session_id,
                    instance_id = %instance_id,
                    state = %SessionState::Closed,
                    error = %err,
                    "console session failed to open"
                );
                let _ = client
                    .send(format!("{DIAGNOSTIC_PREFIX} console unavailable: {err}"))
                    .await;
                Err(err)
            }
        }
    }

    async fn attach(
        &self,
        session_id: &SessionId,
        instance_id: &InstanceId,
    ) -> Result<Attached> {
        if self.sessions.contains_key(session_id) {
            return Err(OrchestratorError::InvalidInput(format!(
                "session {session_id} is already open"
            )));
        }

        let instance = self
            .instances
            .get(instance_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("instance", instance_id.as_str()))?;
        let identity = instance.live_identity().cloned().ok_or_else(|| {
            OrchestratorError::not_found("container for instance", instance_id.as_str())
        })?;

        let mut cmd = self.runtime.attach_command(&identity)?;
        let mut child = cmd.spawn().map_err(|source| {
            OrchestratorError::from(ExecError::Launch {
                program: self.runtime.binary().to_string(),
                source,
            })
        })?;

        let Some(output) = child.stdout.take() else {
            let _ = child.kill().await;
            return Err(OrchestratorError::from(ExecError::Io {
                program: self.runtime.binary().to_string(),
                source: std::io::Error::other("attach process has no output pipe"),
            }));
        };
        let stdin = child.stdin.take();

        Ok(Attached {
            identity,
            session: AttachedSession {
                instance_id: instance_id.clone(),
                child: Mutex::new(child),
                stdin: Mutex::new(stdin),
            },
            output,
        })
    }

    /// Writes `text` plus a newline to the session's subprocess. Unknown
    /// sessions and exited subprocesses drop the write silently.
    pub async fn input(&self, session_id: &SessionId, text: &str) {
        let Some(session) = self.sessions.get(session_id).map(|e| e.value().clone()) else {
            tracing::debug!(session_id = %session_id, "input for unknown session dropped");
            return;
        };

        if !session.is_alive().await {
            tracing::debug!(session_id = %session_id, "attach process exited; input dropped");
            return;
        }
        let mut pipe = session.stdin.lock().await;
        let Some(stdin) = pipe.as_mut() else {
            return;
        };

        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');
        let res = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        if let Err(e) = res {
            tracing::debug!(
                session_id = %session_id,
                instance_id = %session.instance_id,
                error = %e,
                "console write failed; input dropped"
            );
        }
    }

    /// Removes the session and kills its subprocess if still alive.
    /// Closing an unknown or already closed session does nothing.
    pub async fn close(&self, session_id: &SessionId) {
        let Some((_, session)) = self.sessions.remove(session_id) else {
            return;
        };

        // stdin is left alone: a pending write holds its lock until the kill
        // breaks the pipe.
        let mut child = session.child.lock().await;
        if matches!(child.try_wait(), Ok(None)) {
            if let Err(e) = child.kill().await {
                tracing::warn!(session_id = %session_id, error = %e, "failed to kill attach process");
            }
        } else {
            // Reap.
            let _ = child.wait().await;
        }
        drop(child);
        tracing::info!(
            session_id = %session_id,
            instance_id = %session.instance_id,
            state = %SessionState::Closed,
            "console session closed"
        );
    }

    /// Closes every session; used at shutdown.
    pub async fn close_all(&self) {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.close(&id).await;
        }
    }
}

/// The only writer to `client` for a session. Runs until the output reaches
/// end-of-file, a read fails, or the client goes away.
async fn forward_output(session_id: SessionId, output: ChildStdout, client: mpsc::Sender<String>) {
    let mut lines = BufReader::new(output).lines();

    loop {
        let next = tokio::select! {
            biased;
            _ = client.closed() => break,
            r = lines.next_line() => r,
        };

        match next {
            Ok(Some(line)) => {
                if client.is_closed() || client.send(line).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(
                    session_id = %session_id,
                    error = %e,
                    "console read failed; forwarding stopped"
                );
                break;
            }
        }
    }
    tracing::debug!(session_id = %session_id, "console forwarding ended");
}
