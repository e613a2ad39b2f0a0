//! SSE transport
//!
//! Each deployed instance gets its own rmcp [`SseServer`]:
//!
//! - `GET {prefix}/{id}/{version}/sse` - open an event stream
//! - `POST {prefix}/{id}/{version}/sse/message?sessionId=...` - send a message on that session
//!
//! The SSE server's sessions are tied to a cancellation token owned by this
//! deployer. Undeploying unmounts the router and cancels the token, which
//! closes every open stream for the instance. Both steps only touch what the
//! undeployed instance itself set up, never a later build of the same id.

use crate::mcp::deployer::{route_path, Deployer, TransportError, SSE_TRANSPORT};
use crate::mcp::instance::{InstanceKey, ToolServerInstance};
use crate::mcp::mount::MountTable;
use async_trait::async_trait;
use parking_lot::Mutex;
use rmcp::transport::sse_server::{SseServer, SseServerConfig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct SseDeployer {
    mounts: Arc<MountTable>,
    prefix: String,
    keep_alive: Option<Duration>,
    /// Instance generation and the token of its SSE server
    sessions: Mutex<HashMap<InstanceKey, (u64, CancellationToken)>>,
}

impl SseDeployer {
    pub fn new(
        mounts: Arc<MountTable>,
        prefix: impl Into<String>,
        keep_alive: Option<Duration>,
    ) -> Self {
        Self {
            mounts,
            prefix: prefix.into(),
            keep_alive,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Number of instances with a running SSE server
    pub fn active(&self) -> usize {
        self.sessions.lock().len()
    }
}

#[async_trait]
impl Deployer for SseDeployer {
    fn transport(&self) -> &'static str {
        SSE_TRANSPORT
    }

    fn route_path(&self, key: &InstanceKey) -> String {
        route_path(&self.prefix, key, SSE_TRANSPORT)
    }

    async fn deploy(
        &self,
        ctx: &CancellationToken,
        instance: &mut ToolServerInstance,
    ) -> Result<(), TransportError> {
        if ctx.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let key = instance.key();
        let path = self.route_path(&key);
        let bind = "127.0.0.1:0"
            .parse()
            .map_err(|e| TransportError::Failed(format!("Invalid bind addr: {}", e)))?;

        let ct = CancellationToken::new();
        let config = SseServerConfig {
            bind,
            sse_path: path.clone(),
            post_path: format!("{}/message", path),
            ct: ct.clone(),
            sse_keep_alive: self.keep_alive,
        };

        let (sse_server, sse_router) = SseServer::new(config);
        let core = instance.core.clone();
        sse_server.with_service(move || core.mcp_router());

        if let Err(e) = self.mounts.mount(&path, instance.generation, sse_router) {
            ct.cancel();
            return Err(e);
        }

        self.sessions
            .lock()
            .insert(key.clone(), (instance.generation, ct));
        tracing::info!(server = %key, path = %path, "SSE endpoint deployed");
        instance.route_paths.insert(SSE_TRANSPORT.to_string(), path);
        Ok(())
    }

    async fn undeploy(
        &self,
        _ctx: &CancellationToken,
        instance: &ToolServerInstance,
    ) -> Result<(), TransportError> {
        let key = instance.key();
        let path = self.route_path(&key);
        let unmounted = self.mounts.unmount(&path, instance.generation);

        {
            let mut sessions = self.sessions.lock();
            let owned = sessions
                .get(&key)
                .is_some_and(|(generation, _)| *generation == instance.generation);
            if owned {
                if let Some((_, ct)) = sessions.remove(&key) {
                    ct.cancel();
                }
            }
        }

        if unmounted {
            tracing::info!(server = %key, path = %path, "SSE endpoint removed");
        }
        Ok(())
    }
}
