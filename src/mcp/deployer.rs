//! Transport deployer contract
//!
//! Each transport mounts a server core under a path derived from the
//! instance identity. Deployers are independent of each other; ordering and
//! rollback across transports belong to the instance manager.

use crate::mcp::instance::{InstanceKey, ToolServerInstance};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub const STREAM_TRANSPORT: &str = "stream";
pub const SSE_TRANSPORT: &str = "sse";

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("route {0} is already mounted")]
    AlreadyMounted(String),

    #[error("deploy cancelled before the route was mounted")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

#[async_trait]
pub trait Deployer: Send + Sync {
    /// Transport name, used as the key in `ToolServerInstance::route_paths`
    fn transport(&self) -> &'static str;

    /// Mount path for an identity; the same identity always maps to the same path
    fn route_path(&self, key: &InstanceKey) -> String;

    /// Mounts the instance's core and records the path on the instance
    ///
    /// Must not mutate routing state once `ctx` is cancelled.
    async fn deploy(
        &self,
        ctx: &CancellationToken,
        instance: &mut ToolServerInstance,
    ) -> Result<(), TransportError>;

    /// Unmounts the instance; a no-op if this transport never mounted it
    ///
    /// Runs to completion even if `ctx` is cancelled, since it is used for
    /// compensation.
    async fn undeploy(
        &self,
        ctx: &CancellationToken,
        instance: &ToolServerInstance,
    ) -> Result<(), TransportError>;
}

/// `{prefix}/{id}/{version}/{suffix}` with the id percent-encoded
pub fn route_path(prefix: &str, key: &InstanceKey, suffix: &str) -> String {
    format!(
        "{}/{}/{}/{}",
        prefix.trim_end_matches('/'),
        urlencoding::encode(&key.id),
        key.version,
        suffix
    )
}
