//! Runtime tool server instances
//!
//! A [`ToolServerInstance`] is the live, in-memory projection of a
//! [`ToolServerConfig`]. It is never persisted; it is rebuilt from the
//! durable config whenever it is needed again.

use crate::mcp::deployer::{SSE_TRANSPORT, STREAM_TRANSPORT};
use crate::mcp::service::ToolServerCore;
use crate::models::{ToolServerConfig, ToolServerDeployResponse};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Identity of a tool server: `(id, version)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceKey {
    pub id: String,
    pub version: i64,
}

impl InstanceKey {
    pub fn new(id: impl Into<String>, version: i64) -> Self {
        Self {
            id: id.into(),
            version,
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.version)
    }
}

/// Live tool server
///
/// Built by the instance manager, published to the registry only once every
/// transport has mounted it, and never mutated after that.
pub struct ToolServerInstance {
    pub config: Arc<ToolServerConfig>,
    pub core: ToolServerCore,
    pub created_at: DateTime<Utc>,
    /// Unique per built instance; tells two builds of one identity apart
    pub generation: u64,
    /// Transport name to mount path
    pub route_paths: BTreeMap<String, String>,
}

impl ToolServerInstance {
    pub fn new(config: Arc<ToolServerConfig>, core: ToolServerCore) -> Self {
        Self {
            config,
            core,
            created_at: Utc::now(),
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            route_paths: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(self.config.id.clone(), self.config.version)
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn version(&self) -> i64 {
        self.config.version
    }

    pub fn route_path(&self, transport: &str) -> Option<&str> {
        self.route_paths.get(transport).map(String::as_str)
    }

    /// Addresses of both transports, for create and update responses
    pub fn deploy_response(&self) -> ToolServerDeployResponse {
        ToolServerDeployResponse {
            id: self.config.id.clone(),
            version: self.config.version,
            stream_url: self.route_path(STREAM_TRANSPORT).unwrap_or_default().to_string(),
            sse_url: self.route_path(SSE_TRANSPORT).unwrap_or_default().to_string(),
        }
    }

    pub fn summary(&self) -> InstanceSummary {
        InstanceSummary {
            id: self.config.id.clone(),
            version: self.config.version,
            name: self.config.name.clone(),
            tools: self.config.tools.iter().map(|t| t.name.clone()).collect(),
            created_at: self.created_at,
            route_paths: self.route_paths.clone(),
        }
    }
}

impl fmt::Debug for ToolServerInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolServerInstance")
            .field("key", &self.key())
            .field("generation", &self.generation)
            .field("created_at", &self.created_at)
            .field("route_paths", &self.route_paths)
            .finish_non_exhaustive()
    }
}

/// Serializable view of a live instance for the management API
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSummary {
    pub id: String,
    pub version: i64,
    pub name: String,
    pub tools: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub route_paths: BTreeMap<String, String>,
}
