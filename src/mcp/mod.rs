//! Dynamic tool server runtime
//!
//! Tool servers are created, replaced and removed while the process is
//! running, without restarting the listener.
//!
//! # Architecture
//!
//! - [`InstanceRegistry`] - concurrent map of live instances with atomic reservation
//! - [`ToolManager`] - binds tool definitions onto a fresh [`ToolServerCore`]
//! - [`Deployer`] - per-transport mount/unmount contract
//!   ([`StreamableHttpDeployer`], [`SseDeployer`])
//! - [`MountTable`] - request-time routing for everything the deployers mount
//! - [`InstanceManager`] - create/update/delete orchestration with rollback
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use toolhost::mcp::{
//!     Deployer, EchoInvoker, InstanceManager, InstanceRegistry, MountTable, SseDeployer,
//!     StreamableHttpDeployer, ToolManager,
//! };
//! use toolhost::models::{ToolDefinition, ToolServerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mounts = Arc::new(MountTable::new());
//! let deployers: Vec<Arc<dyn Deployer>> = vec![
//!     Arc::new(StreamableHttpDeployer::new(mounts.clone(), "/mcp")),
//!     Arc::new(SseDeployer::new(mounts.clone(), "/mcp", None)),
//! ];
//! let manager = InstanceManager::new(
//!     Arc::new(InstanceRegistry::new()),
//!     ToolManager::new(Arc::new(EchoInvoker)),
//!     deployers,
//! );
//!
//! let config = ToolServerConfig {
//!     id: "weather".to_string(),
//!     version: 1,
//!     name: "Weather".to_string(),
//!     instructions: String::new(),
//!     tools: vec![ToolDefinition::new("get_forecast")],
//! };
//! let instance = manager.create(&CancellationToken::new(), config).await?;
//! assert_eq!(instance.route_path("stream"), Some("/mcp/weather/1/stream"));
//! # Ok(())
//! # }
//! ```

pub mod deployer;
pub mod http_transport;
pub mod instance;
pub mod manager;
pub mod mount;
pub mod registry;
pub mod service;
pub mod sse_transport;
pub mod tool_manager;

pub use deployer::{Deployer, TransportError, SSE_TRANSPORT, STREAM_TRANSPORT};
pub use http_transport::StreamableHttpDeployer;
pub use instance::{InstanceKey, InstanceSummary, ToolServerInstance};
pub use manager::InstanceManager;
pub use mount::{mounted_routes, MountTable};
pub use registry::{InstanceRegistry, RegistryError, Reservation, Teardown};
pub use service::{BindError, ToolServerCore};
pub use sse_transport::SseDeployer;
pub use tool_manager::{EchoInvoker, ToolInvoker, ToolManager};
