//! Binding tool definitions onto server cores
//!
//! What a tool actually does when called is delegated to a [`ToolInvoker`];
//! this module only decides whether a batch of definitions can be bound.

use crate::error::ToolServerError;
use crate::mcp::instance::InstanceKey;
use crate::mcp::service::ToolServerCore;
use crate::models::{ToolDefinition, ToolServerConfig};
use async_trait::async_trait;
use rmcp::model::{CallToolResult, Content, ErrorData};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Executes tool calls for every tool server
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(
        &self,
        server: &InstanceKey,
        tool: &ToolDefinition,
        arguments: Option<Map<String, Value>>,
    ) -> Result<CallToolResult, ErrorData>;
}

/// Answers every call with the tool name and the arguments it received
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoInvoker;

#[async_trait]
impl ToolInvoker for EchoInvoker {
    async fn invoke(
        &self,
        server: &InstanceKey,
        tool: &ToolDefinition,
        arguments: Option<Map<String, Value>>,
    ) -> Result<CallToolResult, ErrorData> {
        let body = json!({
            "server": server.to_string(),
            "tool": tool.name,
            "arguments": arguments.unwrap_or_default(),
        });
        Ok(CallToolResult::success(vec![Content::text(body.to_string())]))
    }
}

#[derive(Clone)]
pub struct ToolManager {
    invoker: Arc<dyn ToolInvoker>,
}

impl ToolManager {
    pub fn new(invoker: Arc<dyn ToolInvoker>) -> Self {
        Self { invoker }
    }

    /// Fresh, empty core wired to this manager's invoker
    pub fn new_core(&self, config: &ToolServerConfig) -> ToolServerCore {
        ToolServerCore::new(config, Arc::clone(&self.invoker))
    }

    /// Registers `definitions` on `core` in input order
    ///
    /// Stops at the first definition that cannot be bound. The core is then
    /// partially populated and must be discarded by the caller.
    pub fn register_tools(
        &self,
        definitions: &[ToolDefinition],
        core: &mut ToolServerCore,
    ) -> Result<(), ToolServerError> {
        for (index, definition) in definitions.iter().enumerate() {
            core.bind_tool(definition).map_err(|e| {
                tracing::warn!(
                    server = %core.key(),
                    index,
                    tool = %definition.name,
                    error = %e,
                    "Tool registration failed"
                );
                ToolServerError::ToolRegistrationFailed {
                    tool: if definition.name.is_empty() {
                        format!("#{}", index)
                    } else {
                        definition.name.clone()
                    },
                    reason: e.to_string(),
                }
            })?;
        }

        tracing::debug!(server = %core.key(), count = definitions.len(), "Tools registered");
        Ok(())
    }
}
