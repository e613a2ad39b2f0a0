//! Protocol-agnostic tool server core
//!
//! A [`ToolServerCore`] holds the tools bound for one tool server and answers
//! MCP requests for them. The same core backs every transport:
//!
//! - SSE sessions run it through rmcp's [`McpRouter`] (see [`ToolServerCore::mcp_router`])
//! - the streaming HTTP endpoint feeds it raw JSON-RPC via [`ToolServerCore::handle_request`]
//!
//! Cores are cheap to clone; a clone is handed to each SSE session.

use crate::mcp::instance::InstanceKey;
use crate::mcp::tool_manager::ToolInvoker;
use crate::models::{ToolDefinition, ToolServerConfig};
use rmcp::handler::server::router::Router as McpRouter;
use rmcp::handler::server::tool::{ToolCallContext, ToolRoute};
use rmcp::handler::server::ServerHandler;
use rmcp::model::{
    ErrorCode, ErrorData, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Why a tool could not be bound onto a core
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    #[error("tool name is empty")]
    EmptyName,

    #[error("tool '{0}' is already registered on this server")]
    DuplicateName(String),

    #[error("input schema is not a JSON object")]
    SchemaNotObject,
}

#[derive(Clone)]
pub struct ToolServerCore {
    key: InstanceKey,
    name: String,
    instructions: String,
    tools: Vec<rmcp::model::Tool>,
    routes: Vec<ToolRoute<Self>>,
    definitions: HashMap<String, Arc<ToolDefinition>>,
    invoker: Arc<dyn ToolInvoker>,
}

impl ToolServerCore {
    /// Creates an empty core for the given config; tools are bound separately
    pub fn new(config: &ToolServerConfig, invoker: Arc<dyn ToolInvoker>) -> Self {
        Self {
            key: InstanceKey::new(config.id.clone(), config.version),
            name: config.name.clone(),
            instructions: config.instructions.clone(),
            tools: Vec::new(),
            routes: Vec::new(),
            definitions: HashMap::new(),
            invoker,
        }
    }

    pub fn key(&self) -> &InstanceKey {
        &self.key
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_ref()).collect()
    }

    /// Binds a single tool definition
    ///
    /// Validation happens before anything is recorded, so a rejected
    /// definition leaves the core as it was.
    pub fn bind_tool(&mut self, definition: &ToolDefinition) -> Result<(), BindError> {
        if definition.name.trim().is_empty() {
            return Err(BindError::EmptyName);
        }
        if self.definitions.contains_key(&definition.name) {
            return Err(BindError::DuplicateName(definition.name.clone()));
        }
        let schema_map = match &definition.input_schema {
            Value::Object(map) => map.clone(),
            _ => return Err(BindError::SchemaNotObject),
        };

        let tool = rmcp::model::Tool {
            name: definition.name.clone().into(),
            description: definition.description.clone().map(Into::into),
            input_schema: Arc::new(schema_map),
            annotations: None,
            title: definition.title.clone(),
            icons: None,
            output_schema: None,
        };

        let definition = Arc::new(definition.clone());
        let invoker = Arc::clone(&self.invoker);
        let key = self.key.clone();
        let route_definition = Arc::clone(&definition);
        let route = ToolRoute::new_dyn(tool.clone(), move |context: ToolCallContext<'_, Self>| {
            let invoker = Arc::clone(&invoker);
            let key = key.clone();
            let definition = Arc::clone(&route_definition);
            Box::pin(async move { invoker.invoke(&key, &definition, context.arguments).await })
        });

        self.tools.push(tool);
        self.routes.push(route);
        self.definitions.insert(definition.name.clone(), definition);
        Ok(())
    }

    /// rmcp service for SSE sessions
    pub fn mcp_router(&self) -> McpRouter<Self> {
        McpRouter::new(self.clone()).with_tools(self.routes.clone())
    }

    /// Handles one JSON-RPC message from the streaming HTTP transport
    ///
    /// Returns `None` for notifications, which carry no response.
    pub async fn handle_request(&self, request: Value) -> Option<Value> {
        let request_id = request.get("id").cloned();
        let method = request.get("method").and_then(Value::as_str);

        if let Some(method) = method {
            if method.starts_with("notifications/") {
                tracing::debug!(server = %self.key, method, "Received notification");
                return None;
            }
        }

        let result = match method {
            Some(method) => self.dispatch(method, request.get("params")).await,
            None => Err(rpc_error(ErrorCode::INVALID_REQUEST, "Missing method field")),
        };

        Some(match result {
            Ok(res) => json!({
                "jsonrpc": "2.0",
                "id": request_id,
                "result": res,
            }),
            Err(e) => json!({
                "jsonrpc": "2.0",
                "id": request_id,
                "error": serde_json::to_value(&e).unwrap_or_else(|_| json!({
                    "code": -32603,
                    "message": e.message,
                })),
            }),
        })
    }

    async fn dispatch(&self, method: &str, params: Option<&Value>) -> Result<Value, ErrorData> {
        match method {
            "initialize" => {
                let info = self.get_info();
                Ok(json!({
                    "protocolVersion": info.protocol_version,
                    "capabilities": info.capabilities,
                    "serverInfo": info.server_info,
                    "instructions": info.instructions,
                }))
            }
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.tools })),
            "tools/call" => {
                let params = params
                    .ok_or_else(|| rpc_error(ErrorCode::INVALID_PARAMS, "Missing params field"))?;
                let tool_name = params
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| rpc_error(ErrorCode::INVALID_PARAMS, "Missing tool name"))?;
                let arguments: Option<Map<String, Value>> =
                    params.get("arguments").and_then(Value::as_object).cloned();

                let definition = self.definitions.get(tool_name).ok_or_else(|| {
                    rpc_error(
                        ErrorCode::INVALID_PARAMS,
                        &format!("Tool '{}' not found", tool_name),
                    )
                })?;

                let result = self
                    .invoker
                    .invoke(&self.key, definition, arguments)
                    .await?;

                serde_json::to_value(&result).map_err(|e| {
                    rpc_error(
                        ErrorCode::INTERNAL_ERROR,
                        &format!("Failed to serialize result: {}", e),
                    )
                })
            }
            other => Err(rpc_error(
                ErrorCode::METHOD_NOT_FOUND,
                &format!("Method '{}' not supported", other),
            )),
        }
    }
}

fn rpc_error(code: ErrorCode, message: &str) -> ErrorData {
    ErrorData {
        code,
        message: message.to_string().into(),
        data: None,
    }
}

impl ServerHandler for ToolServerCore {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: self.name.clone(),
                version: self.key.version.to_string(),
                title: None,
                website_url: None,
                icons: None,
            },
            instructions: if self.instructions.is_empty() {
                None
            } else {
                Some(self.instructions.clone())
            },
        }
    }
}
