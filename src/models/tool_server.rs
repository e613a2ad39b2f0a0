use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Resource type under which tool server configurations are persisted
pub const TOOL_SERVER_RESOURCE_TYPE: &str = "tool-server";

/// Durable, user-authored description of one logical tool server
///
/// Identity is the pair `(id, version)`. Distinct versions of the same id are
/// independent servers and may be live at the same time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolServerConfig {
    pub id: String,
    pub version: i64,
    pub name: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

impl ToolServerConfig {
    /// Checks the identity fields; tool definitions are checked when bound
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("id must not be empty".to_string());
        }
        if self.version < 0 {
            return Err(format!("version must not be negative, got {}", self.version));
        }
        if self.name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        Ok(())
    }
}

/// A single tool exposed by a tool server
///
/// The lifecycle core treats definitions as opaque; only the tool manager
/// inspects them when binding onto a server core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default = "default_input_schema")]
    pub input_schema: Value,
}

fn default_input_schema() -> Value {
    json!({ "type": "object" })
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            description: None,
            input_schema: default_input_schema(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateToolServerRequest {
    pub id: String,
    pub version: i64,
    pub name: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

impl From<CreateToolServerRequest> for ToolServerConfig {
    fn from(req: CreateToolServerRequest) -> Self {
        Self {
            id: req.id,
            version: req.version,
            name: req.name,
            instructions: req.instructions,
            tools: req.tools,
        }
    }
}

/// Body of an update; identity comes from the request path
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateToolServerRequest {
    pub name: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

impl UpdateToolServerRequest {
    pub fn into_config(self, id: &str, version: i64) -> ToolServerConfig {
        ToolServerConfig {
            id: id.to_string(),
            version,
            name: self.name,
            instructions: self.instructions,
            tools: self.tools,
        }
    }
}

/// Returned by create and update so callers can address the new instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolServerDeployResponse {
    pub id: String,
    pub version: i64,
    pub stream_url: String,
    pub sse_url: String,
}
