use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::tool_server::{ToolServerConfig, TOOL_SERVER_RESOURCE_TYPE};

/// One row of the `resource_deploy` table
///
/// Keyed by `(resource_id, resource_type, version)`. For tool servers the
/// `config` column holds the serialized [`ToolServerConfig`].
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ResourceDeploy {
    pub id: Option<i64>,
    pub resource_id: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub resource_type: String,
    pub version: i64,
    pub name: String,
    pub description: String,
    pub config: String,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
}

impl ResourceDeploy {
    pub fn from_tool_server(config: &ToolServerConfig) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: None,
            resource_id: config.id.clone(),
            resource_type: TOOL_SERVER_RESOURCE_TYPE.to_string(),
            version: config.version,
            name: config.name.clone(),
            description: config.instructions.clone(),
            config: serde_json::to_string(config)?,
            created_at: None,
            updated_at: None,
        })
    }

    pub fn tool_server_config(&self) -> Result<ToolServerConfig, serde_json::Error> {
        serde_json::from_str(&self.config)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResourceDeployFilter {
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
}

impl ResourceDeployFilter {
    pub fn tool_servers() -> Self {
        Self {
            resource_type: Some(TOOL_SERVER_RESOURCE_TYPE.to_string()),
            resource_id: None,
        }
    }
}
