pub mod resource_deploy;
pub mod tool_server;

pub use resource_deploy::{ResourceDeploy, ResourceDeployFilter};
pub use tool_server::{
    CreateToolServerRequest, ToolDefinition, ToolServerConfig, ToolServerDeployResponse,
    UpdateToolServerRequest, TOOL_SERVER_RESOURCE_TYPE,
};
