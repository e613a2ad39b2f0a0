pub mod reconciler;
pub mod tool_server_service;

pub use reconciler::{ReconcileFailure, ReconcilePolicy, ReconcileReport, Reconciler};
pub use tool_server_service::ToolServerService;
