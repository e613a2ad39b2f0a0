pub mod tool_server_handlers;

pub use tool_server_handlers::{
    create_tool_server, delete_tool_server, get_tool_server, list_tool_servers,
    reconcile_tool_servers, tool_server_routes, update_tool_server,
};
