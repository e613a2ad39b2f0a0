//! Streamable HTTP transport
//!
//! A plain request/response endpoint for MCP messages:
//!
//! - `POST {prefix}/{id}/{version}/stream` - send a JSON-RPC message, receive the response
//! - `OPTIONS {prefix}/{id}/{version}/stream` - CORS preflight
//!
//! ```http
//! POST /mcp/weather/1/stream
//! Content-Type: application/json
//!
//! {"jsonrpc":"2.0","id":1,"method":"tools/list"}
//! ```

use crate::mcp::deployer::{route_path, Deployer, TransportError, STREAM_TRANSPORT};
use crate::mcp::instance::{InstanceKey, ToolServerInstance};
use crate::mcp::mount::MountTable;
use crate::mcp::service::ToolServerCore;
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct StreamableHttpDeployer {
    mounts: Arc<MountTable>,
    prefix: String,
}

impl StreamableHttpDeployer {
    pub fn new(mounts: Arc<MountTable>, prefix: impl Into<String>) -> Self {
        Self {
            mounts,
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl Deployer for StreamableHttpDeployer {
    fn transport(&self) -> &'static str {
        STREAM_TRANSPORT
    }

    fn route_path(&self, key: &InstanceKey) -> String {
        route_path(&self.prefix, key, STREAM_TRANSPORT)
    }

    async fn deploy(
        &self,
        ctx: &CancellationToken,
        instance: &mut ToolServerInstance,
    ) -> Result<(), TransportError> {
        if ctx.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let path = self.route_path(&instance.key());
        let router = Router::new()
            .route(
                &path,
                post(handle_streamable_http).options(handle_streamable_http_options),
            )
            .with_state(instance.core.clone());

        self.mounts.mount(&path, instance.generation, router)?;
        tracing::info!(server = %instance.key(), path = %path, "Streamable HTTP endpoint deployed");
        instance.route_paths.insert(STREAM_TRANSPORT.to_string(), path);
        Ok(())
    }

    async fn undeploy(
        &self,
        _ctx: &CancellationToken,
        instance: &ToolServerInstance,
    ) -> Result<(), TransportError> {
        let path = self.route_path(&instance.key());
        if self.mounts.unmount(&path, instance.generation) {
            tracing::info!(
                server = %instance.key(),
                path = %path,
                "Streamable HTTP endpoint removed"
            );
        }
        Ok(())
    }
}

/// Handles one JSON-RPC message
///
/// Returns `200 OK` with the JSON-RPC response, or `202 Accepted` with an
/// empty body for notifications.
pub async fn handle_streamable_http(
    State(core): State<ToolServerCore>,
    Json(request): Json<Value>,
) -> Result<Response, StatusCode> {
    tracing::debug!(server = %core.key(), "Received HTTP transport request");

    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        header::HeaderValue::from_static("*"),
    );

    let Some(response) = core.handle_request(request).await else {
        return Ok((StatusCode::ACCEPTED, headers).into_response());
    };

    let body = Body::from(
        serde_json::to_string(&response).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
    );
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );

    Ok((StatusCode::OK, headers, body).into_response())
}

/// CORS preflight, `204 No Content`
pub async fn handle_streamable_http_options() -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        header::HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        header::HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        header::HeaderValue::from_static("Content-Type, Authorization"),
    );
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        header::HeaderValue::from_static("3600"),
    );

    (StatusCode::NO_CONTENT, headers).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::mount::mounted_routes;
    use crate::mcp::tool_manager::EchoInvoker;
    use crate::models::{ToolDefinition, ToolServerConfig};
    use axum::extract::Request;
    use serde_json::json;
    use tower::ServiceExt;

    fn instance() -> ToolServerInstance {
        let config = ToolServerConfig {
            id: "weather".to_string(),
            version: 1,
            name: "Weather".to_string(),
            instructions: String::new(),
            tools: vec![ToolDefinition::new("get_forecast")],
        };
        let mut core = ToolServerCore::new(&config, Arc::new(EchoInvoker));
        core.bind_tool(&config.tools[0]).unwrap();
        ToolServerInstance::new(Arc::new(config), core)
    }

    fn post_json(uri: &str, body: Value) -> Request {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_deploy_serves_json_rpc_until_undeployed() {
        let mounts = Arc::new(MountTable::new());
        let app = mounted_routes(Arc::clone(&mounts));
        let deployer = StreamableHttpDeployer::new(Arc::clone(&mounts), "/mcp");
        let ctx = CancellationToken::new();
        let mut instance = instance();

        deployer.deploy(&ctx, &mut instance).await.unwrap();
        assert_eq!(instance.route_path(STREAM_TRANSPORT), Some("/mcp/weather/1/stream"));

        let response = app
            .clone()
            .oneshot(post_json(
                "/mcp/weather/1/stream",
                json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["result"]["tools"][0]["name"], "get_forecast");

        deployer.undeploy(&ctx, &instance).await.unwrap();
        let response = app
            .oneshot(post_json(
                "/mcp/weather/1/stream",
                json!({"jsonrpc": "2.0", "id": 2, "method": "ping"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_notification_is_accepted_without_body() {
        let mounts = Arc::new(MountTable::new());
        let deployer = StreamableHttpDeployer::new(Arc::clone(&mounts), "/mcp");
        let mut instance = instance();
        deployer
            .deploy(&CancellationToken::new(), &mut instance)
            .await
            .unwrap();

        let response = mounted_routes(mounts)
            .oneshot(post_json(
                "/mcp/weather/1/stream",
                json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_cancelled_deploy_mounts_nothing() {
        let mounts = Arc::new(MountTable::new());
        let deployer = StreamableHttpDeployer::new(Arc::clone(&mounts), "/mcp");
        let ctx = CancellationToken::new();
        ctx.cancel();
        let mut instance = instance();

        let err = deployer.deploy(&ctx, &mut instance).await.unwrap_err();

        assert!(matches!(err, TransportError::Cancelled));
        assert!(mounts.is_empty());
        assert!(instance.route_paths.is_empty());
    }

    #[tokio::test]
    async fn test_stale_undeploy_keeps_newer_endpoint() {
        let mounts = Arc::new(MountTable::new());
        let deployer = StreamableHttpDeployer::new(Arc::clone(&mounts), "/mcp");
        let ctx = CancellationToken::new();
        let stale = instance();
        let mut newer = instance();
        deployer.deploy(&ctx, &mut newer).await.unwrap();

        deployer.undeploy(&ctx, &stale).await.unwrap();

        assert!(mounts.is_mounted("/mcp/weather/1/stream"));
        let response = mounted_routes(mounts)
            .oneshot(post_json(
                "/mcp/weather/1/stream",
                json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_undeploy_without_deploy_is_noop() {
        let mounts = Arc::new(MountTable::new());
        let deployer = StreamableHttpDeployer::new(mounts, "/mcp");

        deployer
            .undeploy(&CancellationToken::new(), &instance())
            .await
            .unwrap();
    }
}
