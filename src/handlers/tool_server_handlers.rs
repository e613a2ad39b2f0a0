//! Management API for tool servers
//!
//! Lifecycle operations are run on their own task with a child of the
//! process shutdown token. A client that disconnects mid-request therefore
//! cannot abort a create or delete between its durable and runtime steps.

use crate::error::{Result, ToolServerError};
use crate::mcp::InstanceSummary;
use crate::models::{CreateToolServerRequest, ToolServerDeployResponse, UpdateToolServerRequest};
use crate::services::ReconcileReport;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use std::future::Future;
use tokio_util::sync::CancellationToken;

pub fn tool_server_routes() -> Router<AppState> {
    Router::new()
        .route("/api/tool-servers", post(create_tool_server).get(list_tool_servers))
        .route("/api/tool-servers/reconcile", post(reconcile_tool_servers))
        .route(
            "/api/tool-servers/{id}/{version}",
            get(get_tool_server)
                .put(update_tool_server)
                .delete(delete_tool_server),
        )
}

/// Runs `op` to completion on a separate task
async fn run_detached<T, F, Fut>(state: &AppState, op: F) -> Result<T>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let ctx = state.shutdown.child_token();
    tokio::spawn(op(ctx)).await.map_err(|e| {
        tracing::error!(error = %e, "Lifecycle task did not complete");
        ToolServerError::Cancelled
    })?
}

/// POST /api/tool-servers
///
/// ## Request Body (JSON)
/// ```json
/// {
///   "id": "weather",
///   "version": 1,
///   "name": "Weather",
///   "tools": [{ "name": "get_forecast" }]
/// }
/// ```
///
/// ## Response (201 CREATED)
/// ```json
/// {
///   "id": "weather",
///   "version": 1,
///   "stream_url": "/mcp/weather/1/stream",
///   "sse_url": "/mcp/weather/1/sse"
/// }
/// ```
pub async fn create_tool_server(
    State(state): State<AppState>,
    Json(request): Json<CreateToolServerRequest>,
) -> Result<Response> {
    let service = state.service.clone();
    let instance = run_detached(&state, move |ctx| async move {
        service.create(&ctx, request.into()).await
    })
    .await?;

    Ok((StatusCode::CREATED, Json(instance.deploy_response())).into_response())
}

/// GET /api/tool-servers
pub async fn list_tool_servers(State(state): State<AppState>) -> Json<Vec<InstanceSummary>> {
    Json(state.service.list())
}

/// GET /api/tool-servers/{id}/{version}
pub async fn get_tool_server(
    State(state): State<AppState>,
    Path((id, version)): Path<(String, i64)>,
) -> Result<Json<InstanceSummary>> {
    Ok(Json(state.service.get(&id, version)?))
}

/// PUT /api/tool-servers/{id}/{version}
///
/// Replaces the instance in place. The identity is unreachable for the
/// duration of the call.
pub async fn update_tool_server(
    State(state): State<AppState>,
    Path((id, version)): Path<(String, i64)>,
    Json(request): Json<UpdateToolServerRequest>,
) -> Result<Json<ToolServerDeployResponse>> {
    let service = state.service.clone();
    let config = request.into_config(&id, version);
    let instance = run_detached(&state, move |ctx| async move {
        service.update(&ctx, config).await
    })
    .await?;

    Ok(Json(instance.deploy_response()))
}

/// DELETE /api/tool-servers/{id}/{version}
pub async fn delete_tool_server(
    State(state): State<AppState>,
    Path((id, version)): Path<(String, i64)>,
) -> Result<StatusCode> {
    let service = state.service.clone();
    run_detached(&state, move |ctx| async move {
        service.delete(&ctx, &id, version).await
    })
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/tool-servers/reconcile
///
/// Brings up every stored tool server that is not live. Safe to call at
/// any time.
pub async fn reconcile_tool_servers(
    State(state): State<AppState>,
) -> Result<Json<ReconcileReport>> {
    let reconciler = state.reconciler.clone();
    let report = run_detached(&state, move |ctx| async move {
        reconciler.init_on_startup(&ctx).await
    })
    .await?;

    Ok(Json(report))
}
