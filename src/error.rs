use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::mcp::deployer::TransportError;
use crate::mcp::registry::RegistryError;
use crate::repositories::RepositoryError;

pub type Result<T> = std::result::Result<T, ToolServerError>;

/// Errors surfaced by tool server lifecycle operations
///
/// Every variant is returned up to the HTTP boundary. Cleanup performed after
/// a primary failure (undeploy, registry removal) logs its own failures
/// instead of replacing the primary error.
#[derive(Debug, Error)]
pub enum ToolServerError {
    /// Creation attempted for an identity that is already live
    #[error("Tool server already exists: {id}@{version}")]
    AlreadyExists { id: String, version: i64 },

    /// No runtime instance for the identity
    #[error("Tool server not found: {id}@{version}")]
    NotFound { id: String, version: i64 },

    /// A tool definition could not be bound onto the server core.
    /// The partially populated core is discarded.
    #[error("Tool registration failed for '{tool}': {reason}")]
    ToolRegistrationFailed { tool: String, reason: String },

    /// A transport could not mount the instance. Transports deployed
    /// before it have already been undeployed when this is returned.
    #[error("Deploy to {transport} transport failed: {source}")]
    TransportDeployFailed {
        transport: &'static str,
        #[source]
        source: TransportError,
    },

    /// Durable write or transaction commit failed
    #[error("Persistence failed: {0}")]
    PersistenceFailed(String),

    /// Startup replay of a durable record failed
    #[error("Reconciliation failed for {id}@{version}: {source}")]
    ReconciliationFailed {
        id: String,
        version: i64,
        #[source]
        source: Box<ToolServerError>,
    },

    /// Stored or submitted configuration is unusable
    #[error("Invalid tool server config: {0}")]
    InvalidConfig(String),

    /// The operation's cancellation token fired before it could complete
    #[error("Operation cancelled")]
    Cancelled,
}

impl ToolServerError {
    pub fn not_found(id: &str, version: i64) -> Self {
        ToolServerError::NotFound {
            id: id.to_string(),
            version,
        }
    }

    pub fn already_exists(id: &str, version: i64) -> Self {
        ToolServerError::AlreadyExists {
            id: id.to_string(),
            version,
        }
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ToolServerError::AlreadyExists { .. } => (StatusCode::CONFLICT, "already_exists"),
            ToolServerError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            ToolServerError::ToolRegistrationFailed { .. } => {
                (StatusCode::BAD_REQUEST, "tool_registration_failed")
            }
            ToolServerError::InvalidConfig(_) => (StatusCode::BAD_REQUEST, "invalid_config"),
            ToolServerError::TransportDeployFailed { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "transport_deploy_failed")
            }
            ToolServerError::PersistenceFailed(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "persistence_failed")
            }
            ToolServerError::ReconciliationFailed { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "reconciliation_failed")
            }
            ToolServerError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "cancelled"),
        }
    }
}

impl From<RegistryError> for ToolServerError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::AlreadyRegistered { id, version } => {
                ToolServerError::AlreadyExists { id, version }
            }
            RegistryError::NotFound { id, version } => ToolServerError::NotFound { id, version },
            // Reservations are only released underneath a create during shutdown
            RegistryError::ReservationLost { .. } => ToolServerError::Cancelled,
        }
    }
}

impl From<RepositoryError> for ToolServerError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::AlreadyExists {
                resource_id,
                version,
                ..
            } => ToolServerError::AlreadyExists {
                id: resource_id,
                version,
            },
            RepositoryError::Database(e) => ToolServerError::PersistenceFailed(e.to_string()),
        }
    }
}

impl From<sqlx::Error> for ToolServerError {
    fn from(err: sqlx::Error) -> Self {
        ToolServerError::PersistenceFailed(err.to_string())
    }
}

impl IntoResponse for ToolServerError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();

        if status.is_server_error() {
            tracing::error!(error = %self, "Tool server request failed");
        }

        let body = json!({
            "error": error_code,
            "error_description": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}
