use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::services::ReconcilePolicy;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_ROUTE_PREFIX: &str = "/mcp";
pub const DEFAULT_SSE_KEEP_ALIVE_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Process configuration, read once at startup
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub route_prefix: String,
    /// `None` disables SSE keep-alive events
    pub sse_keep_alive: Option<Duration>,
    pub reconcile_policy: ReconcilePolicy,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let host = env_or("HOST", DEFAULT_HOST);

        let port = match env::var("PORT") {
            Ok(raw) => raw.trim().parse::<u16>().map_err(|e| ConfigError::Invalid {
                key: "PORT",
                reason: e.to_string(),
            })?,
            Err(_) => DEFAULT_PORT,
        };

        let route_prefix = env_or("MCP_ROUTE_PREFIX", DEFAULT_ROUTE_PREFIX);
        validate_route_prefix(&route_prefix)?;

        let keep_alive_secs = match env::var("MCP_SSE_KEEP_ALIVE_SECS") {
            Ok(raw) => raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                key: "MCP_SSE_KEEP_ALIVE_SECS",
                reason: e.to_string(),
            })?,
            Err(_) => DEFAULT_SSE_KEEP_ALIVE_SECS,
        };
        let sse_keep_alive = (keep_alive_secs > 0).then(|| Duration::from_secs(keep_alive_secs));

        let reconcile_policy = match env::var("RECONCILE_POLICY") {
            Ok(raw) => raw
                .parse::<ReconcilePolicy>()
                .map_err(|reason| ConfigError::Invalid {
                    key: "RECONCILE_POLICY",
                    reason,
                })?,
            Err(_) => ReconcilePolicy::default(),
        };

        Ok(Self {
            database_url,
            host,
            port,
            route_prefix,
            sse_keep_alive,
            reconcile_policy,
        })
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                key: "HOST",
                reason: e.to_string(),
            })
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn validate_route_prefix(prefix: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        key: "MCP_ROUTE_PREFIX",
        reason: reason.to_string(),
    };

    if !prefix.starts_with('/') {
        return Err(invalid("must start with '/'"));
    }
    if prefix.len() > 1 && prefix.ends_with('/') {
        return Err(invalid("must not end with '/'"));
    }
    if prefix == "/" || prefix.starts_with("/api") {
        return Err(invalid("must not overlap the management API"));
    }
    Ok(())
}
