use serial_test::serial;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use toolhost::config::{AppConfig, ConfigError};
use toolhost::services::ReconcilePolicy;

const KEYS: [&str; 6] = [
    "DATABASE_URL",
    "HOST",
    "PORT",
    "MCP_ROUTE_PREFIX",
    "MCP_SSE_KEEP_ALIVE_SECS",
    "RECONCILE_POLICY",
];

#[derive(Default)]
struct EnvGuard {
    original: HashMap<String, Option<String>>,
}

impl EnvGuard {
    /// Starts from an environment with only DATABASE_URL set
    fn clean() -> Self {
        let mut guard = Self::default();
        for key in KEYS {
            guard.remove(key);
        }
        guard.set("DATABASE_URL", "sqlite://data/toolhost.db");
        guard
    }

    fn set(&mut self, key: &str, value: impl Into<String>) {
        self.original
            .entry(key.to_string())
            .or_insert_with(|| env::var(key).ok());
        env::set_var(key, value.into());
    }

    fn remove(&mut self, key: &str) {
        self.original
            .entry(key.to_string())
            .or_insert_with(|| env::var(key).ok());
        env::remove_var(key);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in self.original.drain() {
            match value {
                Some(v) => env::set_var(&key, v),
                None => env::remove_var(&key),
            }
        }
    }
}

fn invalid_key(err: ConfigError) -> &'static str {
    match err {
        ConfigError::Invalid { key, .. } => key,
        other => panic!("Expected Invalid, got: {:?}", other),
    }
}

#[test]
#[serial]
fn test_defaults() {
    let _guard = EnvGuard::clean();

    let config = AppConfig::from_env().unwrap();

    assert_eq!(config.database_url, "sqlite://data/toolhost.db");
    assert_eq!(config.host, "127.0.0.1");
    assert_eq!(config.port, 8080);
    assert_eq!(config.route_prefix, "/mcp");
    assert_eq!(config.sse_keep_alive, Some(Duration::from_secs(30)));
    assert_eq!(config.reconcile_policy, ReconcilePolicy::FailFast);
    assert_eq!(config.bind_addr().unwrap().to_string(), "127.0.0.1:8080");
}

#[test]
#[serial]
fn test_database_url_is_required() {
    let mut guard = EnvGuard::clean();
    guard.remove("DATABASE_URL");
    assert!(matches!(
        AppConfig::from_env(),
        Err(ConfigError::Missing("DATABASE_URL"))
    ));

    guard.set("DATABASE_URL", "   ");
    assert!(matches!(
        AppConfig::from_env(),
        Err(ConfigError::Missing("DATABASE_URL"))
    ));
}

#[test]
#[serial]
fn test_overrides_are_applied() {
    let mut guard = EnvGuard::clean();
    guard.set("HOST", "0.0.0.0");
    guard.set("PORT", "9100");
    guard.set("MCP_ROUTE_PREFIX", "/tools");
    guard.set("MCP_SSE_KEEP_ALIVE_SECS", "5");
    guard.set("RECONCILE_POLICY", " Skip-And-Continue ");

    let config = AppConfig::from_env().unwrap();

    assert_eq!(config.bind_addr().unwrap().to_string(), "0.0.0.0:9100");
    assert_eq!(config.route_prefix, "/tools");
    assert_eq!(config.sse_keep_alive, Some(Duration::from_secs(5)));
    assert_eq!(config.reconcile_policy, ReconcilePolicy::SkipAndContinue);
}

#[test]
#[serial]
fn test_zero_keep_alive_disables_it() {
    let mut guard = EnvGuard::clean();
    guard.set("MCP_SSE_KEEP_ALIVE_SECS", "0");

    assert_eq!(AppConfig::from_env().unwrap().sse_keep_alive, None);
}

#[test]
#[serial]
fn test_invalid_values_name_their_key() {
    let mut guard = EnvGuard::clean();

    guard.set("PORT", "eighty");
    assert_eq!(invalid_key(AppConfig::from_env().unwrap_err()), "PORT");
    guard.set("PORT", "70000");
    assert_eq!(invalid_key(AppConfig::from_env().unwrap_err()), "PORT");
    guard.remove("PORT");

    guard.set("MCP_SSE_KEEP_ALIVE_SECS", "-1");
    assert_eq!(
        invalid_key(AppConfig::from_env().unwrap_err()),
        "MCP_SSE_KEEP_ALIVE_SECS"
    );
    guard.remove("MCP_SSE_KEEP_ALIVE_SECS");

    guard.set("RECONCILE_POLICY", "retry-forever");
    assert_eq!(
        invalid_key(AppConfig::from_env().unwrap_err()),
        "RECONCILE_POLICY"
    );
}

#[test]
#[serial]
fn test_route_prefix_must_not_overlap_management_api() {
    let mut guard = EnvGuard::clean();

    for prefix in ["mcp", "/mcp/", "/", "/api", "/api/mcp"] {
        guard.set("MCP_ROUTE_PREFIX", prefix);
        assert_eq!(
            invalid_key(AppConfig::from_env().unwrap_err()),
            "MCP_ROUTE_PREFIX",
            "prefix {:?} should be rejected",
            prefix
        );
    }

    guard.set("MCP_ROUTE_PREFIX", "/servers/mcp");
    assert_eq!(AppConfig::from_env().unwrap().route_prefix, "/servers/mcp");
}

#[test]
#[serial]
fn test_unparseable_host_is_reported_at_bind() {
    let mut guard = EnvGuard::clean();
    guard.set("HOST", "not a host");

    let config = AppConfig::from_env().unwrap();
    assert_eq!(invalid_key(config.bind_addr().unwrap_err()), "HOST");
}
