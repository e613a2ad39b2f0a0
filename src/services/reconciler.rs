//! Rebuilds runtime state from durable records
//!
//! Every `tool-server` row is replayed through the instance manager in
//! insertion order. Identities that are already live are left alone, so a
//! pass can be repeated at any time to repair a diverged registry. Rows
//! without a live instance are only ever added, never deleted.
//!
//! A pass holds its lifecycle lock exclusively. Share the lock with the
//! [`ToolServerService`](crate::services::ToolServerService) through
//! [`Reconciler::with_lock`] so that no create, update or delete is midway
//! between its runtime change and its commit while records are replayed.

use crate::error::{Result, ToolServerError};
use crate::mcp::{InstanceKey, InstanceManager};
use crate::models::{ResourceDeploy, ResourceDeployFilter};
use crate::repositories::ResourceDeployRepository;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// What a pass does when a record cannot be brought up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReconcilePolicy {
    /// Stop at the first failing record and report it
    #[default]
    FailFast,
    /// Log the failure, record it in the report, move on
    SkipAndContinue,
}

impl FromStr for ReconcilePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail-fast" => Ok(ReconcilePolicy::FailFast),
            "skip-and-continue" => Ok(ReconcilePolicy::SkipAndContinue),
            other => Err(format!(
                "unknown reconcile policy '{}', expected 'fail-fast' or 'skip-and-continue'",
                other
            )),
        }
    }
}

impl fmt::Display for ReconcilePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcilePolicy::FailFast => f.write_str("fail-fast"),
            ReconcilePolicy::SkipAndContinue => f.write_str("skip-and-continue"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileFailure {
    pub id: String,
    pub version: i64,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub policy: ReconcilePolicy,
    /// Identities created by this pass, as `id@version`
    pub restored: Vec<String>,
    pub already_live: Vec<String>,
    pub failed: Vec<ReconcileFailure>,
}

pub struct Reconciler {
    repository: Arc<dyn ResourceDeployRepository>,
    manager: Arc<InstanceManager>,
    policy: ReconcilePolicy,
    lifecycle: Arc<RwLock<()>>,
}

impl Reconciler {
    pub fn new(
        repository: Arc<dyn ResourceDeployRepository>,
        manager: Arc<InstanceManager>,
        policy: ReconcilePolicy,
    ) -> Self {
        Self {
            repository,
            manager,
            policy,
            lifecycle: Arc::new(RwLock::new(())),
        }
    }

    pub fn with_lock(mut self, lifecycle: Arc<RwLock<()>>) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn policy(&self) -> ReconcilePolicy {
        self.policy
    }

    /// Replays every durable tool server record
    ///
    /// Under [`ReconcilePolicy::FailFast`] the first failure is returned as
    /// `ReconciliationFailed`; instances restored before it stay live.
    pub async fn init_on_startup(&self, ctx: &CancellationToken) -> Result<ReconcileReport> {
        let _pass = self.lifecycle.write().await;
        let records = self
            .repository
            .select_list(&ResourceDeployFilter::tool_servers())
            .await?;

        tracing::info!(
            records = records.len(),
            policy = %self.policy,
            "Reconciling tool servers"
        );

        let mut report = ReconcileReport {
            policy: self.policy,
            ..Default::default()
        };

        for record in &records {
            if ctx.is_cancelled() {
                return Err(ToolServerError::Cancelled);
            }

            let key = InstanceKey::new(record.resource_id.clone(), record.version);
            if self.manager.exists(&key.id, key.version) {
                report.already_live.push(key.to_string());
                continue;
            }

            match self.replay(ctx, record).await {
                Ok(()) => report.restored.push(key.to_string()),
                Err(ToolServerError::AlreadyExists { .. }) => {
                    // Claimed outside the service since the check above
                    report.already_live.push(key.to_string());
                }
                Err(e) => match self.policy {
                    ReconcilePolicy::FailFast => {
                        tracing::error!(server = %key, error = %e, "Reconciliation aborted");
                        return Err(ToolServerError::ReconciliationFailed {
                            id: key.id,
                            version: key.version,
                            source: Box::new(e),
                        });
                    }
                    ReconcilePolicy::SkipAndContinue => {
                        tracing::warn!(server = %key, error = %e, "Skipping tool server");
                        report.failed.push(ReconcileFailure {
                            id: key.id,
                            version: key.version,
                            error: e.to_string(),
                        });
                    }
                },
            }
        }

        tracing::info!(
            restored = report.restored.len(),
            already_live = report.already_live.len(),
            failed = report.failed.len(),
            "Reconciliation finished"
        );
        Ok(report)
    }

    async fn replay(&self, ctx: &CancellationToken, record: &ResourceDeploy) -> Result<()> {
        let config = record
            .tool_server_config()
            .map_err(|e| ToolServerError::InvalidConfig(e.to_string()))?;

        if config.id != record.resource_id || config.version != record.version {
            return Err(ToolServerError::InvalidConfig(format!(
                "stored config is for {}@{}",
                config.id, config.version
            )));
        }

        self.manager.create(ctx, config).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parses_both_spellings() {
        assert_eq!(
            "fail-fast".parse::<ReconcilePolicy>().unwrap(),
            ReconcilePolicy::FailFast
        );
        assert_eq!(
            " Skip-And-Continue ".parse::<ReconcilePolicy>().unwrap(),
            ReconcilePolicy::SkipAndContinue
        );
        assert!("abort".parse::<ReconcilePolicy>().is_err());
        assert_eq!(ReconcilePolicy::default(), ReconcilePolicy::FailFast);
        assert_eq!(ReconcilePolicy::SkipAndContinue.to_string(), "skip-and-continue");
    }
}
