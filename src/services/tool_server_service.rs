//! Tool server lifecycle with durable records
//!
//! The `resource_deploy` table is the source of truth and the instance
//! registry a cache derived from it. There is no two-phase commit between the
//! two, so every operation runs as a small saga:
//!
//! 1. open a transaction and write the durable change
//! 2. apply the change to the runtime
//! 3. commit
//!
//! A failure in step 2 drops the transaction (rollback). A failure in step 3,
//! or cancellation between steps 2 and 3, undoes step 2 before returning.
//! A crash between steps 2 and 3 is repaired by the next reconciliation.
//!
//! Sagas hold the shared side of a lifecycle lock from start to commit and a
//! reconciliation pass holds the exclusive side, so a pass never reads a
//! record whose runtime change is still in flight.

use crate::error::{Result, ToolServerError};
use crate::mcp::{InstanceManager, InstanceSummary, ToolServerInstance};
use crate::models::{ResourceDeploy, ToolServerConfig, TOOL_SERVER_RESOURCE_TYPE};
use crate::repositories::ResourceDeployRepository;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct ToolServerService {
    pool: SqlitePool,
    repository: Arc<dyn ResourceDeployRepository>,
    manager: Arc<InstanceManager>,
    lifecycle: Arc<RwLock<()>>,
}

impl ToolServerService {
    pub fn new(
        pool: SqlitePool,
        repository: Arc<dyn ResourceDeployRepository>,
        manager: Arc<InstanceManager>,
    ) -> Self {
        Self {
            pool,
            repository,
            manager,
            lifecycle: Arc::new(RwLock::new(())),
        }
    }

    pub fn manager(&self) -> &Arc<InstanceManager> {
        &self.manager
    }

    /// Lock a [`Reconciler`](crate::services::Reconciler) must share with
    /// this service to be serialized against its sagas
    pub fn lifecycle_lock(&self) -> Arc<RwLock<()>> {
        Arc::clone(&self.lifecycle)
    }

    pub async fn create(
        &self,
        ctx: &CancellationToken,
        config: ToolServerConfig,
    ) -> Result<Arc<ToolServerInstance>> {
        config.validate().map_err(ToolServerError::InvalidConfig)?;
        let record = to_record(&config)?;

        if ctx.is_cancelled() {
            return Err(ToolServerError::Cancelled);
        }

        let _saga = self.lifecycle.read().await;
        let mut tx = self.pool.begin().await?;
        self.repository.insert(&mut *tx, &record).await?;

        let instance = self.manager.create(ctx, config).await?;
        let (id, version) = (record.resource_id.as_str(), record.version);

        if ctx.is_cancelled() {
            tracing::warn!(id, version, "Create cancelled before commit, tearing down");
            self.compensate_create(id, version).await;
            return Err(ToolServerError::Cancelled);
        }

        if let Err(e) = tx.commit().await {
            tracing::error!(id, version, error = %e, "Commit failed after create, tearing down");
            self.compensate_create(id, version).await;
            return Err(ToolServerError::PersistenceFailed(e.to_string()));
        }

        Ok(instance)
    }

    pub async fn update(
        &self,
        ctx: &CancellationToken,
        config: ToolServerConfig,
    ) -> Result<Arc<ToolServerInstance>> {
        config.validate().map_err(ToolServerError::InvalidConfig)?;
        let record = to_record(&config)?;
        let (id, version) = (record.resource_id.as_str(), record.version);

        if ctx.is_cancelled() {
            return Err(ToolServerError::Cancelled);
        }

        let _saga = self.lifecycle.read().await;
        let mut tx = self.pool.begin().await?;
        if !self.repository.update(&mut *tx, &record).await? {
            return Err(ToolServerError::not_found(id, version));
        }

        let previous = self.manager.get(id, version)?.config.clone();
        let instance = self.manager.update(ctx, config).await?;

        if ctx.is_cancelled() {
            tracing::warn!(id, version, "Update cancelled before commit, restoring");
            self.restore(&previous).await;
            return Err(ToolServerError::Cancelled);
        }

        if let Err(e) = tx.commit().await {
            tracing::error!(id, version, error = %e, "Commit failed after update, restoring");
            self.restore(&previous).await;
            return Err(ToolServerError::PersistenceFailed(e.to_string()));
        }

        Ok(instance)
    }

    /// Removes the durable record and the live instance
    ///
    /// A record without a live instance is still removed, so a diverged
    /// store can be cleaned up through this call. Once the runtime side is
    /// gone the commit always runs, cancelled or not.
    pub async fn delete(&self, ctx: &CancellationToken, id: &str, version: i64) -> Result<()> {
        if ctx.is_cancelled() {
            return Err(ToolServerError::Cancelled);
        }

        let _saga = self.lifecycle.read().await;
        let stored = self
            .repository
            .get(TOOL_SERVER_RESOURCE_TYPE, id, version)
            .await?;

        let mut tx = self.pool.begin().await?;
        let existed = self
            .repository
            .delete(&mut *tx, TOOL_SERVER_RESOURCE_TYPE, id, version)
            .await?;

        match self.manager.delete(ctx, id, version).await {
            Ok(()) => {}
            Err(ToolServerError::NotFound { .. }) if existed => {
                tracing::warn!(id, version, "Durable record had no live instance");
            }
            Err(e) => return Err(e),
        }

        if let Err(e) = tx.commit().await {
            tracing::error!(id, version, error = %e, "Commit failed after delete, restoring");
            if let Some(config) = stored.as_ref().and_then(|r| r.tool_server_config().ok()) {
                self.restore(&config).await;
            }
            return Err(ToolServerError::PersistenceFailed(e.to_string()));
        }

        Ok(())
    }

    pub fn get(&self, id: &str, version: i64) -> Result<InstanceSummary> {
        Ok(self.manager.get(id, version)?.summary())
    }

    pub fn list(&self) -> Vec<InstanceSummary> {
        self.manager.list().iter().map(|i| i.summary()).collect()
    }

    async fn compensate_create(&self, id: &str, version: i64) {
        if let Err(e) = self.manager.delete(&CancellationToken::new(), id, version).await {
            tracing::error!(id, version, error = %e, "Failed to tear down instance");
        }
    }

    /// Best-effort return of the runtime to `config`
    async fn restore(&self, config: &ToolServerConfig) {
        let ctx = CancellationToken::new();
        let result = if self.manager.exists(&config.id, config.version) {
            self.manager.update(&ctx, config.clone()).await
        } else {
            self.manager.create(&ctx, config.clone()).await
        };
        if let Err(e) = result {
            tracing::error!(
                id = %config.id,
                version = config.version,
                error = %e,
                "Failed to restore previous instance"
            );
        }
    }
}

fn to_record(config: &ToolServerConfig) -> Result<ResourceDeploy> {
    ResourceDeploy::from_tool_server(config)
        .map_err(|e| ToolServerError::InvalidConfig(e.to_string()))
}
