//! Tool server lifecycle orchestration
//!
//! Per identity an instance moves `ABSENT -> BUILDING -> LIVE` on create and
//! `LIVE -> TEARING_DOWN -> ABSENT` on delete. `BUILDING` and `TEARING_DOWN`
//! are registry claims: they block concurrent creates for the same identity
//! but are never visible through `get`, `exists` or `list`. Exactly one
//! delete can claim a live instance, and it only undeploys what that
//! instance mounted.
//!
//! Transports are deployed one after another. Each one that succeeds is
//! pushed on a stack, and any later failure (including cancellation)
//! unwinds that stack in reverse before the error is returned.

use crate::error::{Result, ToolServerError};
use crate::mcp::deployer::{Deployer, TransportError};
use crate::mcp::instance::ToolServerInstance;
use crate::mcp::registry::InstanceRegistry;
use crate::mcp::tool_manager::ToolManager;
use crate::models::ToolServerConfig;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct InstanceManager {
    registry: Arc<InstanceRegistry>,
    tool_manager: ToolManager,
    deployers: Vec<Arc<dyn Deployer>>,
}

impl InstanceManager {
    /// `deployers` are deployed in the given order and undeployed in reverse
    pub fn new(
        registry: Arc<InstanceRegistry>,
        tool_manager: ToolManager,
        deployers: Vec<Arc<dyn Deployer>>,
    ) -> Self {
        Self {
            registry,
            tool_manager,
            deployers,
        }
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    pub fn exists(&self, id: &str, version: i64) -> bool {
        self.registry.exists(id, version)
    }

    pub fn get(&self, id: &str, version: i64) -> Result<Arc<ToolServerInstance>> {
        Ok(self.registry.get(id, version)?)
    }

    pub fn list(&self) -> Vec<Arc<ToolServerInstance>> {
        self.registry.list()
    }

    /// Builds, deploys and publishes a new instance
    ///
    /// On error nothing is left behind: no registry entry, no mounted route.
    pub async fn create(
        &self,
        ctx: &CancellationToken,
        config: ToolServerConfig,
    ) -> Result<Arc<ToolServerInstance>> {
        if ctx.is_cancelled() {
            return Err(ToolServerError::Cancelled);
        }
        config.validate().map_err(ToolServerError::InvalidConfig)?;

        let reservation = self.registry.reserve(&config.id, config.version)?;
        let key = reservation.key().clone();
        tracing::debug!(server = %key, "Building tool server");

        let mut core = self.tool_manager.new_core(&config);
        self.tool_manager.register_tools(&config.tools, &mut core)?;

        let mut instance = ToolServerInstance::new(Arc::new(config), core);
        self.deploy_all(ctx, &mut instance).await?;

        let instance = Arc::new(instance);
        if let Err(e) = reservation.commit(Arc::clone(&instance)) {
            tracing::warn!(
                server = %key,
                error = %e,
                "Lost registry reservation, rolling back deploy"
            );
            self.undeploy_stack(ctx, &instance, &self.deployers).await;
            return Err(e.into());
        }

        tracing::info!(
            server = %key,
            tools = instance.config.tools.len(),
            "Tool server live"
        );
        Ok(instance)
    }

    /// Tears down a live instance
    ///
    /// Transport failures are logged and do not stop the remaining
    /// transports from being undeployed. A delete racing another delete of
    /// the same instance gets `NotFound`; creates of the identity get
    /// `AlreadyExists` until the teardown has finished.
    pub async fn delete(&self, ctx: &CancellationToken, id: &str, version: i64) -> Result<()> {
        let teardown = self.registry.begin_teardown(id, version)?;
        let instance = Arc::clone(teardown.instance());

        self.undeploy_stack(ctx, &instance, &self.deployers).await;
        teardown.finish();

        tracing::info!(server = %instance.key(), "Tool server removed");
        Ok(())
    }

    /// Replaces a live instance with one built from `config`
    ///
    /// Runs as delete then create, so the identity resolves to nothing for a
    /// short window. If the new config cannot be brought up, the previous
    /// config is redeployed before the error is returned.
    pub async fn update(
        &self,
        ctx: &CancellationToken,
        config: ToolServerConfig,
    ) -> Result<Arc<ToolServerInstance>> {
        let previous = self.registry.get(&config.id, config.version)?;
        let previous_config = ToolServerConfig::clone(&previous.config);
        drop(previous);

        self.delete(ctx, &config.id, config.version).await?;

        match self.create(ctx, config).await {
            Ok(instance) => Ok(instance),
            Err(e) => {
                tracing::warn!(
                    id = %previous_config.id,
                    version = previous_config.version,
                    error = %e,
                    "Update failed, restoring previous config"
                );
                // Restoration must run even when the caller's token fired
                let restore_ctx = CancellationToken::new();
                if let Err(restore_err) = self.create(&restore_ctx, previous_config).await {
                    tracing::error!(error = %restore_err, "Failed to restore previous config");
                }
                Err(e)
            }
        }
    }

    /// Undeploys and forgets every live instance; returns how many there were
    pub async fn shutdown_all(&self, ctx: &CancellationToken) -> usize {
        let instances = self.registry.drain();
        for instance in &instances {
            self.undeploy_stack(ctx, instance, &self.deployers).await;
        }
        tracing::info!(count = instances.len(), "All tool servers shut down");
        instances.len()
    }

    async fn deploy_all(
        &self,
        ctx: &CancellationToken,
        instance: &mut ToolServerInstance,
    ) -> Result<()> {
        let mut deployed: Vec<Arc<dyn Deployer>> = Vec::with_capacity(self.deployers.len());

        for deployer in &self.deployers {
            let result = if ctx.is_cancelled() {
                Err(TransportError::Cancelled)
            } else {
                deployer.deploy(ctx, instance).await
            };

            if let Err(e) = result {
                tracing::warn!(
                    server = %instance.key(),
                    transport = deployer.transport(),
                    error = %e,
                    rollback = deployed.len(),
                    "Transport deploy failed, rolling back"
                );
                self.undeploy_stack(ctx, instance, &deployed).await;
                return Err(match e {
                    TransportError::Cancelled => ToolServerError::Cancelled,
                    source => ToolServerError::TransportDeployFailed {
                        transport: deployer.transport(),
                        source,
                    },
                });
            }

            deployed.push(Arc::clone(deployer));
        }

        Ok(())
    }

    /// Undeploys `stack` from the top down, logging failures
    async fn undeploy_stack(
        &self,
        ctx: &CancellationToken,
        instance: &ToolServerInstance,
        stack: &[Arc<dyn Deployer>],
    ) {
        for deployer in stack.iter().rev() {
            if let Err(e) = deployer.undeploy(ctx, instance).await {
                tracing::error!(
                    server = %instance.key(),
                    transport = deployer.transport(),
                    error = %e,
                    "Transport undeploy failed"
                );
            }
        }
    }
}
