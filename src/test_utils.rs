pub mod test_helpers {
    use crate::config::AppConfig;
    use crate::mcp::{Deployer, EchoInvoker, InstanceKey, ToolServerInstance, TransportError};
    use crate::models::{ResourceDeploy, ToolDefinition, ToolServerConfig};
    use crate::repositories::{ResourceDeployRepository, SqliteResourceDeployRepository};
    use crate::services::ReconcilePolicy;
    use crate::AppState;
    use async_trait::async_trait;
    use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::Notify;
    use tokio_util::sync::CancellationToken;

    /// Create a new in-memory SQLite database for testing
    pub async fn create_test_db() -> Result<SqlitePool, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await?;

        // Run migrations
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(pool)
    }

    /// Defaults for everything except the database, which tests pass in as a pool
    pub fn test_config(policy: ReconcilePolicy) -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            route_prefix: "/mcp".to_string(),
            sse_keep_alive: None,
            reconcile_policy: policy,
        }
    }

    /// Fully wired state with the echo invoker
    pub fn test_state(pool: SqlitePool, policy: ReconcilePolicy) -> AppState {
        AppState::new(
            pool,
            &test_config(policy),
            Arc::new(EchoInvoker),
            CancellationToken::new(),
        )
    }

    /// `weather@1` with a single `get_forecast` tool
    pub fn weather_config() -> ToolServerConfig {
        tool_server_config("weather", 1, &["get_forecast"])
    }

    pub fn tool_server_config(id: &str, version: i64, tools: &[&str]) -> ToolServerConfig {
        ToolServerConfig {
            id: id.to_string(),
            version,
            name: format!("{} server", id),
            instructions: String::new(),
            tools: tools.iter().map(|name| ToolDefinition::new(*name)).collect(),
        }
    }

    /// Writes a durable record directly, bypassing the runtime
    pub async fn insert_tool_server_record(
        pool: &SqlitePool,
        config: &ToolServerConfig,
    ) -> Result<i64, sqlx::Error> {
        let record = ResourceDeploy::from_tool_server(config)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        insert_raw_record(pool, record).await
    }

    /// Writes a record as-is, including a config column that may not parse
    pub async fn insert_raw_record(
        pool: &SqlitePool,
        record: ResourceDeploy,
    ) -> Result<i64, sqlx::Error> {
        let repository = SqliteResourceDeployRepository::new(pool.clone());
        let mut conn = pool.acquire().await?;
        repository
            .insert(&mut conn, &record)
            .await
            .map_err(|e| sqlx::Error::Protocol(e.to_string()))
    }

    /// Wraps a deployer so that one undeploy can be held open by the test
    ///
    /// After [`GatedDeployer::arm`], the next undeploy announces itself via
    /// [`GatedDeployer::entered`] and waits for [`GatedDeployer::release`]
    /// before running the inner undeploy.
    pub struct GatedDeployer {
        inner: Arc<dyn Deployer>,
        armed: AtomicBool,
        entered: Notify,
        released: Notify,
    }

    impl GatedDeployer {
        pub fn new(inner: Arc<dyn Deployer>) -> Self {
            Self {
                inner,
                armed: AtomicBool::new(false),
                entered: Notify::new(),
                released: Notify::new(),
            }
        }

        pub fn arm(&self) {
            self.armed.store(true, Ordering::SeqCst);
        }

        /// Resolves once an armed undeploy is parked at the gate
        pub async fn entered(&self) {
            self.entered.notified().await;
        }

        pub fn release(&self) {
            self.released.notify_one();
        }
    }

    #[async_trait]
    impl Deployer for GatedDeployer {
        fn transport(&self) -> &'static str {
            self.inner.transport()
        }

        fn route_path(&self, key: &InstanceKey) -> String {
            self.inner.route_path(key)
        }

        async fn deploy(
            &self,
            ctx: &CancellationToken,
            instance: &mut ToolServerInstance,
        ) -> Result<(), TransportError> {
            self.inner.deploy(ctx, instance).await
        }

        async fn undeploy(
            &self,
            ctx: &CancellationToken,
            instance: &ToolServerInstance,
        ) -> Result<(), TransportError> {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.released.notified().await;
            }
            self.inner.undeploy(ctx, instance).await
        }
    }

    /// Deploys through `inner`; once armed, cancels the token of the next
    /// deploy that reaches it
    ///
    /// Placed last in the deployer list, the manager finishes its create
    /// and the caller sees the cancellation only afterwards.
    pub struct CancellingDeployer {
        inner: Arc<dyn Deployer>,
        armed: AtomicBool,
    }

    impl CancellingDeployer {
        pub fn new(inner: Arc<dyn Deployer>) -> Self {
            Self {
                inner,
                armed: AtomicBool::new(false),
            }
        }

        pub fn arm(&self) {
            self.armed.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Deployer for CancellingDeployer {
        fn transport(&self) -> &'static str {
            self.inner.transport()
        }

        fn route_path(&self, key: &InstanceKey) -> String {
            self.inner.route_path(key)
        }

        async fn deploy(
            &self,
            ctx: &CancellationToken,
            instance: &mut ToolServerInstance,
        ) -> Result<(), TransportError> {
            self.inner.deploy(ctx, instance).await?;
            if self.armed.swap(false, Ordering::SeqCst) {
                ctx.cancel();
            }
            Ok(())
        }

        async fn undeploy(
            &self,
            ctx: &CancellationToken,
            instance: &ToolServerInstance,
        ) -> Result<(), TransportError> {
            self.inner.undeploy(ctx, instance).await
        }
    }

    /// Makes every following commit that touched `resource_deploy` with
    /// `statement` (`INSERT`, `UPDATE` or `DELETE`) fail
    ///
    /// A trigger writes a row that breaks a deferred foreign key, which
    /// SQLite only checks at commit time. sqlx turns foreign keys on for
    /// every connection.
    pub async fn fail_commits_after(
        pool: &SqlitePool,
        statement: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("CREATE TABLE commit_gate_parent (id INTEGER PRIMARY KEY)")
            .execute(pool)
            .await?;
        sqlx::query(
            "CREATE TABLE commit_gate (
                parent_id INTEGER REFERENCES commit_gate_parent(id) DEFERRABLE INITIALLY DEFERRED
            )",
        )
        .execute(pool)
        .await?;
        sqlx::query(&format!(
            "CREATE TRIGGER fail_commit AFTER {} ON resource_deploy
             BEGIN INSERT INTO commit_gate (parent_id) VALUES (-1); END",
            statement
        ))
        .execute(pool)
        .await?;
        Ok(())
    }
}
