use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use toolhost::error::ToolServerError;
use toolhost::mcp::{
    Deployer, EchoInvoker, InstanceManager, InstanceRegistry, MountTable, SseDeployer,
    StreamableHttpDeployer, ToolManager,
};
use toolhost::models::{ResourceDeploy, ResourceDeployFilter};
use toolhost::repositories::{ResourceDeployRepository, SqliteResourceDeployRepository};
use toolhost::services::{ReconcilePolicy, Reconciler, ToolServerService};
use toolhost::test_utils::test_helpers::{
    insert_raw_record, insert_tool_server_record, test_state, tool_server_config, weather_config,
    GatedDeployer,
};

async fn seed_with_corrupt_middle(pool: &SqlitePool) {
    insert_tool_server_record(pool, &tool_server_config("alpha", 1, &["a"]))
        .await
        .unwrap();

    let beta = tool_server_config("beta", 1, &["b"]);
    let mut corrupt = ResourceDeploy::from_tool_server(&beta).unwrap();
    corrupt.config = "{ not json".to_string();
    insert_raw_record(pool, corrupt).await.unwrap();

    insert_tool_server_record(pool, &tool_server_config("gamma", 1, &["c"]))
        .await
        .unwrap();
}

#[sqlx::test]
async fn test_weather_record_is_restored(pool: SqlitePool) {
    insert_tool_server_record(&pool, &weather_config()).await.unwrap();
    let state = test_state(pool, ReconcilePolicy::FailFast);
    assert!(state.manager().registry().is_empty());

    let report = state
        .reconciler
        .init_on_startup(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.restored, vec!["weather@1"]);
    assert_eq!(state.manager().registry().len(), 1);
    let instance = state.manager().get("weather", 1).unwrap();
    assert_eq!(instance.route_path("stream"), Some("/mcp/weather/1/stream"));
    assert!(state.mounts.is_mounted("/mcp/weather/1/sse"));
}

#[sqlx::test]
async fn test_every_record_is_restored(pool: SqlitePool) {
    for id in ["alpha", "beta", "gamma"] {
        insert_tool_server_record(&pool, &tool_server_config(id, 1, &["t"]))
            .await
            .unwrap();
    }
    insert_tool_server_record(&pool, &tool_server_config("alpha", 2, &["t"]))
        .await
        .unwrap();
    let state = test_state(pool, ReconcilePolicy::FailFast);

    let report = state
        .reconciler
        .init_on_startup(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.restored, vec!["alpha@1", "beta@1", "gamma@1", "alpha@2"]);
    let live: Vec<String> = state
        .manager()
        .list()
        .iter()
        .map(|i| i.key().to_string())
        .collect();
    assert_eq!(live, vec!["alpha@1", "alpha@2", "beta@1", "gamma@1"]);
}

#[sqlx::test]
async fn test_fail_fast_stops_at_first_bad_record(pool: SqlitePool) {
    seed_with_corrupt_middle(&pool).await;
    let state = test_state(pool, ReconcilePolicy::FailFast);

    let err = state
        .reconciler
        .init_on_startup(&CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        ToolServerError::ReconciliationFailed { id, version, source } => {
            assert_eq!(id, "beta");
            assert_eq!(version, 1);
            assert!(matches!(*source, ToolServerError::InvalidConfig(_)));
        }
        other => panic!("Expected ReconciliationFailed, got: {:?}", other),
    }
    assert!(state.manager().exists("alpha", 1));
    assert!(!state.manager().exists("gamma", 1));
    assert_eq!(state.manager().registry().len(), 1);
}

#[sqlx::test]
async fn test_skip_and_continue_restores_the_rest(pool: SqlitePool) {
    seed_with_corrupt_middle(&pool).await;
    let state = test_state(pool, ReconcilePolicy::SkipAndContinue);

    let report = state
        .reconciler
        .init_on_startup(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.restored, vec!["alpha@1", "gamma@1"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].id, "beta");
    assert!(!state.manager().exists("beta", 1));
    assert_eq!(state.manager().registry().len(), 2);
}

#[sqlx::test]
async fn test_rerun_only_fills_gaps(pool: SqlitePool) {
    insert_tool_server_record(&pool, &weather_config()).await.unwrap();
    let state = test_state(pool.clone(), ReconcilePolicy::FailFast);
    let ctx = CancellationToken::new();

    state.reconciler.init_on_startup(&ctx).await.unwrap();
    let first = state.manager().get("weather", 1).unwrap();

    insert_tool_server_record(&pool, &tool_server_config("tides", 3, &["get_tides"]))
        .await
        .unwrap();
    let report = state.reconciler.init_on_startup(&ctx).await.unwrap();

    assert_eq!(report.already_live, vec!["weather@1"]);
    assert_eq!(report.restored, vec!["tides@3"]);
    // The live instance was not rebuilt
    let again = state.manager().get("weather", 1).unwrap();
    assert!(Arc::ptr_eq(&first, &again));
}

#[sqlx::test]
async fn test_record_with_mismatched_identity_is_rejected(pool: SqlitePool) {
    let mut record = ResourceDeploy::from_tool_server(&weather_config()).unwrap();
    record.resource_id = "climate".to_string();
    insert_raw_record(&pool, record).await.unwrap();
    let state = test_state(pool, ReconcilePolicy::SkipAndContinue);

    let report = state
        .reconciler
        .init_on_startup(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].id, "climate");
    assert!(state.manager().registry().is_empty());
}

#[sqlx::test]
async fn test_cancelled_pass_restores_nothing(pool: SqlitePool) {
    insert_tool_server_record(&pool, &weather_config()).await.unwrap();
    let state = test_state(pool, ReconcilePolicy::FailFast);
    let ctx = CancellationToken::new();
    ctx.cancel();

    let err = state.reconciler.init_on_startup(&ctx).await.unwrap_err();

    assert!(matches!(err, ToolServerError::Cancelled));
    assert!(state.manager().registry().is_empty());
}

#[sqlx::test]
async fn test_pass_waits_for_delete_to_commit(pool: SqlitePool) {
    let mounts = Arc::new(MountTable::new());
    let gate = Arc::new(GatedDeployer::new(Arc::new(SseDeployer::new(
        Arc::clone(&mounts),
        "/mcp",
        None,
    ))));
    let deployers: Vec<Arc<dyn Deployer>> = vec![
        Arc::new(StreamableHttpDeployer::new(Arc::clone(&mounts), "/mcp")),
        Arc::clone(&gate) as Arc<dyn Deployer>,
    ];
    let manager = Arc::new(InstanceManager::new(
        Arc::new(InstanceRegistry::new()),
        ToolManager::new(Arc::new(EchoInvoker)),
        deployers,
    ));
    let repository = Arc::new(SqliteResourceDeployRepository::new(pool.clone()));
    let service = ToolServerService::new(pool, repository.clone(), Arc::clone(&manager));
    let reconciler = Reconciler::new(
        repository.clone(),
        Arc::clone(&manager),
        ReconcilePolicy::FailFast,
    )
    .with_lock(service.lifecycle_lock());

    service
        .create(&CancellationToken::new(), weather_config())
        .await
        .unwrap();

    gate.arm();
    let delete = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .delete(&CancellationToken::new(), "weather", 1)
                .await
        })
    };
    gate.entered().await;

    // The record is still committed while the runtime is being torn down
    let pass = tokio::spawn(async move {
        reconciler
            .init_on_startup(&CancellationToken::new())
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!pass.is_finished());

    gate.release();
    delete.await.unwrap().unwrap();
    let report = pass.await.unwrap().unwrap();

    assert!(report.restored.is_empty());
    assert!(report.already_live.is_empty());
    assert!(manager.registry().is_empty());
    assert!(mounts.is_empty());
    let rows = repository
        .select_list(&ResourceDeployFilter::tool_servers())
        .await
        .unwrap();
    assert!(rows.is_empty());
}
