use integration::{
    AccountTarget, DataKind, DataSource, DateRange, FetchRequest, IntegrationClient,
    IntegrationError, ProcessDataSource, StaticCredentialResolver, WorkerConfig, WorkerPool,
};
use chrono::NaiveDate;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn worker_config() -> WorkerConfig {
    WorkerConfig::new(env!("CARGO_BIN_EXE_fixture-worker"))
        .with_call_timeout(Duration::from_secs(5))
        .with_handshake_timeout(Duration::from_secs(5))
}

fn target() -> AccountTarget {
    AccountTarget::new("acme", "acct-1", "ACME_KEY")
}

fn credentials() -> Arc<StaticCredentialResolver> {
    Arc::new(StaticCredentialResolver::new().with_secret("ACME_KEY", "pk_test_acme"))
}

fn pool(config: WorkerConfig) -> Arc<WorkerPool> {
    Arc::new(WorkerPool::with_credentials(config, credentials()))
}

fn range() -> DateRange {
    DateRange::new(
        NaiveDate::from_ymd_opt(2025, 12, 1).unwrap(),
        NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_round_trip_with_injected_environment() {
    let pool = pool(worker_config());
    let connection = pool.acquire(&target()).await.unwrap();

    let result = connection.call("echo", json!({"hello": "worker"})).await.unwrap();
    assert_eq!(result["parameters"]["hello"], "worker");
    assert_eq!(result["credential"], "pk_test_acme");
    assert_eq!(result["read_only"], "true");

    pool.shutdown().await;
}

#[tokio::test]
async fn test_process_reused_per_account() {
    let pool = pool(worker_config());
    let first = pool.acquire(&target()).await.unwrap();
    let second = pool.acquire(&target()).await.unwrap();

    assert_eq!(first.pid(), second.pid());
    assert_eq!(pool.active_connections().await, 1);

    let first_pid = first.call("echo", json!({})).await.unwrap()["pid"].clone();
    let second_pid = second.call("echo", json!({})).await.unwrap()["pid"].clone();
    assert_eq!(first_pid, second_pid);

    pool.shutdown().await;
}

#[tokio::test]
async fn test_handshake_version_mismatch() {
    let pool = pool(worker_config().with_env("FIXTURE_MODE", "bad_version"));
    let err = pool.acquire(&target()).await.unwrap_err();
    assert!(matches!(err, IntegrationError::Handshake { .. }), "got {:?}", err);
}

#[tokio::test]
async fn test_handshake_timeout() {
    let config = worker_config()
        .with_env("FIXTURE_MODE", "silent_handshake")
        .with_handshake_timeout(Duration::from_millis(200));
    let err = pool(config).acquire(&target()).await.unwrap_err();
    match err {
        IntegrationError::Handshake { reason, .. } => assert!(reason.contains("timed out")),
        other => panic!("expected handshake error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_spawn_failure() {
    let pool = pool(WorkerConfig::new("/nonexistent/calendar-worker"));
    let err = pool.acquire(&target()).await.unwrap_err();
    assert!(matches!(err, IntegrationError::ProcessSpawn { .. }));
}

#[tokio::test]
async fn test_missing_credential() {
    let pool = pool(worker_config());
    let unknown = AccountTarget::new("globex", "acct-2", "GLOBEX_KEY");
    let err = pool.acquire(&unknown).await.unwrap_err();
    assert!(matches!(err, IntegrationError::Credential(_)));
}

#[tokio::test]
async fn test_rpc_timeout_is_transient() {
    let config = worker_config()
        .with_env("FIXTURE_DELAY_MS", "1000")
        .with_call_timeout(Duration::from_millis(100));
    let pool = pool(config);
    let connection = pool.acquire(&target()).await.unwrap();

    let err = connection.call("get_segments", json!({})).await.unwrap_err();
    assert!(matches!(err, IntegrationError::RpcTimeout { .. }));
    assert!(err.is_transient());

    pool.shutdown().await;
}

#[tokio::test]
async fn test_cancelled_call_leaves_stream_usable() {
    let pool = pool(worker_config());
    let connection = pool.acquire(&target()).await.unwrap();

    // Larger than a pipe buffer, so the write is still in progress when cancelled.
    let payload = "x".repeat(1 << 20);
    let cancelled = tokio::time::timeout(
        Duration::from_micros(1),
        connection.call("echo", json!({ "payload": payload })),
    )
    .await;
    assert!(cancelled.is_err());

    let result = connection.call("echo", json!({"after": "cancel"})).await.unwrap();
    assert_eq!(result["parameters"]["after"], "cancel");
    assert!(connection.is_alive());

    pool.shutdown().await;
}

#[tokio::test]
async fn test_worker_error_surfaces_as_remote() {
    let pool = pool(worker_config().with_env("FIXTURE_FAIL", "metrics"));
    let source = ProcessDataSource::new(pool.clone());
    let request = FetchRequest::new(&target(), range(), DataKind::Metrics);

    let err = source.fetch(&target(), &request).await.unwrap_err();
    match err {
        IntegrationError::Remote { code, message, .. } => {
            assert_eq!(code, Some(500));
            assert!(message.contains("metrics"));
        }
        other => panic!("expected remote error, got {:?}", other),
    }

    pool.shutdown().await;
}

#[tokio::test]
async fn test_dead_worker_is_replaced() {
    let pool = pool(worker_config().with_env("FIXTURE_MODE", "crash_on_call"));
    let first = pool.acquire(&target()).await.unwrap();

    let err = first.call("get_segments", json!({})).await.unwrap_err();
    assert!(matches!(err, IntegrationError::RpcProtocol { .. }), "got {:?}", err);

    // Give the reader task a moment to observe the closed stream.
    for _ in 0..50 {
        if !first.is_alive() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!first.is_alive());

    let second = pool.acquire(&target()).await.unwrap();
    assert_ne!(first.pid(), second.pid());
    assert!(second.call("echo", json!({})).await.is_ok());

    pool.shutdown().await;
}

#[tokio::test]
async fn test_idle_connections_reaped() {
    let pool = pool(worker_config().with_idle_timeout(Duration::from_millis(50)));
    let connection = pool.acquire(&target()).await.unwrap();
    pool.release(&connection);
    drop(connection);

    assert_eq!(pool.reap_idle().await, 0);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(pool.reap_idle().await, 1);
    assert_eq!(pool.active_connections().await, 0);
}

#[tokio::test]
async fn test_background_reaper() {
    let pool = pool(worker_config().with_idle_timeout(Duration::from_millis(50)));
    let reaper = pool.spawn_reaper(Duration::from_millis(25));
    pool.acquire(&target()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(pool.active_connections().await, 0);
    reaper.abort();
}

#[tokio::test]
async fn test_catalog_pagination_capped() {
    let pool = pool(worker_config());
    let source = ProcessDataSource::new(pool.clone());
    let request = FetchRequest::new(&target(), range(), DataKind::CatalogItems);

    let result = source.fetch(&target(), &request).await.unwrap();
    assert_eq!(result.records.len(), 100);
    assert_eq!(result.records[0]["id"], "sku-0");
    assert_eq!(result.records[99]["id"], "sku-99");

    pool.shutdown().await;

    let small = Arc::new(WorkerPool::with_credentials(
        worker_config().with_catalog_max_items(30),
        credentials(),
    ));
    let result = ProcessDataSource::new(small.clone())
        .fetch(&target(), &request)
        .await
        .unwrap();
    assert_eq!(result.records.len(), 30);
    small.shutdown().await;
}

#[tokio::test]
async fn test_fetch_all_against_worker() {
    let pool = pool(worker_config().with_env("FIXTURE_FAIL", "flows,lists"));
    let client = IntegrationClient::new(Arc::new(ProcessDataSource::new(pool.clone())));

    let aggregate = client.fetch_all(&target(), range()).await.unwrap();
    assert_eq!(aggregate.records(DataKind::Segments).len(), 3);
    assert_eq!(aggregate.records(DataKind::Campaigns).len(), 3);
    assert!(aggregate.is_degraded(DataKind::Flows));
    assert!(aggregate.is_degraded(DataKind::Lists));
    assert_eq!(aggregate.advisories.len(), 2);
    assert_eq!(pool.active_connections().await, 1);

    pool.shutdown().await;
}

#[tokio::test]
async fn test_fetch_all_critical_worker_error() {
    let pool = pool(worker_config().with_env("FIXTURE_FAIL", "segments"));
    let client = IntegrationClient::new(Arc::new(ProcessDataSource::new(pool.clone())));

    let err = client.fetch_all(&target(), range()).await.unwrap_err();
    assert_eq!(err.kind(), Some(DataKind::Segments));

    pool.shutdown().await;
}
