use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use worker_framework::{endpoint, BuildError, ResourceState, RuntimeConfig};
use worker_sample::clients::AgentError;
use worker_sample::lifecycle::ServiceHost;

fn config_in(dir: &Path) -> RuntimeConfig {
    RuntimeConfig {
        namespace: "sample".into(),
        conf_dir: dir.to_path_buf(),
        scan_period: Duration::from_millis(20),
        request_timeout: Duration::from_secs(2),
        ..RuntimeConfig::default()
    }
}

fn write_kv(dir: &Path, body: serde_json::Value) {
    std::fs::write(dir.join("kv_default.json"), body.to_string()).unwrap();
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn key_value_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    write_kv(dir.path(), json!({"vendor": "memory", "capacity": 100, "namespace": "app"}));

    let host = ServiceHost::start(config_in(dir.path())).await.unwrap();
    assert!(host.kv_state().is_active());
    let kv = host.kv_agent();

    kv.set("greeting", "hello").await.unwrap();
    assert_eq!(kv.get("greeting").await.unwrap(), Some("hello".into()));
    assert_eq!(kv.get("missing").await.unwrap(), None);
    assert_eq!(kv.incr("visits", 2).await.unwrap(), 2);
    assert_eq!(kv.incr("visits", 3).await.unwrap(), 5);

    assert!(kv.hset("user", "name", "ada").await.unwrap());
    kv.hmset(
        "user",
        BTreeMap::from([("lang".to_string(), "rust".to_string())]),
    )
    .await
    .unwrap();
    assert_eq!(kv.hget("user", "name").await.unwrap(), Some("ada".into()));
    assert_eq!(kv.hkeys("user").await.unwrap(), vec!["lang", "name"]);
    assert_eq!(
        kv.hmget("user", &["lang", "age"]).await.unwrap(),
        vec![Some("rust".to_string()), None]
    );

    let err = kv.incr("user", 1).await.unwrap_err();
    assert!(matches!(err, AgentError::Rejected(_)));

    assert_eq!(kv.size().await.unwrap(), 3);
    assert_eq!(kv.del(&["greeting", "nope"]).await.unwrap(), 1);
    assert_eq!(kv.flush().await.unwrap(), 2);

    host.shutdown().await;
}

#[tokio::test]
async fn editing_the_file_swaps_the_store() {
    let dir = tempfile::tempdir().unwrap();
    write_kv(dir.path(), json!({"vendor": "memory", "capacity": 1}));

    let host = ServiceHost::start(config_in(dir.path())).await.unwrap();
    let first = host.current_kv().unwrap();
    assert_eq!(first.worker.capacity(), 1);

    let kv = host.kv_agent();
    kv.set("a", "1").await.unwrap();
    assert!(matches!(kv.set("b", "2").await, Err(AgentError::Rejected(_))));

    write_kv(dir.path(), json!({"vendor": "memory", "capacity": 10}));
    wait_for(|| {
        host.current_kv()
            .is_some_and(|h| h.deployment_id != first.deployment_id)
    })
    .await;

    let second = host.current_kv().unwrap();
    assert_eq!(second.worker.capacity(), 10);
    assert_eq!(second.address, first.address);
    // the old store was flushed on undeploy
    assert_eq!(first.worker.size(), 0);

    kv.set("b", "2").await.unwrap();
    assert_eq!(kv.get("a").await.unwrap(), None);
    assert_eq!(host.supervisor().ledger().count_for("default"), 1);

    host.shutdown().await;
}

#[tokio::test]
async fn unsupported_vendor_leaves_store_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    write_kv(dir.path(), json!({"vendor": "redis"}));

    let host = ServiceHost::start(config_in(dir.path())).await.unwrap();
    assert_eq!(
        host.kv_state(),
        ResourceState::Unavailable {
            reason: BuildError::Unsupported("redis".into()).to_string()
        }
    );
    assert!(host.current_kv().is_none());
    assert!(matches!(
        host.kv_agent().size().await,
        Err(AgentError::Unavailable(_))
    ));

    // the echo worker is unaffected
    let pong = endpoint(host.supervisor().bus())
        .address(host.echo_address())
        .action("ping")
        .request_empty()
        .await
        .unwrap();
    assert_eq!(pong, json!({ "pong": 1 }));

    write_kv(dir.path(), json!({"vendor": "memory"}));
    wait_for(|| host.kv_state().is_active()).await;
    assert_eq!(host.kv_agent().size().await.unwrap(), 0);

    host.shutdown().await;
}

#[tokio::test]
async fn missing_file_waits_for_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let host = ServiceHost::start(config_in(dir.path())).await.unwrap();
    assert_eq!(host.kv_state(), ResourceState::Unconfigured);
    assert_eq!(host.supervisor().resource_names(), vec!["default", "echo"]);

    let echo = endpoint(host.supervisor().bus())
        .address(host.echo_address())
        .action("echo")
        .request(json!("hi"))
        .await
        .unwrap();
    assert_eq!(echo["payload"], json!("hi"));

    host.shutdown().await;
}

#[tokio::test]
async fn shutdown_undeploys_everything() {
    let dir = tempfile::tempdir().unwrap();
    write_kv(dir.path(), json!({"vendor": "memory"}));
    let host = ServiceHost::start(config_in(dir.path())).await.unwrap();
    let supervisor = host.supervisor().clone();
    assert_eq!(supervisor.ledger().len(), 2);

    host.shutdown().await;
    assert!(supervisor.is_stopped());
    assert!(supervisor.ledger().is_empty());
    assert_eq!(supervisor.state("default"), Some(ResourceState::Stopped));
    assert_eq!(supervisor.state("echo"), Some(ResourceState::Stopped));
}
