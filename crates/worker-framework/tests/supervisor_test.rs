use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use worker_framework::mock::MockBuilder;
use worker_framework::{
    endpoint, ActionTable, BuildError, ConfigError, ConfigSnapshot, ConfigSource, DeploymentId,
    ResourceState, RuntimeConfig, Supervisor, SupervisorError, Worker, WorkerHandle,
};

struct Tagged {
    tag: u64,
}

impl Worker for Tagged {
    fn actions(table: &mut ActionTable<Self>) {
        table.nullary("tag", |worker: Arc<Tagged>| async move {
            Ok::<_, String>(worker.tag)
        });
    }
}

struct Other;

impl Worker for Other {
    fn actions(_table: &mut ActionTable<Self>) {}
}

fn tagged_builder() -> MockBuilder<Tagged> {
    MockBuilder::new(|config: &ConfigSnapshot| {
        Ok(Tagged {
            tag: config.get_u64("tag").unwrap_or(0),
        })
    })
}

fn snapshot(tag: u64) -> ConfigSnapshot {
    ConfigSnapshot::from(json!({ "tag": tag }))
}

fn test_config() -> RuntimeConfig {
    RuntimeConfig {
        namespace: "test".into(),
        scan_period: Duration::from_millis(20),
        request_timeout: Duration::from_secs(2),
        ..RuntimeConfig::default()
    }
}

#[tokio::test]
async fn concurrent_reconfigurations_leave_one_deployment() {
    let supervisor = Arc::new(Supervisor::new(test_config()));
    let builder = tagged_builder().with_delay(Duration::from_millis(20));
    let resource = supervisor
        .register("tagged", "main", builder.clone(), ConfigSource::None)
        .unwrap();
    resource.start().await.unwrap();

    let mut tasks = Vec::new();
    for tag in 1..=6 {
        let resource = resource.clone();
        tasks.push(tokio::spawn(async move {
            resource.configure(snapshot(tag)).await.map(|h| h.deployment_id)
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(builder.max_concurrent(), 1);
    assert_eq!(builder.call_count(), 7);
    assert_eq!(supervisor.ledger().count_for("main"), 1);
    assert!(resource.state().is_active());
    assert_eq!(supervisor.bus().consumer_count(resource.address()), 1);
}

#[tokio::test]
async fn address_is_stable_across_redeploys() {
    let supervisor = Supervisor::new(test_config());
    let resource = supervisor
        .register("tagged", "main", tagged_builder(), ConfigSource::Static(snapshot(1)))
        .unwrap();
    resource.start().await.unwrap();
    assert_eq!(resource.address(), "test.resource.tagged::main");

    let ep = endpoint(supervisor.bus())
        .address(resource.address())
        .action("tag");
    let mut ids: Vec<DeploymentId> = Vec::new();
    for tag in 2..=4 {
        let handle = resource.configure(snapshot(tag)).await.unwrap();
        assert_eq!(handle.address, "test.resource.tagged::main");
        ids.push(handle.deployment_id);
        assert_eq!(ep.request_empty().await, Ok(json!(tag)));
    }
    ids.dedup();
    assert_eq!(ids.len(), 3);
}

#[tokio::test]
async fn builder_failure_is_isolated() {
    let supervisor = Supervisor::new(test_config());
    let a_builder = tagged_builder();
    let a = supervisor
        .register("tagged", "a", a_builder.clone(), ConfigSource::Static(snapshot(1)))
        .unwrap();
    let b = supervisor
        .register("tagged", "b", tagged_builder(), ConfigSource::Static(snapshot(2)))
        .unwrap();
    supervisor.start_all().await.unwrap();
    let b_before = b.state();

    a_builder.fail_next(BuildError::Failed("connection refused".into()));
    let err = a.configure(snapshot(3)).await;
    assert!(matches!(err, Err(SupervisorError::Build(BuildError::Failed(_)))));

    assert!(matches!(a.state(), ResourceState::Unavailable { .. }));
    assert!(a.current().is_none());
    assert_eq!(supervisor.ledger().count_for("a"), 0);
    assert!(!supervisor.bus().has_consumers(a.address()));
    assert_eq!(b.state(), b_before);
    assert_eq!(supervisor.ledger().count_for("b"), 1);

    let handle = a.configure(snapshot(4)).await.unwrap();
    assert_eq!(handle.worker.tag, 4);
    assert!(a.state().is_active());
}

#[tokio::test]
async fn failing_initial_build_does_not_fail_start() {
    let supervisor = Supervisor::new(test_config());
    let builder = tagged_builder();
    builder.fail_next(BuildError::Invalid("missing host".into()));
    let resource = supervisor
        .register("tagged", "main", builder, ConfigSource::Static(snapshot(1)))
        .unwrap();

    let state = resource.start().await.unwrap();
    assert_eq!(
        state,
        ResourceState::Unavailable {
            reason: "invalid configuration: missing host".into()
        }
    );
}

#[tokio::test]
async fn subscribers_follow_rebuilds() {
    let supervisor = Supervisor::new(test_config());
    let resource = supervisor
        .register("tagged", "main", tagged_builder(), ConfigSource::Static(snapshot(1)))
        .unwrap();

    let seen: Arc<Mutex<Vec<(&'static str, u64)>>> = Arc::default();
    let early = seen.clone();
    let _early = supervisor
        .subscribe::<Tagged, _>("main", move |h: WorkerHandle<Tagged>| {
            early.lock().unwrap().push(("early", h.worker.tag))
        })
        .unwrap();

    resource.start().await.unwrap();
    let late = seen.clone();
    let _late = resource.subscribe(move |h| late.lock().unwrap().push(("late", h.worker.tag)));

    resource.configure(snapshot(2)).await.unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        vec![("early", 1), ("late", 1), ("early", 2), ("late", 2)]
    );
}

#[tokio::test]
async fn file_changes_trigger_reconfiguration() {
    let dir = tempfile::tempdir().unwrap();
    let config = RuntimeConfig {
        conf_dir: dir.path().to_path_buf(),
        ..test_config()
    };
    let path = config.resource_path("tagged", "main");
    std::fs::write(&path, r#"{"tag": 1}"#).unwrap();

    let supervisor = Supervisor::new(config.clone());
    let builder = tagged_builder();
    let source = ConfigSource::conventional(&config, "tagged", "main", false);
    let resource = supervisor
        .register("tagged", "main", builder.clone(), source)
        .unwrap();
    assert!(resource.start().await.unwrap().is_active());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = resource.subscribe(move |h| {
        let _ = tx.send(h.worker.tag);
    });
    assert_eq!(rx.recv().await, Some(1));

    std::fs::write(&path, r#"{"tag": 2}"#).unwrap();
    let rebuilt = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
    assert_eq!(rebuilt.unwrap(), Some(2));

    // identical content never triggers another build
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(builder.call_count(), 2);
    assert_eq!(supervisor.ledger().count_for("main"), 1);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn missing_configuration_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = RuntimeConfig {
        conf_dir: dir.path().to_path_buf(),
        ..test_config()
    };
    let supervisor = Supervisor::new(config.clone());

    let required = supervisor
        .register(
            "tagged",
            "required",
            tagged_builder(),
            ConfigSource::conventional(&config, "tagged", "required", false),
        )
        .unwrap();
    let err = required.start().await;
    assert!(matches!(err, Err(SupervisorError::Config(ConfigError::Missing { .. }))));

    let optional = supervisor
        .register(
            "tagged",
            "optional",
            tagged_builder(),
            ConfigSource::conventional(&config, "tagged", "optional", true),
        )
        .unwrap();
    assert_eq!(optional.start().await.unwrap(), ResourceState::Unconfigured);
}

#[tokio::test]
async fn registry_lookups() {
    let supervisor = Supervisor::new(test_config());
    supervisor
        .register("tagged", "main", tagged_builder(), ConfigSource::None)
        .unwrap();

    let duplicate = supervisor.register("tagged", "main", tagged_builder(), ConfigSource::None);
    assert!(matches!(duplicate, Err(SupervisorError::AlreadyRegistered(_))));
    assert!(matches!(
        supervisor.resource::<Other>("main"),
        Err(SupervisorError::TypeMismatch { .. })
    ));
    assert!(matches!(
        supervisor.resource::<Tagged>("nope"),
        Err(SupervisorError::UnknownResource(_))
    ));
    assert_eq!(supervisor.state("main"), Some(ResourceState::Unconfigured));
    assert_eq!(supervisor.resource_names(), vec!["main"]);
}

#[tokio::test]
async fn direct_deployments_share_the_ledger() {
    let supervisor = Supervisor::new(test_config());
    let handle = supervisor.deploy("ticker", Tagged { tag: 9 }).await.unwrap();
    assert_eq!(supervisor.ledger().count_for("ticker"), 1);

    let reply = endpoint(supervisor.bus())
        .address(&handle.address)
        .action("tag")
        .request_empty()
        .await;
    assert_eq!(reply, Ok(json!(9)));

    supervisor.undeploy(&handle.deployment_id).await.unwrap();
    supervisor.undeploy(&handle.deployment_id).await.unwrap();
    assert!(supervisor.ledger().is_empty());
}

#[tokio::test]
async fn direct_redeploy_replaces_the_previous_instance() {
    let supervisor = Supervisor::new(test_config());
    let first = supervisor.deploy("ticker", Tagged { tag: 1 }).await.unwrap();
    let second = supervisor.deploy("ticker", Tagged { tag: 2 }).await.unwrap();

    assert_ne!(first.deployment_id, second.deployment_id);
    assert_eq!(first.address, second.address);
    assert_eq!(supervisor.ledger().count_for("ticker"), 1);
    assert_eq!(supervisor.bus().consumer_count(&second.address), 1);
    assert!(supervisor.ledger().get(&first.deployment_id).is_none());

    let ep = endpoint(supervisor.bus()).address(&second.address).action("tag");
    for _ in 0..4 {
        assert_eq!(ep.request_empty().await, Ok(json!(2)));
    }
}

#[tokio::test]
async fn direct_deploy_and_resources_do_not_share_names() {
    let supervisor = Supervisor::new(test_config());
    supervisor
        .register("tagged", "main", tagged_builder(), ConfigSource::Static(snapshot(1)))
        .unwrap();
    assert!(matches!(
        supervisor.deploy("main", Tagged { tag: 2 }).await,
        Err(SupervisorError::AlreadyRegistered(_))
    ));

    supervisor.deploy("ticker", Tagged { tag: 3 }).await.unwrap();
    let clash = supervisor.register("tagged", "ticker", tagged_builder(), ConfigSource::None);
    assert!(matches!(clash, Err(SupervisorError::AlreadyRegistered(_))));
}

#[tokio::test]
async fn subscriber_may_read_current_during_rebuild() {
    let supervisor = Supervisor::new(test_config());
    let resource = supervisor
        .register("tagged", "main", tagged_builder(), ConfigSource::Static(snapshot(1)))
        .unwrap();

    let seen: Arc<Mutex<Vec<Option<u64>>>> = Arc::default();
    let (weak, sink) = (Arc::downgrade(&resource), seen.clone());
    let _sub = resource.subscribe(move |_| {
        let current = weak.upgrade().and_then(|r| r.current());
        sink.lock().unwrap().push(current.map(|h| h.worker.tag));
    });

    let started = tokio::time::timeout(Duration::from_secs(2), resource.start()).await;
    assert!(started.unwrap().unwrap().is_active());
    let reconfigured =
        tokio::time::timeout(Duration::from_secs(2), resource.configure(snapshot(2))).await;
    assert_eq!(reconfigured.unwrap().unwrap().worker.tag, 2);

    assert_eq!(*seen.lock().unwrap(), vec![Some(1), Some(2)]);
    tokio::time::timeout(Duration::from_secs(2), supervisor.shutdown())
        .await
        .unwrap();
}

#[tokio::test]
async fn change_right_after_start_is_not_lost() {
    let dir = tempfile::tempdir().unwrap();
    let config = RuntimeConfig {
        conf_dir: dir.path().to_path_buf(),
        scan_period: Duration::from_millis(1),
        ..test_config()
    };
    let path = config.resource_path("tagged", "main");
    std::fs::write(&path, r#"{"tag": 1}"#).unwrap();

    let supervisor = Supervisor::new(config.clone());
    let builder = tagged_builder();
    let resource = supervisor
        .register(
            "tagged",
            "main",
            builder.clone(),
            ConfigSource::conventional(&config, "tagged", "main", false),
        )
        .unwrap();
    resource.start().await.unwrap();
    std::fs::write(&path, r#"{"tag": 2}"#).unwrap();

    tokio::time::timeout(Duration::from_secs(2), async {
        while resource.current().map(|h| h.worker.tag) != Some(2) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    // the initial publish is not applied a second time
    assert_eq!(builder.call_count(), 2);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn shutdown_stops_everything() {
    let supervisor = Supervisor::new(test_config());
    let resource = supervisor
        .register("tagged", "main", tagged_builder(), ConfigSource::Static(snapshot(1)))
        .unwrap();
    resource.start().await.unwrap();
    supervisor.deploy("ticker", Tagged { tag: 0 }).await.unwrap();
    assert_eq!(supervisor.ledger().len(), 2);

    supervisor.shutdown().await;
    supervisor.shutdown().await;

    assert!(supervisor.ledger().is_empty());
    assert_eq!(resource.state(), ResourceState::Stopped);
    assert!(!supervisor.bus().has_consumers(resource.address()));
    assert!(matches!(
        resource.configure(snapshot(2)).await,
        Err(SupervisorError::Stopped)
    ));
    assert!(matches!(
        supervisor.deploy("late", Other).await,
        Err(SupervisorError::Stopped)
    ));
}
