use crate::clients::KeyValueAgent;
use crate::echo_worker::{self, EchoWorker};
use crate::kv_worker::{self, KeyValueBuilder, KeyValueWorker};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{info, instrument};
use worker_framework::{
    builder_fn, ConfigSnapshot, ConfigSource, Resource, ResourceState, RuntimeConfig,
    Subscription, Supervisor, SupervisorError, WorkerHandle,
};

pub const KV_RESOURCE: &str = "default";
pub const ECHO_RESOURCE: &str = "echo";

#[derive(Debug, Error)]
pub enum HostError {
    #[error("service host failed to start: {0}")]
    Startup(#[from] SupervisorError),
}

/// Composition root of the sample application.
///
/// Owns the [`Supervisor`], registers the key-value store (configured from
/// `<conf_dir>/kv_default.json`, optional) and the echo worker (no configuration), and
/// tracks the key-value worker currently deployed.
pub struct ServiceHost {
    supervisor: Arc<Supervisor>,
    kv: Arc<Resource<KeyValueWorker>>,
    echo: Arc<Resource<EchoWorker>>,
    kv_agent: KeyValueAgent,
    current_kv: Arc<RwLock<Option<WorkerHandle<KeyValueWorker>>>>,
    kv_subscription: Option<Subscription>,
}

impl ServiceHost {
    #[instrument(skip_all, fields(namespace = %config.namespace))]
    pub async fn start(config: RuntimeConfig) -> Result<Self, HostError> {
        let supervisor = Arc::new(Supervisor::new(config.clone()));

        let kv = supervisor.register(
            kv_worker::KIND,
            KV_RESOURCE,
            KeyValueBuilder,
            ConfigSource::conventional(&config, kv_worker::KIND, KV_RESOURCE, true),
        )?;
        let echo = supervisor.register(
            echo_worker::KIND,
            ECHO_RESOURCE,
            builder_fn(|_: &ConfigSnapshot| Ok(EchoWorker::new())),
            ConfigSource::None,
        )?;

        let current_kv: Arc<RwLock<Option<WorkerHandle<KeyValueWorker>>>> = Arc::default();
        let slot = current_kv.clone();
        let kv_subscription =
            supervisor.subscribe::<KeyValueWorker, _>(KV_RESOURCE, move |handle| {
                info!(deployment_id = %handle.deployment_id, "key-value store swapped");
                *slot.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
            })?;

        if let Err(e) = supervisor.start_all().await {
            supervisor.shutdown().await;
            return Err(e.into());
        }

        let kv_agent = KeyValueAgent::new(
            supervisor.bus(),
            kv.address(),
            supervisor.config().request_timeout,
        );
        info!(
            kv = %kv.state(),
            echo = %echo.state(),
            "service host started"
        );

        Ok(Self {
            supervisor,
            kv,
            echo,
            kv_agent,
            current_kv,
            kv_subscription: Some(kv_subscription),
        })
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    pub fn kv_agent(&self) -> &KeyValueAgent {
        &self.kv_agent
    }

    pub fn kv_state(&self) -> ResourceState {
        self.kv.state()
    }

    pub fn echo_address(&self) -> &str {
        self.echo.address()
    }

    /// The key-value worker most recently handed out by the supervisor.
    pub fn current_kv(&self) -> Option<WorkerHandle<KeyValueWorker>> {
        self.current_kv
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub async fn shutdown(mut self) {
        info!("service host shutting down");
        if let Some(subscription) = self.kv_subscription.take() {
            subscription.cancel();
        }
        self.supervisor.shutdown().await;
        self.current_kv
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }
}
