//! # Resource Lifecycle Supervisor
//!
//! The [`Supervisor`] owns zero or one active worker per named resource and swaps it
//! whenever a new configuration arrives. It is constructed explicitly by the application
//! (see the sample's `ServiceHost`) and handed to whoever needs it; there is no global
//! instance.
//!
//! ## Reconfiguration
//!
//! [`Resource::configure`] runs as one serialized sequence per resource:
//!
//! 1. mark the resource `Draining` and undeploy every deployment recorded under its name
//! 2. run the [`WorkerBuilder`] on the blocking pool
//! 3. deploy the new worker at the resource's fixed address
//! 4. mark it `Active` and hand the new [`WorkerHandle`] to every subscriber
//!
//! Step 1 is unconditional. If the builder fails the resource is left `Unavailable`
//! until the next configuration arrives; the previous worker is not restored.
//!
//! Different resources reconfigure in parallel.
//!
//! ## State machine
//!
//! ```text
//! Unconfigured ──configure──► Active ◄──configure──┐
//!                               │                  │
//!                           build fails        Unavailable
//!                               └─────────────────►┘
//! any ──shutdown──► Stopped
//! ```

use crate::bus::Bus;
use crate::config::{ConfigCache, ConfigSnapshot, ConfigWatcher, WatchOptions};
use crate::error::{BuildError, SupervisorError, UndeployError};
use crate::ledger::{DeploymentId, DeploymentLedger};
use crate::message::{config_event_address, resource_address};
use crate::runtime::RuntimeConfig;
use crate::subscribers::{Subscribers, Subscription};
use crate::worker::{Worker, WorkerBuilder, WorkerHandle};
use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceState {
    Unconfigured,
    Draining,
    Active { deployment_id: DeploymentId },
    Unavailable { reason: String },
    Stopped,
}

impl ResourceState {
    pub fn is_active(&self) -> bool {
        matches!(self, ResourceState::Active { .. })
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceState::Unconfigured => f.write_str("unconfigured"),
            ResourceState::Draining => f.write_str("draining"),
            ResourceState::Active { deployment_id } => write!(f, "active({deployment_id})"),
            ResourceState::Unavailable { reason } => write!(f, "unavailable({reason})"),
            ResourceState::Stopped => f.write_str("stopped"),
        }
    }
}

/// Where a resource gets its configuration from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// A watched JSON file. A missing optional file leaves the resource unconfigured.
    File { path: PathBuf, optional: bool },
    /// Configure once with a fixed snapshot.
    Static(ConfigSnapshot),
    /// Configure once with an empty snapshot.
    None,
}

impl ConfigSource {
    /// `<conf_dir>/<kind>_<name>.json`.
    pub fn conventional(config: &RuntimeConfig, kind: &str, name: &str, optional: bool) -> Self {
        ConfigSource::File {
            path: config.resource_path(kind, name),
            optional,
        }
    }
}

struct Shared {
    config: RuntimeConfig,
    bus: Bus,
    ledger: Arc<DeploymentLedger>,
    cache: ConfigCache,
}

pub struct Resource<W: Worker> {
    name: String,
    kind: String,
    address: String,
    builder: Arc<dyn WorkerBuilder<Worker = W>>,
    source: ConfigSource,
    shared: Arc<Shared>,
    // last snapshot applied successfully; the lock serializes reconfiguration
    applied: tokio::sync::Mutex<Option<ConfigSnapshot>>,
    state: RwLock<ResourceState>,
    subscribers: Subscribers<WorkerHandle<W>>,
    watcher: Mutex<Option<ConfigWatcher>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl<W: Worker> Resource<W> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The bus address of the resource. It never changes across redeploys.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> ResourceState {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_state(&self, state: ResourceState) {
        *self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }

    /// The active worker, if any.
    pub fn current(&self) -> Option<WorkerHandle<W>> {
        self.subscribers.latest()
    }

    /// Calls `callback` with the active worker now (if any) and after every rebuild.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(WorkerHandle<W>) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(callback)
    }

    /// Replaces the active worker with one built from `snapshot`.
    pub async fn configure(
        &self,
        snapshot: ConfigSnapshot,
    ) -> Result<WorkerHandle<W>, SupervisorError> {
        let mut applied = self.applied.lock().await;
        self.reconfigure(&mut applied, snapshot).await
    }

    /// Like [`configure`](Self::configure), but skips empty snapshots and snapshots equal
    /// to the last one applied. Returns `None` when nothing was done.
    pub async fn configure_if_changed(
        &self,
        snapshot: ConfigSnapshot,
    ) -> Option<Result<WorkerHandle<W>, SupervisorError>> {
        let mut applied = self.applied.lock().await;
        if snapshot.is_empty() {
            warn!(resource = %self.name, "empty configuration ignored");
            return None;
        }
        if applied.as_ref() == Some(&snapshot) {
            debug!(resource = %self.name, "configuration unchanged");
            return None;
        }
        Some(self.reconfigure(&mut applied, snapshot).await)
    }

    async fn reconfigure(
        &self,
        applied: &mut Option<ConfigSnapshot>,
        snapshot: ConfigSnapshot,
    ) -> Result<WorkerHandle<W>, SupervisorError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(SupervisorError::Stopped);
        }

        self.set_state(ResourceState::Draining);
        self.subscribers.invalidate();
        *applied = None;
        let drained = self.shared.ledger.undeploy_named(&self.name).await;
        debug!(resource = %self.name, drained, "previous deployments drained");

        match self.build_and_deploy(&snapshot).await {
            Ok(handle) => {
                *applied = Some(snapshot);
                self.set_state(ResourceState::Active {
                    deployment_id: handle.deployment_id.clone(),
                });
                info!(
                    resource = %self.name,
                    deployment_id = %handle.deployment_id,
                    address = %self.address,
                    "resource active"
                );
                self.subscribers.publish(handle.clone());
                Ok(handle)
            }
            Err(e) => {
                error!(
                    resource = %self.name,
                    error = %e,
                    label = e.as_label(),
                    "resource build failed"
                );
                self.set_state(ResourceState::Unavailable {
                    reason: e.to_string(),
                });
                Err(SupervisorError::Build(e))
            }
        }
    }

    async fn build_and_deploy(
        &self,
        snapshot: &ConfigSnapshot,
    ) -> Result<WorkerHandle<W>, BuildError> {
        let builder = self.builder.clone();
        let config = snapshot.clone();
        let worker = tokio::task::spawn_blocking(move || builder.build(&config))
            .await
            .map_err(|_| BuildError::Panicked)??;

        let worker = Arc::new(worker);
        let deployment_id = self
            .shared
            .ledger
            .deploy(&self.name, &self.address, worker.clone())
            .await?;

        Ok(WorkerHandle {
            resource: self.name.clone(),
            address: self.address.clone(),
            deployment_id,
            worker,
        })
    }

    /// Performs the initial configuration from the resource's [`ConfigSource`].
    ///
    /// Configuration errors are returned. A failing builder only leaves the resource
    /// `Unavailable`, which is reported through the returned state.
    pub async fn start(self: &Arc<Self>) -> Result<ResourceState, SupervisorError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(SupervisorError::Stopped);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(self.state());
        }

        let outcome = match &self.source {
            ConfigSource::File { path, optional } => self.watch(path.clone(), *optional).await?,
            ConfigSource::Static(snapshot) => Some(self.configure(snapshot.clone()).await),
            ConfigSource::None => Some(self.configure(ConfigSnapshot::empty()).await),
        };

        match outcome {
            Some(Err(SupervisorError::Build(_))) | None | Some(Ok(_)) => Ok(self.state()),
            Some(Err(e)) => Err(e),
        }
    }

    async fn watch(
        self: &Arc<Self>,
        path: PathBuf,
        optional: bool,
    ) -> Result<Option<Result<WorkerHandle<W>, SupervisorError>>, SupervisorError> {
        let shared = &self.shared;
        let location = path.display().to_string();
        // registered before the poller exists, so no change can slip past the listener
        let mut consumer = shared
            .bus
            .consumer(config_event_address(&shared.config.namespace, &location));
        let options = WatchOptions {
            namespace: shared.config.namespace.clone(),
            optional,
            scan_period: shared.config.scan_period,
            cached: true,
        };
        let started = ConfigWatcher::start(
            shared.bus.clone(),
            shared.cache.clone(),
            path,
            options,
        )
        .await;
        let watcher = match started {
            Ok(watcher) => watcher,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                error!(
                    resource = %self.name,
                    location = %location,
                    error = %e,
                    "cannot load configuration"
                );
                return Err(e.into());
            }
        };
        let initial = watcher.current();

        let weak: Weak<Self> = Arc::downgrade(self);
        let mut last_seen = initial.clone();
        let listener = tokio::spawn(async move {
            while let Some(message) = consumer.recv().await {
                let Some(resource) = weak.upgrade() else {
                    break;
                };
                let Some(body) = message.body else {
                    continue;
                };
                // the initial snapshot is applied by `start` itself
                let snapshot = ConfigSnapshot::from(body);
                if snapshot == last_seen {
                    continue;
                }
                last_seen = snapshot.clone();

                info!(resource = %resource.name, "configuration change received");
                match resource.configure_if_changed(snapshot).await {
                    Some(Err(SupervisorError::Stopped)) => {
                        debug!(resource = %resource.name, "listener stopped");
                        break;
                    }
                    // build failures are logged by `reconfigure`
                    Some(Err(_)) | Some(Ok(_)) | None => {}
                }
            }
        });

        *self
            .watcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(watcher);
        *self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(listener);

        if initial.is_empty() {
            info!(resource = %self.name, location = %location, "no configuration yet");
            return Ok(None);
        }
        Ok(self.configure_if_changed(initial).await)
    }

    /// Stops watching, undeploys the worker and drops every subscriber.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(listener) = listener {
            listener.abort();
        }
        let watcher = self
            .watcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(watcher) = watcher {
            watcher.destroy();
        }

        // wait for an in-flight reconfiguration to finish
        let mut applied = self.applied.lock().await;
        *applied = None;
        self.shared.ledger.undeploy_named(&self.name).await;
        self.subscribers.clear();
        self.set_state(ResourceState::Stopped);
        info!(resource = %self.name, "resource stopped");
    }
}

/// Type-erased view of a [`Resource`], used by the supervisor's registry.
#[async_trait]
pub trait ManagedResource: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> &str;
    fn address(&self) -> &str;
    fn state(&self) -> ResourceState;
    async fn start_managed(self: Arc<Self>) -> Result<ResourceState, SupervisorError>;
    async fn stop_managed(&self);
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

#[async_trait]
impl<W: Worker> ManagedResource for Resource<W> {
    fn name(&self) -> &str {
        Resource::name(self)
    }

    fn kind(&self) -> &str {
        Resource::kind(self)
    }

    fn address(&self) -> &str {
        Resource::address(self)
    }

    fn state(&self) -> ResourceState {
        Resource::state(self)
    }

    async fn start_managed(self: Arc<Self>) -> Result<ResourceState, SupervisorError> {
        self.start().await
    }

    async fn stop_managed(&self) {
        self.stop().await
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

pub struct Supervisor {
    shared: Arc<Shared>,
    resources: RwLock<HashMap<String, Arc<dyn ManagedResource>>>,
    // one lock per directly deployed name
    direct: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    stopped: AtomicBool,
}

impl Supervisor {
    pub fn new(config: RuntimeConfig) -> Self {
        let bus = Bus::with_capacity(config.mailbox_capacity);
        Self::with_bus(config, bus)
    }

    /// Builds a supervisor on an existing bus.
    pub fn with_bus(config: RuntimeConfig, bus: Bus) -> Self {
        let ledger = Arc::new(DeploymentLedger::new(bus.clone()));
        Self {
            shared: Arc::new(Shared {
                config,
                bus,
                ledger,
                cache: ConfigCache::new(),
            }),
            resources: RwLock::new(HashMap::new()),
            direct: Mutex::new(HashMap::new()),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn bus(&self) -> &Bus {
        &self.shared.bus
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    pub fn ledger(&self) -> &Arc<DeploymentLedger> {
        &self.shared.ledger
    }

    pub fn cache(&self) -> &ConfigCache {
        &self.shared.cache
    }

    fn ensure_running(&self) -> Result<(), SupervisorError> {
        if self.stopped.load(Ordering::SeqCst) {
            Err(SupervisorError::Stopped)
        } else {
            Ok(())
        }
    }

    /// Registers a resource. It stays `Unconfigured` until [`Resource::start`] or
    /// [`Supervisor::start_all`] runs.
    pub fn register<B>(
        &self,
        kind: &str,
        name: &str,
        builder: B,
        source: ConfigSource,
    ) -> Result<Arc<Resource<B::Worker>>, SupervisorError>
    where
        B: WorkerBuilder,
    {
        self.ensure_running()?;
        let mut resources = self
            .resources
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if resources.contains_key(name) || self.shared.ledger.count_for(name) > 0 {
            return Err(SupervisorError::AlreadyRegistered(name.to_string()));
        }

        let resource = Arc::new(Resource {
            name: name.to_string(),
            kind: kind.to_string(),
            address: resource_address(&self.shared.config.namespace, kind, name),
            builder: Arc::new(builder),
            source,
            shared: self.shared.clone(),
            applied: tokio::sync::Mutex::new(None),
            state: RwLock::new(ResourceState::Unconfigured),
            subscribers: Subscribers::new(),
            watcher: Mutex::new(None),
            listener: Mutex::new(None),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        });
        resources.insert(name.to_string(), resource.clone());
        info!(
            resource = %name,
            kind = %kind,
            address = %resource.address,
            "resource registered"
        );
        Ok(resource)
    }

    fn managed(&self, name: &str) -> Result<Arc<dyn ManagedResource>, SupervisorError> {
        self.resources
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| SupervisorError::UnknownResource(name.to_string()))
    }

    fn all(&self) -> Vec<Arc<dyn ManagedResource>> {
        let mut all: Vec<_> = self
            .resources
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    /// Looks up a resource by name, checking that it hosts `W` workers.
    pub fn resource<W: Worker>(&self, name: &str) -> Result<Arc<Resource<W>>, SupervisorError> {
        self.managed(name)?
            .as_any()
            .downcast::<Resource<W>>()
            .map_err(|_| SupervisorError::TypeMismatch {
                name: name.to_string(),
                expected: std::any::type_name::<W>(),
            })
    }

    pub fn subscribe<W, F>(&self, name: &str, callback: F) -> Result<Subscription, SupervisorError>
    where
        W: Worker,
        F: Fn(WorkerHandle<W>) + Send + Sync + 'static,
    {
        Ok(self.resource::<W>(name)?.subscribe(callback))
    }

    pub fn state(&self, name: &str) -> Option<ResourceState> {
        self.managed(name).ok().map(|resource| resource.state())
    }

    pub fn resource_names(&self) -> Vec<String> {
        self.all()
            .iter()
            .map(|resource| resource.name().to_string())
            .collect()
    }

    pub async fn start(&self, name: &str) -> Result<ResourceState, SupervisorError> {
        self.ensure_running()?;
        self.managed(name)?.start_managed().await
    }

    /// Starts every registered resource, stopping at the first configuration error.
    pub async fn start_all(&self) -> Result<(), SupervisorError> {
        self.ensure_running()?;
        for resource in self.all() {
            let name = resource.name().to_string();
            let state = resource.start_managed().await?;
            debug!(resource = %name, state = %state, "resource started");
        }
        Ok(())
    }

    /// Deploys a worker that is not driven by configuration, tracked in the same ledger.
    ///
    /// An earlier deployment under `name` is undeployed first, so each name has at most
    /// one live deployment. Names of registered resources are rejected.
    pub async fn deploy<W: Worker>(
        &self,
        name: &str,
        worker: W,
    ) -> Result<WorkerHandle<W>, SupervisorError> {
        self.ensure_running()?;
        if self.managed(name).is_ok() {
            return Err(SupervisorError::AlreadyRegistered(name.to_string()));
        }
        let lock = self
            .direct
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(name.to_string())
            .or_default()
            .clone();
        let _guard = lock.lock().await;
        self.ensure_running()?;

        let replaced = self.shared.ledger.undeploy_named(name).await;
        if replaced > 0 {
            debug!(worker = %name, replaced, "previous direct deployment replaced");
        }
        let address = resource_address(&self.shared.config.namespace, "worker", name);
        let worker = Arc::new(worker);
        let deployment_id = self
            .shared
            .ledger
            .deploy(name, &address, worker.clone())
            .await?;
        Ok(WorkerHandle {
            resource: name.to_string(),
            address,
            deployment_id,
            worker,
        })
    }

    pub async fn undeploy(&self, deployment_id: &DeploymentId) -> Result<(), UndeployError> {
        self.shared.ledger.undeploy(deployment_id).await
    }

    /// Stops every resource and undeploys everything left in the ledger.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("supervisor shutting down");
        for resource in self.all() {
            resource.stop_managed().await;
        }
        let remaining = self.shared.ledger.undeploy_all().await;
        info!(remaining, "supervisor stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}
