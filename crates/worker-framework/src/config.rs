//! # Configuration Snapshots and Watcher
//!
//! A [`ConfigSnapshot`] is an immutable JSON document. Snapshots are replaced wholesale on
//! every reload and compared by value, so an unchanged file never triggers a redeploy.
//!
//! [`ConfigWatcher`] loads a file once, publishes it on the location's change address
//! (see [`config_event_address`]) and then polls it every `scan_period`, publishing again
//! whenever the content differs from what was last published.

use crate::bus::Bus;
use crate::error::{BuildError, ConfigError};
use crate::message::{config_cache_key, config_event_address, Headers};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Decrypts credentials stored in configuration documents.
pub trait SecretDecoder: Send + Sync {
    fn decode(&self, encrypted: &str) -> Result<String, BuildError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSnapshot(Arc<Value>);

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Value> for ConfigSnapshot {
    fn from(value: Value) -> Self {
        Self(Arc::new(value))
    }
}

impl ConfigSnapshot {
    pub fn empty() -> Self {
        Self(Arc::new(Value::Object(Map::new())))
    }

    /// Parses a JSON document. Blank input yields an empty snapshot.
    pub fn parse(location: &str, text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::empty());
        }
        serde_json::from_str::<Value>(text)
            .map(Self::from)
            .map_err(|source| ConfigError::Parse {
                location: location.to_string(),
                source,
            })
    }

    pub fn is_empty(&self) -> bool {
        match self.0.as_ref() {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(Value::as_u64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, BuildError> {
        serde_json::from_value(self.0.as_ref().clone())
            .map_err(|e| BuildError::Invalid(e.to_string()))
    }

    /// Reads a credential, running it through `decoder` when the document sets
    /// `"encrypted": true`.
    pub fn secret(
        &self,
        key: &str,
        decoder: &dyn SecretDecoder,
    ) -> Result<Option<String>, BuildError> {
        let Some(raw) = self.get_str(key) else {
            return Ok(None);
        };
        if self.get_bool("encrypted").unwrap_or(false) {
            decoder.decode(raw).map(Some)
        } else {
            Ok(Some(raw.to_string()))
        }
    }
}

pub async fn load(path: &Path) -> Result<ConfigSnapshot, ConfigError> {
    let location = path.display().to_string();
    match tokio::fs::read_to_string(path).await {
        Ok(text) => ConfigSnapshot::parse(&location, &text),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(ConfigError::Missing { location }),
        Err(source) => Err(ConfigError::Io { location, source }),
    }
}

/// Like [`load`], but a missing file is an empty snapshot.
pub async fn load_optional(path: &Path) -> Result<ConfigSnapshot, ConfigError> {
    match load(path).await {
        Err(ConfigError::Missing { .. }) => Ok(ConfigSnapshot::empty()),
        other => other,
    }
}

/// Read-through cache of the last published snapshot per location.
#[derive(Clone, Default)]
pub struct ConfigCache {
    entries: Arc<RwLock<HashMap<String, ConfigSnapshot>>>,
}

impl ConfigCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<ConfigSnapshot> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    pub fn insert(&self, key: impl Into<String>, snapshot: ConfigSnapshot) {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.into(), snapshot);
    }

    pub fn remove(&self, key: &str) -> Option<ConfigSnapshot> {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key)
    }
}

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub namespace: String,
    pub optional: bool,
    pub scan_period: Duration,
    pub cached: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            namespace: "workers".to_string(),
            optional: false,
            scan_period: Duration::from_secs(5),
            cached: true,
        }
    }
}

pub struct ConfigWatcher {
    location: String,
    address: String,
    cache_key: String,
    cache: ConfigCache,
    options: WatchOptions,
    tx: Arc<watch::Sender<ConfigSnapshot>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl ConfigWatcher {
    /// Loads `path`, publishes the initial snapshot if it is not empty, and starts polling.
    ///
    /// Fails if the file is malformed, or missing while `options.optional` is false.
    pub async fn start(
        bus: Bus,
        cache: ConfigCache,
        path: impl Into<PathBuf>,
        options: WatchOptions,
    ) -> Result<Self, ConfigError> {
        let path = path.into();
        let location = path.display().to_string();
        let address = config_event_address(&options.namespace, &location);
        let cache_key = config_cache_key(&options.namespace, &location);

        let initial = if options.optional {
            load_optional(&path).await?
        } else {
            load(&path).await?
        };

        let (tx, _) = watch::channel(initial.clone());
        let tx = Arc::new(tx);
        if !initial.is_empty() {
            if options.cached {
                cache.insert(cache_key.clone(), initial.clone());
            }
            bus.publish(&address, Headers::new(), Some(initial.as_value().clone()))
                .await;
        }
        info!(location = %location, address = %address, "config watcher started");

        let poller = tokio::spawn(
            Poller {
                bus,
                path,
                address: address.clone(),
                tx: tx.clone(),
                cache: cache.clone(),
                cache_key: options.cached.then(|| cache_key.clone()),
                scan_period: options.scan_period,
                optional: options.optional,
            }
            .run(),
        );

        Ok(Self {
            location,
            address,
            cache_key,
            cache,
            options,
            tx,
            poller: Mutex::new(Some(poller)),
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Bus address the watcher publishes changes on.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Stream of snapshots; the receiver starts at the current one.
    pub fn subscribe(&self) -> watch::Receiver<ConfigSnapshot> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> ConfigSnapshot {
        self.tx.borrow().clone()
    }

    /// Last cached snapshot, empty when caching is off or nothing was loaded yet.
    pub fn get_cached(&self) -> ConfigSnapshot {
        if !self.options.cached {
            return ConfigSnapshot::empty();
        }
        self.cache.get(&self.cache_key).unwrap_or_default()
    }

    /// Stops polling and evicts the cached entry. Safe to call more than once.
    pub fn destroy(&self) {
        let poller = self
            .poller
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(poller) = poller {
            poller.abort();
            self.cache.remove(&self.cache_key);
            debug!(location = %self.location, "config watcher destroyed");
        }
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        let poller = self
            .poller
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(poller) = poller.take() {
            poller.abort();
        }
    }
}

struct Poller {
    bus: Bus,
    path: PathBuf,
    address: String,
    tx: Arc<watch::Sender<ConfigSnapshot>>,
    cache: ConfigCache,
    cache_key: Option<String>,
    scan_period: Duration,
    optional: bool,
}

impl Poller {
    async fn run(self) {
        let location = self.path.display().to_string();
        let mut ticker = tokio::time::interval(self.scan_period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let loaded = if self.optional {
                load_optional(&self.path).await
            } else {
                load(&self.path).await
            };
            let snapshot = match loaded {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(
                        location = %location,
                        error = %e,
                        label = e.as_label(),
                        "config reload failed"
                    );
                    continue;
                }
            };
            if snapshot.is_empty() {
                if !self.tx.borrow().is_empty() {
                    warn!(location = %location, "empty config ignored");
                }
                continue;
            }
            if *self.tx.borrow() == snapshot {
                continue;
            }

            self.tx.send_replace(snapshot.clone());
            if let Some(key) = &self.cache_key {
                self.cache.insert(key.clone(), snapshot.clone());
            }
            let reached = self
                .bus
                .publish(&self.address, Headers::new(), Some(snapshot.as_value().clone()))
                .await;
            info!(
                location = %location,
                address = %self.address,
                reached,
                "config change published"
            );
        }
    }
}
