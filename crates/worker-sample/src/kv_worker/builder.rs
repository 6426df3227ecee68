use super::worker::KeyValueWorker;
use serde::Deserialize;
use tracing::info;
use worker_framework::{BuildError, ConfigSnapshot, WorkerBuilder};

pub const DEFAULT_CAPACITY: usize = 10_000;

/// Shape of `kv_<name>.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct KvConfig {
    pub vendor: String,
    #[serde(default)]
    pub capacity: Option<usize>,
    #[serde(default)]
    pub namespace: String,
}

/// Builds a [`KeyValueWorker`] from `{"vendor": "memory", "capacity": n, "namespace": p}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyValueBuilder;

impl WorkerBuilder for KeyValueBuilder {
    type Worker = KeyValueWorker;

    fn build(&self, config: &ConfigSnapshot) -> Result<KeyValueWorker, BuildError> {
        let config: KvConfig = config.deserialize()?;
        if !config.vendor.eq_ignore_ascii_case("memory") {
            return Err(BuildError::Unsupported(config.vendor));
        }
        let capacity = config.capacity.unwrap_or(DEFAULT_CAPACITY);
        if capacity == 0 {
            return Err(BuildError::Invalid("capacity must be positive".into()));
        }

        info!(namespace = %config.namespace, capacity, "building key-value store");
        Ok(KeyValueWorker::new(config.namespace, capacity))
    }
}
