//! Runtime tunables shared by the supervisor, its resources and the bus.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const ENV_NAMESPACE: &str = "WORKERS_NAMESPACE";
pub const ENV_CONF_DIR: &str = "WORKERS_CONF_DIR";
pub const ENV_SCAN_PERIOD_MS: &str = "WORKERS_SCAN_PERIOD_MS";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "WORKERS_REQUEST_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Prefix of every resource and config-event address.
    pub namespace: String,
    /// Directory holding `<kind>_<name>.json` resource documents.
    pub conf_dir: PathBuf,
    pub scan_period: Duration,
    pub request_timeout: Duration,
    pub mailbox_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            namespace: "workers".to_string(),
            conf_dir: PathBuf::from("conf"),
            scan_period: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            mailbox_capacity: 64,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `WORKERS_*` environment variables.
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(namespace) = lookup(ENV_NAMESPACE).filter(|v| !v.trim().is_empty()) {
            config.namespace = namespace.trim().to_string();
        }
        if let Some(dir) = lookup(ENV_CONF_DIR).filter(|v| !v.trim().is_empty()) {
            config.conf_dir = PathBuf::from(dir);
        }
        if let Some(ms) = millis(&lookup, ENV_SCAN_PERIOD_MS) {
            config.scan_period = ms;
        }
        if let Some(ms) = millis(&lookup, ENV_REQUEST_TIMEOUT_MS) {
            config.request_timeout = ms;
        }
        config
    }

    /// Conventional document path for a resource: `<conf_dir>/<kind>_<name>.json`.
    pub fn resource_path(&self, kind: &str, name: &str) -> PathBuf {
        resource_path(&self.conf_dir, kind, name)
    }
}

pub fn resource_path(conf_dir: &Path, kind: &str, name: &str) -> PathBuf {
    conf_dir.join(format!("{kind}_{name}.json"))
}

fn millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Some(Duration::from_millis(ms)),
        _ => {
            warn!(key, value = %raw, "ignoring invalid duration");
            None
        }
    }
}
