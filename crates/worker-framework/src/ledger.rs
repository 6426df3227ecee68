//! # Deployment Ledger
//!
//! Tracks every running worker instance under an opaque [`DeploymentId`]. The ledger owns
//! the gateway task of each deployment, so undeploying is: detach from the bus, signal the
//! gateway to stop, wait for it (which runs [`Worker::on_stop`](crate::Worker::on_stop)).
//!
//! Undeploying an id that is not (or no longer) tracked is a successful no-op, so callers
//! never have to coordinate with deployments the bus already removed.

use crate::bus::{Bus, ConsumerId};
use crate::dispatch::Gateway;
use crate::error::{BuildError, UndeployError};
use crate::worker::Worker;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeploymentId(String);

impl DeploymentId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeploymentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRecord {
    pub deployment_id: DeploymentId,
    pub worker_name: String,
    pub address: String,
}

struct Entry {
    record: DeploymentRecord,
    consumer_id: ConsumerId,
    stop: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

pub struct DeploymentLedger {
    bus: Bus,
    entries: Mutex<HashMap<DeploymentId, Entry>>,
}

impl DeploymentLedger {
    pub fn new(bus: Bus) -> Self {
        Self {
            bus,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<DeploymentId, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Starts `worker`, attaches it to `address` and records the deployment under `name`.
    pub async fn deploy<W: Worker>(
        &self,
        name: &str,
        address: &str,
        worker: Arc<W>,
    ) -> Result<DeploymentId, BuildError> {
        worker.on_start().await?;

        let deployment_id = DeploymentId::generate();
        let gateway = Gateway::new(worker, address);
        let consumer = self.bus.consumer(address);
        let consumer_id = consumer.id();
        let (stop, stop_rx) = oneshot::channel();
        let join = tokio::spawn(gateway.run(consumer, stop_rx));

        let record = DeploymentRecord {
            deployment_id: deployment_id.clone(),
            worker_name: name.to_string(),
            address: address.to_string(),
        };
        self.entries().insert(
            deployment_id.clone(),
            Entry {
                record,
                consumer_id,
                stop,
                join,
            },
        );

        info!(
            resource = %name,
            deployment_id = %deployment_id,
            address = %address,
            "deployed"
        );
        Ok(deployment_id)
    }

    /// Stops and forgets a deployment. Unknown ids succeed without effect.
    pub async fn undeploy(&self, deployment_id: &DeploymentId) -> Result<(), UndeployError> {
        let removed = self.entries().remove(deployment_id);
        let Some(entry) = removed else {
            debug!(deployment_id = %deployment_id, "undeploy of unknown deployment ignored");
            return Ok(());
        };

        self.bus.unregister(&entry.record.address, entry.consumer_id);
        // the gateway may already be gone if the bus dropped it
        let _ = entry.stop.send(());

        match entry.join.await {
            Ok(()) => {
                info!(
                    resource = %entry.record.worker_name,
                    deployment_id = %deployment_id,
                    "undeployed"
                );
                Ok(())
            }
            Err(e) if e.is_cancelled() => Err(UndeployError::Stopped(deployment_id.to_string())),
            Err(e) => Err(UndeployError::Join {
                deployment_id: deployment_id.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Undeploys every deployment recorded under `name`, logging and swallowing failures.
    pub async fn undeploy_named(&self, name: &str) -> usize {
        let ids = self.ids_for(name);
        let count = ids.len();
        for id in ids {
            if let Err(e) = self.undeploy(&id).await {
                warn!(resource = %name, deployment_id = %id, error = %e, "undeploy failed");
            }
        }
        count
    }

    /// Undeploys everything. Deployments added while this runs are left in place.
    pub async fn undeploy_all(&self) -> usize {
        let ids: Vec<DeploymentId> = self.entries().keys().cloned().collect();
        let count = ids.len();
        for id in ids {
            if let Err(e) = self.undeploy(&id).await {
                warn!(deployment_id = %id, error = %e, label = e.as_label(), "undeploy failed");
            }
        }
        info!(count, "all deployments undeployed");
        count
    }

    pub fn ids_for(&self, name: &str) -> Vec<DeploymentId> {
        self.entries()
            .values()
            .filter(|entry| entry.record.worker_name == name)
            .map(|entry| entry.record.deployment_id.clone())
            .collect()
    }

    pub fn count_for(&self, name: &str) -> usize {
        self.entries()
            .values()
            .filter(|entry| entry.record.worker_name == name)
            .count()
    }

    pub fn get(&self, deployment_id: &DeploymentId) -> Option<DeploymentRecord> {
        self.entries()
            .get(deployment_id)
            .map(|entry| entry.record.clone())
    }

    pub fn records(&self) -> Vec<DeploymentRecord> {
        let mut records: Vec<_> = self
            .entries()
            .values()
            .map(|entry| entry.record.clone())
            .collect();
        records.sort_by(|a, b| a.worker_name.cmp(&b.worker_name));
        records
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
