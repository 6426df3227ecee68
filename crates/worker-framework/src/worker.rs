//! # Workers and Builders
//!
//! A [`Worker`] is a long-lived, stateful unit wrapping one configured resource
//! (a connection pool, a cache client, a scheduler). Workers are shared behind an `Arc`
//! and handle many actions concurrently, so any mutable state needs its own
//! synchronisation.
//!
//! Workers are never constructed by the framework directly. A [`WorkerBuilder`] turns a
//! [`ConfigSnapshot`] into a worker; the supervisor runs it on Tokio's blocking pool, so it
//! may open sockets or read files synchronously.

use crate::actions::ActionTable;
use crate::config::ConfigSnapshot;
use crate::error::BuildError;
use crate::ledger::DeploymentId;
use async_trait::async_trait;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

#[async_trait]
pub trait Worker: Send + Sync + Sized + 'static {
    /// Fills the action table. Called once per deployment.
    fn actions(table: &mut ActionTable<Self>);

    /// Called before the worker is attached to the bus. An error aborts the deployment.
    async fn on_start(&self) -> Result<(), BuildError> {
        Ok(())
    }

    /// Called once the worker has been detached from the bus.
    /// Release pools, cancel timers.
    async fn on_stop(&self) {}
}

/// Constructs a worker from configuration. May block.
pub trait WorkerBuilder: Send + Sync + 'static {
    type Worker: Worker;

    fn build(&self, config: &ConfigSnapshot) -> Result<Self::Worker, BuildError>;
}

/// A [`WorkerBuilder`] backed by a closure. See [`builder_fn`].
pub struct FnBuilder<F, W> {
    build: F,
    _worker: PhantomData<fn() -> W>,
}

impl<F, W> WorkerBuilder for FnBuilder<F, W>
where
    F: Fn(&ConfigSnapshot) -> Result<W, BuildError> + Send + Sync + 'static,
    W: Worker,
{
    type Worker = W;

    fn build(&self, config: &ConfigSnapshot) -> Result<W, BuildError> {
        (self.build)(config)
    }
}

pub fn builder_fn<F, W>(build: F) -> FnBuilder<F, W>
where
    F: Fn(&ConfigSnapshot) -> Result<W, BuildError> + Send + Sync + 'static,
    W: Worker,
{
    FnBuilder {
        build,
        _worker: PhantomData,
    }
}

/// The currently deployed instance of a resource, as handed to subscribers.
///
/// Two handles are equal when they refer to the same deployment.
pub struct WorkerHandle<W> {
    pub resource: String,
    pub address: String,
    pub deployment_id: DeploymentId,
    pub worker: Arc<W>,
}

impl<W> WorkerHandle<W> {
    pub fn worker(&self) -> &Arc<W> {
        &self.worker
    }
}

impl<W> Clone for WorkerHandle<W> {
    fn clone(&self) -> Self {
        Self {
            resource: self.resource.clone(),
            address: self.address.clone(),
            deployment_id: self.deployment_id.clone(),
            worker: self.worker.clone(),
        }
    }
}

impl<W> PartialEq for WorkerHandle<W> {
    fn eq(&self, other: &Self) -> bool {
        self.deployment_id == other.deployment_id
    }
}

impl<W> Eq for WorkerHandle<W> {}

impl<W> fmt::Debug for WorkerHandle<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("resource", &self.resource)
            .field("address", &self.address)
            .field("deployment_id", &self.deployment_id)
            .finish_non_exhaustive()
    }
}
