//! # Worker Framework
//!
//! This crate provides a small runtime for long-lived, configuration-driven services built
//! out of independently deployable **workers** (a connection pool, a cache client, a
//! scheduled job). It covers two coupled problems:
//!
//! 1. **Lifecycle supervision** - workers are built from configuration, hot-swapped when
//!    that configuration changes, and torn down cleanly.
//! 2. **Action dispatch** - callers reach a worker through a stable bus address and a
//!    named action, without holding a reference to the worker itself.
//!
//! ## Architecture Overview
//!
//! ```text
//! ConfigWatcher ──publish──► Resource listener ──configure──► WorkerBuilder (blocking pool)
//!                                                                   │
//!            Subscribers ◄── WorkerHandle ◄── DeploymentLedger ◄────┘
//!                                                   │
//! ActionEndpoint ──request/send/publish──► Bus ──► Gateway ──► ActionTable ──► Worker
//! ```
//!
//! - [`Bus`] - in-process, address-based message bus (point-to-point, broadcast, request/reply).
//! - [`Worker`] / [`ActionTable`] - your business logic and the typed table of its actions.
//! - [`Gateway`] - attached to one bus address; turns envelopes into handler calls and
//!   handler results into replies or log records.
//! - [`DeploymentLedger`] - every running worker instance under a generated id.
//! - [`Supervisor`] / [`Resource`] - at most one active worker per named resource.
//! - [`ConfigWatcher`] - loads and polls configuration documents.
//! - [`Subscribers`] - hands the current worker to consumers, now and after every rebuild.
//!
//! ## Quick Start
//!
//! ```rust
//! use serde_json::{json, Value};
//! use std::sync::Arc;
//! use worker_framework::{
//!     builder_fn, endpoint, ActionTable, ConfigSource, RuntimeConfig, Supervisor, Worker,
//! };
//!
//! struct Echo;
//!
//! impl Worker for Echo {
//!     fn actions(table: &mut ActionTable<Self>) {
//!         table.unary("echo", |_worker: Arc<Echo>, payload: Value| async move {
//!             Ok::<_, String>(payload)
//!         });
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let supervisor = Supervisor::new(RuntimeConfig::default());
//!     let echo = supervisor
//!         .register("echo", "main", builder_fn(|_| Ok(Echo)), ConfigSource::None)
//!         .unwrap();
//!     echo.start().await.unwrap();
//!
//!     let reply = endpoint(supervisor.bus())
//!         .address(echo.address())
//!         .action("echo")
//!         .request(json!({"x": 1}))
//!         .await
//!         .unwrap();
//!     assert_eq!(reply, json!({"x": 1}));
//!
//!     supervisor.shutdown().await;
//! }
//! ```
//!
//! ## Delivery styles
//!
//! | Style | Reply on success | On failure |
//! |-------|------------------|------------|
//! | `request` | the handler's value | `{code, message}` failure reply |
//! | `send` | none | logged |
//! | `publish` | none (every consumer runs it) | logged |
//!
//! Failure codes are deterministic: unknown action `404`, undecodable payload `400`,
//! failing or panicking handler `500`.
//!
//! ## Concurrency Model
//!
//! - Reconfiguration is serialized per resource and runs in parallel across resources.
//! - Builders run on Tokio's blocking pool and never stall the bus.
//! - Every inbound message is dispatched in its own task; a panicking handler fails only
//!   its own envelope.
//!
//! ## Testing
//!
//! The [`mock`] module provides a scripted [`mock::MockBuilder`] for supervisor tests.

pub mod actions;
pub mod bus;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod message;
pub mod mock;
pub mod runtime;
pub mod subscribers;
pub mod supervisor;
pub mod telemetry;
pub mod worker;

// Re-export core types for convenience
pub use actions::{ActionTable, HandlerFault};
pub use bus::{Bus, Consumer, ConsumerId, Message, Replier};
pub use client::{endpoint, ActionEndpoint};
pub use config::{ConfigCache, ConfigSnapshot, ConfigWatcher, SecretDecoder, WatchOptions};
pub use dispatch::Gateway;
pub use error::{ActionError, BuildError, BusError, ConfigError, SupervisorError, UndeployError};
pub use ledger::{DeploymentId, DeploymentLedger, DeploymentRecord};
pub use message::{
    config_event_address, resource_address, ActionEnvelope, Headers, RequestStyle,
};
pub use runtime::RuntimeConfig;
pub use subscribers::{Subscribers, Subscription};
pub use supervisor::{ConfigSource, ManagedResource, Resource, ResourceState, Supervisor};
pub use telemetry::setup_tracing;
pub use worker::{builder_fn, FnBuilder, Worker, WorkerBuilder, WorkerHandle};
