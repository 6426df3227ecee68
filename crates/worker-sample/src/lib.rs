//! # Worker Sample App Library
//!
//! Concrete workers built on `worker-framework`, exposed as a library for integration
//! testing.
//!
//! - **[kv_worker]**: an in-memory key-value store, rebuilt whenever its configuration file changes.
//! - **[echo_worker]**: a configuration-free worker showing an explicit action binding.
//! - **[clients]**: typed agents that hide the action protocol.
//! - **[lifecycle]**: the [`ServiceHost`](lifecycle::ServiceHost) composition root.

pub mod clients;
pub mod echo_worker;
pub mod kv_worker;
pub mod lifecycle;
