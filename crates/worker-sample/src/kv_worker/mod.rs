//! # Key-Value Worker
//!
//! An in-memory key-value store deployed as a configured resource. It stands in for a
//! cache client: the supervisor builds it from `conf/kv_<name>.json` and rebuilds it
//! whenever that file changes.
//!
//! ## Structure
//!
//! - [`worker`] - [`Worker`](worker_framework::Worker) implementation for [`KeyValueWorker`]
//! - [`builder`] - [`KeyValueBuilder`], turning a configuration snapshot into a worker
//! - [`error`] - [`KvError`] returned by failing actions
//!
//! ## Actions
//!
//! | Action | Payload | Reply |
//! |--------|---------|-------|
//! | `get` | `{key}` | string or null |
//! | `set` | `{key, value}` | null |
//! | `del` | `{keys: [..]}` | number of removed keys |
//! | `incr` | `{key, by?}` | new value |
//! | `hset` | `{key, field, value}` | `true` if the field is new |
//! | `hget` | `{key, field}` | string or null |
//! | `hkeys` | `{key}` | field names |
//! | `hmset` | `{key, fields: {..}}` | null |
//! | `hmget` | `{key, fields: [..]}` | values, null where missing |
//! | `flush` | none | number of dropped keys |
//! | `size` | none | number of keys |
//!
//! ## Configuration
//!
//! ```json
//! { "vendor": "memory", "capacity": 10000, "namespace": "app" }
//! ```
//!
//! Any other vendor is rejected with [`BuildError::Unsupported`](worker_framework::BuildError).

pub mod builder;
pub mod error;
pub mod worker;

pub use builder::{KeyValueBuilder, KvConfig, DEFAULT_CAPACITY};
pub use error::KvError;
pub use worker::*;

pub const KIND: &str = "kv";
