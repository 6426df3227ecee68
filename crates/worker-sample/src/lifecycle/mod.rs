//! # Service Lifecycle
//!
//! Wiring of the sample application. Workers themselves know nothing about each other
//! or about where their configuration comes from; this module is where they meet the
//! [`Supervisor`](worker_framework::Supervisor).
//!
//! ## The ServiceHost Pattern
//!
//! [`ServiceHost`] is the composition root. It is created once in `main` (or once per
//! test) and passed around by reference, so nothing in the application reaches for a
//! global:
//!
//! ```rust,ignore
//! let host = ServiceHost::start(RuntimeConfig::from_env()).await?;
//!
//! // talk to the key-value store through its stable address
//! host.kv_agent().set("greeting", "hello").await?;
//!
//! // ...
//! host.shutdown().await;
//! ```
//!
//! `start` performs three steps:
//!
//! 1. **Register** - the key-value store is registered with a watched file source
//!    (`<conf_dir>/kv_default.json`, optional), the echo worker with no source at all.
//! 2. **Subscribe** - the host keeps the current key-value handle up to date through a
//!    subscription, which fires on every rebuild.
//! 3. **Start** - every resource performs its initial configuration. A missing optional
//!    file leaves the store unconfigured until the file appears.
//!
//! ## Hot Reconfiguration
//!
//! Editing `kv_default.json` while the application runs swaps the store: the old worker
//! is undeployed (its `on_stop` hook flushes it), a new one is built from the new file and
//! deployed at the same address. Agents keep working because they only hold the address.
//! Requests sent while the swap is in progress fail with `Unavailable`.
//!
//! ## Graceful Shutdown
//!
//! [`ServiceHost::shutdown`] cancels the host's subscription and shuts the supervisor
//! down: watchers stop, every deployment is undeployed and every resource ends in
//! `Stopped`.
//!
//! ## Observability
//!
//! Call [`setup_tracing`](worker_framework::setup_tracing) once before starting the host.
//!
//! ```bash
//! RUST_LOG=info cargo run -p worker-sample    # lifecycle events
//! RUST_LOG=debug cargo run -p worker-sample   # plus dispatch and config polling
//! ```

pub mod service_host;

pub use service_host::*;
