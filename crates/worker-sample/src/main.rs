//! # Worker Sample
//!
//! Starts the [`ServiceHost`], exercises the key-value store and the echo worker once,
//! then keeps serving until Ctrl-C.
//!
//! Configuration is read from `conf/kv_default.json` (see `RuntimeConfig::from_env` for
//! the environment overrides). Edit the file while the process runs to watch the store
//! being rebuilt.

use serde_json::json;
use tracing::{error, info, warn, Instrument};
use worker_framework::{endpoint, setup_tracing, RuntimeConfig};
use worker_sample::lifecycle::ServiceHost;

#[tokio::main]
async fn main() -> Result<(), String> {
    setup_tracing();

    let config = RuntimeConfig::from_env();
    info!(conf_dir = %config.conf_dir.display(), "Starting worker sample");

    let host = ServiceHost::start(config)
        .await
        .map_err(|e| e.to_string())?;

    let span = tracing::info_span!("kv_demo");
    let outcome = async {
        let kv = host.kv_agent();
        kv.set("greeting", "hello").await?;
        let visits = kv.incr("visits", 1).await?;
        let greeting = kv.get("greeting").await?;
        info!(?greeting, visits, "Key-value store answered");
        Ok::<_, worker_sample::clients::AgentError>(())
    }
    .instrument(span)
    .await;

    if let Err(e) = outcome {
        warn!(error = %e, state = %host.kv_state(), "Key-value store not ready");
    }

    let echo = endpoint(host.supervisor().bus())
        .address(host.echo_address())
        .action("echo")
        .request(json!({"hello": "world"}))
        .instrument(tracing::info_span!("echo_demo"))
        .await;
    match echo {
        Ok(reply) => info!(%reply, "Echo answered"),
        Err(e) => error!(error = %e, "Echo failed"),
    }

    info!("Serving, press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Cannot listen for Ctrl-C");
    }

    host.shutdown().await;
    info!("Application stopped");
    Ok(())
}
