//! # Echo Worker
//!
//! A configuration-free worker used to probe the bus. `echo` is bound explicitly, so it
//! sees the whole envelope and answers for any payload, including none.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use worker_framework::{ActionEnvelope, ActionTable, Worker};

pub const KIND: &str = "echo";

#[derive(Debug, Error)]
#[error("echo failure: {0}")]
pub struct EchoFailure(String);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailArgs {
    pub reason: String,
}

#[derive(Default)]
pub struct EchoWorker {
    pings: AtomicU64,
}

impl EchoWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pings(&self) -> u64 {
        self.pings.load(Ordering::Relaxed)
    }

    fn reflect(envelope: &ActionEnvelope) -> Value {
        json!({
            "action": envelope.action,
            "style": envelope.style.as_str(),
            "payload": envelope.payload.clone().unwrap_or(Value::Null),
        })
    }
}

impl Worker for EchoWorker {
    fn actions(table: &mut ActionTable<Self>) {
        table
            .on("echo", |_echo: Arc<Self>, envelope: ActionEnvelope| async move {
                Ok::<_, EchoFailure>(Self::reflect(&envelope))
            })
            .nullary("ping", |echo: Arc<Self>| async move {
                let count = echo.pings.fetch_add(1, Ordering::Relaxed) + 1;
                Ok::<_, EchoFailure>(json!({ "pong": count }))
            })
            .unary("fail", |_echo: Arc<Self>, args: FailArgs| async move {
                Err::<Value, _>(EchoFailure(args.reason))
            });
    }
}
