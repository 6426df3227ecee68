//! # Key-Value Agent
//!
//! Typed API over the key-value worker's bus address. Every method is one request and
//! the reply is decoded into the method's return type.
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};
use worker_framework::{endpoint, ActionEndpoint, Bus, BusError};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AgentError {
    #[error("key-value store unavailable at {0}")]
    Unavailable(String),
    #[error("key-value store rejected the call: {0}")]
    Rejected(String),
    #[error(transparent)]
    Bus(BusError),
}

impl From<BusError> for AgentError {
    fn from(e: BusError) -> Self {
        match e {
            BusError::NoHandlers(address) => AgentError::Unavailable(address),
            BusError::Failure { message, .. } => AgentError::Rejected(message),
            other => AgentError::Bus(other),
        }
    }
}

/// Client for a [`KeyValueWorker`](crate::kv_worker::KeyValueWorker) resource.
///
/// The agent holds only the resource address, so it keeps working across redeploys.
#[derive(Clone)]
pub struct KeyValueAgent {
    endpoint: ActionEndpoint,
}

impl KeyValueAgent {
    pub fn new(bus: &Bus, address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint(bus).address(address).timeout(timeout),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        action: &str,
        payload: Option<Value>,
    ) -> Result<T, AgentError> {
        debug!("Sending request");
        Ok(self
            .endpoint
            .clone()
            .action(action)
            .request_as(payload)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, key: &str) -> Result<Option<String>, AgentError> {
        self.call("get", Some(json!({ "key": key }))).await
    }

    #[instrument(skip(self, value))]
    pub async fn set(&self, key: &str, value: &str) -> Result<(), AgentError> {
        self.call::<Value>("set", Some(json!({ "key": key, "value": value })))
            .await
            .map(|_| ())
    }

    #[instrument(skip(self))]
    pub async fn del(&self, keys: &[&str]) -> Result<usize, AgentError> {
        self.call("del", Some(json!({ "keys": keys }))).await
    }

    #[instrument(skip(self))]
    pub async fn incr(&self, key: &str, by: i64) -> Result<i64, AgentError> {
        self.call("incr", Some(json!({ "key": key, "by": by }))).await
    }

    #[instrument(skip(self, value))]
    pub async fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool, AgentError> {
        self.call(
            "hset",
            Some(json!({ "key": key, "field": field, "value": value })),
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, AgentError> {
        self.call("hget", Some(json!({ "key": key, "field": field })))
            .await
    }

    #[instrument(skip(self))]
    pub async fn hkeys(&self, key: &str) -> Result<Vec<String>, AgentError> {
        self.call("hkeys", Some(json!({ "key": key }))).await
    }

    #[instrument(skip(self, fields))]
    pub async fn hmset(
        &self,
        key: &str,
        fields: BTreeMap<String, String>,
    ) -> Result<(), AgentError> {
        self.call::<Value>("hmset", Some(json!({ "key": key, "fields": fields })))
            .await
            .map(|_| ())
    }

    #[instrument(skip(self))]
    pub async fn hmget(
        &self,
        key: &str,
        fields: &[&str],
    ) -> Result<Vec<Option<String>>, AgentError> {
        self.call("hmget", Some(json!({ "key": key, "fields": fields })))
            .await
    }

    #[instrument(skip(self))]
    pub async fn flush(&self) -> Result<usize, AgentError> {
        self.call("flush", None).await
    }

    #[instrument(skip(self))]
    pub async fn size(&self) -> Result<usize, AgentError> {
        self.call("size", None).await
    }
}
