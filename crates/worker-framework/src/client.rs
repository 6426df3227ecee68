//! # Action Endpoint
//!
//! Caller side of the dispatch protocol. An [`ActionEndpoint`] stamps the `action` and
//! `style` headers onto a bus message, so callers never deal with raw headers:
//!
//! ```rust,no_run
//! # async fn demo(bus: worker_framework::Bus) -> Result<(), worker_framework::BusError> {
//! use serde_json::json;
//! use worker_framework::endpoint;
//!
//! let value = endpoint(&bus)
//!     .address("workers.resource.kv::main")
//!     .action("get")
//!     .request(json!({"key": "greeting"}))
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! Typed agents (see the sample crate) wrap an endpoint and expose one method per action.

use crate::bus::Bus;
use crate::error::BusError;
use crate::message::{parse_signature, ActionEnvelope, RequestStyle};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub fn endpoint(bus: &Bus) -> ActionEndpoint {
    ActionEndpoint::new(bus.clone())
}

#[derive(Clone)]
pub struct ActionEndpoint {
    bus: Bus,
    address: String,
    action: String,
    timeout: Duration,
}

impl ActionEndpoint {
    pub fn new(bus: Bus) -> Self {
        Self {
            bus,
            address: String::new(),
            action: String::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    /// Sets address and action from `"<address>#<action>"`.
    pub fn signature(self, signature: &str) -> Result<Self, BusError> {
        let (address, action) = parse_signature(signature)?;
        Ok(self.address(address).action(action))
    }

    /// How long [`request`](Self::request) waits for a reply.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn envelope(&self, style: RequestStyle, payload: Option<Value>) -> ActionEnvelope {
        let envelope =
            ActionEnvelope::new(self.address.clone(), self.action.clone()).with_style(style);
        match payload {
            Some(payload) => envelope.with_payload(payload),
            None => envelope,
        }
    }

    async fn do_request(&self, payload: Option<Value>) -> Result<Value, BusError> {
        let envelope = self.envelope(RequestStyle::Request, payload);
        self.bus
            .request(
                &envelope.target_address,
                envelope.headers(),
                envelope.payload,
                self.timeout,
            )
            .await
    }

    pub async fn request(&self, payload: Value) -> Result<Value, BusError> {
        self.do_request(Some(payload)).await
    }

    /// Request without payload, which selects the handler's no-argument form.
    pub async fn request_empty(&self) -> Result<Value, BusError> {
        self.do_request(None).await
    }

    /// Request whose reply is deserialized into `T`.
    pub async fn request_as<T: DeserializeOwned>(
        &self,
        payload: Option<Value>,
    ) -> Result<T, BusError> {
        let value = self.do_request(payload).await?;
        serde_json::from_value(value).map_err(|e| BusError::Decode(e.to_string()))
    }

    pub async fn send(&self, payload: Value) -> Result<(), BusError> {
        let envelope = self.envelope(RequestStyle::Send, Some(payload));
        self.bus
            .send(&envelope.target_address, envelope.headers(), envelope.payload)
            .await
    }

    pub async fn send_empty(&self) -> Result<(), BusError> {
        let envelope = self.envelope(RequestStyle::Send, None);
        self.bus
            .send(&envelope.target_address, envelope.headers(), None)
            .await
    }

    /// Broadcasts to every consumer of the address. Returns how many were reached.
    pub async fn publish(&self, payload: Value) -> usize {
        let envelope = self.envelope(RequestStyle::Publish, Some(payload));
        self.bus
            .publish(&envelope.target_address, envelope.headers(), envelope.payload)
            .await
    }
}
