//! # Action Envelopes
//!
//! Wire shape of the messages exchanged between callers and workers.
//!
//! An action travels over the [`Bus`](crate::Bus) as a plain message: the headers carry
//! the action name (`action`) and the delivery style (`style`), the body carries an
//! optional JSON payload. [`ActionEnvelope`] is the decoded, typed view of such a message.
//!
//! Addresses follow two conventions:
//!
//! - resources live at `<namespace>.resource.<kind>::<name>` ([`resource_address`])
//! - configuration changes are published at `<namespace>::cfg.events[<location>]`
//!   ([`config_event_address`])

use crate::error::BusError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tokio::sync::oneshot;

pub const HEADER_ACTION: &str = "action";
pub const HEADER_STYLE: &str = "style";

/// Message headers. Ordered so that logs are stable.
pub type Headers = BTreeMap<String, String>;

/// Channel used to complete a request.
pub type Reply = oneshot::Sender<Result<Value, BusError>>;

/// How the caller expects the outcome of an action to be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStyle {
    /// The caller waits for a reply or a failure.
    Request,
    /// Point-to-point, fire-and-forget.
    #[default]
    Send,
    /// Broadcast to every consumer, fire-and-forget.
    Publish,
}

impl RequestStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStyle::Request => "request",
            RequestStyle::Send => "send",
            RequestStyle::Publish => "publish",
        }
    }

    pub fn expects_reply(&self) -> bool {
        matches!(self, RequestStyle::Request)
    }
}

impl fmt::Display for RequestStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "request" => Ok(RequestStyle::Request),
            "send" => Ok(RequestStyle::Send),
            "publish" => Ok(RequestStyle::Publish),
            other => Err(format!("unknown request style: {other}")),
        }
    }
}

/// A decoded action message addressed to a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionEnvelope {
    pub target_address: String,
    pub action: String,
    pub style: RequestStyle,
    pub payload: Option<Value>,
}

impl ActionEnvelope {
    pub fn new(target_address: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            target_address: target_address.into(),
            action: action.into(),
            style: RequestStyle::default(),
            payload: None,
        }
    }

    pub fn with_style(mut self, style: RequestStyle) -> Self {
        self.style = style;
        self
    }

    /// Sets the payload. `Value::Null` is treated as "no payload".
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = normalize_payload(Some(payload));
        self
    }

    /// `<address>#<action>`, used in logs and error messages.
    pub fn signature(&self) -> String {
        format!("{}#{}", self.target_address, self.action)
    }

    pub fn headers(&self) -> Headers {
        let mut headers = Headers::new();
        headers.insert(HEADER_ACTION.to_string(), self.action.clone());
        headers.insert(HEADER_STYLE.to_string(), self.style.as_str().to_string());
        headers
    }

    /// Decodes an envelope from raw bus headers.
    ///
    /// A missing `action` header yields an empty action name, which never resolves and
    /// is reported as not found. A missing or unknown style falls back to `send`.
    pub fn from_headers(address: &str, headers: &Headers, body: Option<Value>) -> Self {
        let action = headers.get(HEADER_ACTION).cloned().unwrap_or_default();
        let style = headers
            .get(HEADER_STYLE)
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();
        Self {
            target_address: address.to_string(),
            action,
            style,
            payload: normalize_payload(body),
        }
    }
}

fn normalize_payload(payload: Option<Value>) -> Option<Value> {
    payload.filter(|v| !v.is_null())
}

/// Splits `"<address>#<action>"` into its two halves.
pub fn parse_signature(signature: &str) -> Result<(&str, &str), BusError> {
    match signature.rsplit_once('#') {
        Some((address, action)) if !address.is_empty() && !action.is_empty() => {
            Ok((address, action))
        }
        _ => Err(BusError::InvalidSignature(signature.to_string())),
    }
}

pub fn resource_address(namespace: &str, kind: &str, name: &str) -> String {
    format!("{namespace}.resource.{kind}::{name}")
}

pub fn config_event_address(namespace: &str, location: &str) -> String {
    format!("{namespace}::cfg.events[{location}]")
}

pub fn config_cache_key(namespace: &str, location: &str) -> String {
    format!("{namespace}::cfg.cache[{location}]")
}
