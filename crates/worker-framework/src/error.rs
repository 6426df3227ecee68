//! # Framework Errors
//!
//! This module defines the error types used throughout the worker framework.
//! Each concern gets its own enum so that callers can tell a configuration problem
//! apart from a failed build or a failed action:
//!
//! - [`ConfigError`] - the backing store is unreachable or malformed.
//! - [`BuildError`] - a worker could not be constructed from its configuration.
//! - [`ActionError`] - an action could not be resolved or its handler failed.
//! - [`BusError`] - a message could not be delivered or a request got no answer.
//! - [`UndeployError`] - a worker did not stop cleanly. Always logged and swallowed.
//! - [`SupervisorError`] - errors surfaced by the [`Supervisor`](crate::Supervisor).
//!
//! Every enum provides `as_label()`, a short stable label for logs.

use std::time::Duration;

/// Errors raised while loading a configuration document.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration not found: {location}")]
    Missing { location: String },
    #[error("cannot read configuration {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed configuration {location}: {source}")]
    Parse {
        location: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Missing { .. } => "config_missing",
            ConfigError::Io { .. } => "config_io",
            ConfigError::Parse { .. } => "config_parse",
        }
    }
}

/// Errors raised by a [`WorkerBuilder`](crate::WorkerBuilder) or while activating the built worker.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BuildError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("unsupported vendor: {0}")]
    Unsupported(String),
    #[error("build failed: {0}")]
    Failed(String),
    #[error("builder panicked")]
    Panicked,
}

impl BuildError {
    pub fn as_label(&self) -> &'static str {
        match self {
            BuildError::Invalid(_) => "build_invalid",
            BuildError::Unsupported(_) => "build_unsupported",
            BuildError::Failed(_) => "build_failed",
            BuildError::Panicked => "build_panicked",
        }
    }
}

/// Errors raised while dispatching an action envelope.
///
/// `signature` is always `<address>#<action>`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActionError {
    #[error("{signature} not found")]
    NotFound { signature: String },
    #[error("invalid payload for {signature}: {reason}")]
    BadPayload { signature: String, reason: String },
    #[error("invoke {signature} failed: {reason}")]
    Invocation { signature: String, reason: String },
    #[error("invoke {signature} panicked")]
    Panicked { signature: String },
}

impl ActionError {
    pub const CODE_BAD_PAYLOAD: u16 = 400;
    pub const CODE_NOT_FOUND: u16 = 404;
    pub const CODE_INVOCATION: u16 = 500;

    /// The numeric code sent to a Request caller in the failure reply.
    pub fn code(&self) -> u16 {
        match self {
            ActionError::NotFound { .. } => Self::CODE_NOT_FOUND,
            ActionError::BadPayload { .. } => Self::CODE_BAD_PAYLOAD,
            ActionError::Invocation { .. } | ActionError::Panicked { .. } => Self::CODE_INVOCATION,
        }
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            ActionError::NotFound { .. } => "action_not_found",
            ActionError::BadPayload { .. } => "action_bad_payload",
            ActionError::Invocation { .. } => "action_failed",
            ActionError::Panicked { .. } => "action_panicked",
        }
    }

    pub fn signature(&self) -> &str {
        match self {
            ActionError::NotFound { signature }
            | ActionError::BadPayload { signature, .. }
            | ActionError::Invocation { signature, .. }
            | ActionError::Panicked { signature } => signature,
        }
    }
}

/// Errors raised by the in-process [`Bus`](crate::Bus).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BusError {
    #[error("no handlers for address {0}")]
    NoHandlers(String),
    #[error("request to {address} timed out after {timeout:?}")]
    Timeout { address: String, timeout: Duration },
    #[error("reply dropped by consumer of {0}")]
    ReplyDropped(String),
    #[error("({code}) {message}")]
    Failure { code: u16, message: String },
    #[error("invalid action signature: {0}")]
    InvalidSignature(String),
    #[error("cannot decode reply: {0}")]
    Decode(String),
}

impl BusError {
    pub fn as_label(&self) -> &'static str {
        match self {
            BusError::NoHandlers(_) => "bus_no_handlers",
            BusError::Timeout { .. } => "bus_timeout",
            BusError::ReplyDropped(_) => "bus_reply_dropped",
            BusError::Failure { .. } => "bus_failure",
            BusError::InvalidSignature(_) => "bus_invalid_signature",
            BusError::Decode(_) => "bus_decode",
        }
    }

    /// The failure code carried by a failed reply, if any.
    pub fn code(&self) -> Option<u16> {
        match self {
            BusError::Failure { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// A deployment did not stop cleanly.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UndeployError {
    #[error("deployment {deployment_id} stopped abnormally: {reason}")]
    Join {
        deployment_id: String,
        reason: String,
    },
    #[error("deployment {0} stop signal lost")]
    Stopped(String),
}

impl UndeployError {
    pub fn as_label(&self) -> &'static str {
        match self {
            UndeployError::Join { .. } => "undeploy_join",
            UndeployError::Stopped(_) => "undeploy_stopped",
        }
    }
}

/// Errors surfaced by the supervisor and its resources.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("unknown resource: {0}")]
    UnknownResource(String),
    #[error("resource {0} already registered")]
    AlreadyRegistered(String),
    #[error("resource {name} does not host a {expected} worker")]
    TypeMismatch { name: String, expected: &'static str },
    #[error("supervisor stopped")]
    Stopped,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Build(#[from] BuildError),
}

impl SupervisorError {
    pub fn as_label(&self) -> &'static str {
        match self {
            SupervisorError::UnknownResource(_) => "supervisor_unknown_resource",
            SupervisorError::AlreadyRegistered(_) => "supervisor_already_registered",
            SupervisorError::TypeMismatch { .. } => "supervisor_type_mismatch",
            SupervisorError::Stopped => "supervisor_stopped",
            SupervisorError::Config(e) => e.as_label(),
            SupervisorError::Build(e) => e.as_label(),
        }
    }
}
