//! Typed agents for the sample workers.

pub mod kv_agent;

pub use kv_agent::{AgentError, KeyValueAgent};
