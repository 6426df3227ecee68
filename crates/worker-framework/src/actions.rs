//! # Action Table
//!
//! Maps action names to typed handler functions. A worker fills its table once, when it
//! is deployed (see [`Worker::actions`](crate::Worker::actions)), so every handler
//! signature is checked by the compiler.
//!
//! Three binding forms exist, tried in this order for every envelope:
//!
//! 1. **explicit** ([`ActionTable::on`]) - receives the whole [`ActionEnvelope`].
//! 2. **nullary** ([`ActionTable::nullary`]) - chosen when the envelope has no payload.
//! 3. **unary** ([`ActionTable::unary`]) - chosen when the envelope has a payload; the
//!    payload is deserialized into the handler's parameter type.
//!
//! If none matches, the gateway answers with [`ActionError::NotFound`](crate::ActionError).

use crate::message::ActionEnvelope;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Why a resolved handler did not produce a value.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerFault {
    BadPayload(String),
    Failed(String),
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, HandlerFault>> + Send>>;

type Explicit<W> = Box<dyn Fn(Arc<W>, ActionEnvelope) -> HandlerFuture + Send + Sync>;
type Nullary<W> = Box<dyn Fn(Arc<W>) -> HandlerFuture + Send + Sync>;
type Unary<W> = Box<dyn Fn(Arc<W>, Value) -> HandlerFuture + Send + Sync>;

pub struct ActionTable<W> {
    explicit: HashMap<String, Explicit<W>>,
    nullary: HashMap<String, Nullary<W>>,
    unary: HashMap<String, Unary<W>>,
}

impl<W> Default for ActionTable<W> {
    fn default() -> Self {
        Self {
            explicit: HashMap::new(),
            nullary: HashMap::new(),
            unary: HashMap::new(),
        }
    }
}

fn settle<R, E>(outcome: Result<R, E>) -> Result<Value, HandlerFault>
where
    R: Serialize,
    E: Display,
{
    let value = outcome.map_err(|e| HandlerFault::Failed(e.to_string()))?;
    serde_json::to_value(value).map_err(|e| HandlerFault::Failed(e.to_string()))
}

impl<W: Send + Sync + 'static> ActionTable<W> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to a handler that receives the raw envelope.
    pub fn on<F, Fut, R, E>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Arc<W>, ActionEnvelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        R: Serialize,
        E: Display,
    {
        let handler = Arc::new(handler);
        self.explicit.insert(
            name.into(),
            Box::new(move |worker, envelope| {
                let handler = handler.clone();
                Box::pin(async move { settle(handler(worker, envelope).await) })
            }),
        );
        self
    }

    /// Binds `name` to a handler taking no argument.
    pub fn nullary<F, Fut, R, E>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Arc<W>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        R: Serialize,
        E: Display,
    {
        let handler = Arc::new(handler);
        self.nullary.insert(
            name.into(),
            Box::new(move |worker| {
                let handler = handler.clone();
                Box::pin(async move { settle(handler(worker).await) })
            }),
        );
        self
    }

    /// Binds `name` to a handler taking one structured argument.
    pub fn unary<P, F, Fut, R, E>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(Arc<W>, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        R: Serialize,
        E: Display,
    {
        let handler = Arc::new(handler);
        self.unary.insert(
            name.into(),
            Box::new(move |worker, payload| {
                let handler = handler.clone();
                Box::pin(async move {
                    let param: P = serde_json::from_value(payload)
                        .map_err(|e| HandlerFault::BadPayload(e.to_string()))?;
                    settle(handler(worker, param).await)
                })
            }),
        );
        self
    }

    /// Picks the handler for `envelope`, or `None` when the action is unknown.
    pub fn resolve(&self, worker: &Arc<W>, envelope: ActionEnvelope) -> Option<HandlerFuture> {
        if let Some(handler) = self.explicit.get(&envelope.action) {
            return Some(handler(worker.clone(), envelope));
        }
        match envelope.payload {
            None => self
                .nullary
                .get(&envelope.action)
                .map(|handler| handler(worker.clone())),
            Some(payload) => self
                .unary
                .get(&envelope.action)
                .map(|handler| handler(worker.clone(), payload)),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.explicit.contains_key(name)
            || self.nullary.contains_key(name)
            || self.unary.contains_key(name)
    }

    /// Every bound action name, sorted and deduplicated.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .explicit
            .keys()
            .chain(self.nullary.keys())
            .chain(self.unary.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.explicit.is_empty() && self.nullary.is_empty() && self.unary.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    struct Counter {
        base: i64,
    }

    #[derive(Deserialize)]
    struct Add {
        by: i64,
    }

    fn table() -> ActionTable<Counter> {
        let mut table = ActionTable::new();
        table
            .on("explicit", |_w: Arc<Counter>, env: ActionEnvelope| async move {
                Ok::<_, String>(json!({"explicit": env.action}))
            })
            .nullary("value", |w: Arc<Counter>| async move { Ok::<_, String>(w.base) })
            .unary("value", |w: Arc<Counter>, add: Add| async move {
                Ok::<_, String>(w.base + add.by)
            })
            .unary("broken", |_w: Arc<Counter>, _v: Value| async move {
                Err::<Value, _>("nope")
            });
        table
    }

    async fn run(
        table: &ActionTable<Counter>,
        action: &str,
        payload: Option<Value>,
    ) -> Option<Result<Value, HandlerFault>> {
        let worker = Arc::new(Counter { base: 10 });
        let mut envelope = ActionEnvelope::new("counter", action);
        if let Some(payload) = payload {
            envelope = envelope.with_payload(payload);
        }
        match table.resolve(&worker, envelope) {
            Some(fut) => Some(fut.await),
            None => None,
        }
    }

    #[tokio::test]
    async fn payload_presence_selects_the_form() {
        let table = table();
        assert_eq!(run(&table, "value", None).await, Some(Ok(json!(10))));
        assert_eq!(
            run(&table, "value", Some(json!({"by": 5}))).await,
            Some(Ok(json!(15)))
        );
    }

    #[tokio::test]
    async fn explicit_binding_wins_and_unknown_is_none() {
        let table = table();
        assert_eq!(
            run(&table, "explicit", Some(json!(1))).await,
            Some(Ok(json!({"explicit": "explicit"})))
        );
        assert_eq!(run(&table, "missing", None).await, None);
        // unary-only action without payload does not resolve
        assert_eq!(run(&table, "broken", None).await, None);
    }

    #[tokio::test]
    async fn payload_and_handler_faults() {
        let table = table();
        assert!(matches!(
            run(&table, "value", Some(json!({"by": "x"}))).await,
            Some(Err(HandlerFault::BadPayload(_)))
        ));
        assert_eq!(
            run(&table, "broken", Some(json!(1))).await,
            Some(Err(HandlerFault::Failed("nope".into())))
        );
        assert_eq!(table.names(), vec!["broken", "explicit", "value"]);
    }
}
