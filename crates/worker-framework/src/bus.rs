//! # In-Process Message Bus
//!
//! A small address-based bus on top of Tokio channels. Each registered [`Consumer`] owns a
//! bounded `mpsc` mailbox; the bus keeps the sending halves in a table keyed by address.
//!
//! Three delivery modes are supported:
//!
//! * **send** - point-to-point. Consumers of the same address are served round-robin.
//! * **publish** - broadcast to every consumer of the address.
//! * **request** - point-to-point with a `oneshot` reply and a timeout.
//!
//! The bus is cheap to clone; every clone shares the same address table.

use crate::error::BusError;
use crate::message::{Headers, Reply};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

pub type ConsumerId = u64;

const DEFAULT_MAILBOX: usize = 64;

#[derive(Clone)]
pub struct Bus {
    inner: Arc<Inner>,
}

struct Inner {
    table: Mutex<HashMap<String, Route>>,
    next_id: AtomicU64,
    capacity: usize,
}

#[derive(Default)]
struct Route {
    consumers: Vec<(ConsumerId, mpsc::Sender<Message>)>,
    cursor: usize,
}

impl Route {
    fn prune(&mut self) {
        self.consumers.retain(|(_, tx)| !tx.is_closed());
    }

    fn next(&mut self) -> Option<mpsc::Sender<Message>> {
        self.prune();
        if self.consumers.is_empty() {
            return None;
        }
        let idx = self.cursor % self.consumers.len();
        self.cursor = self.cursor.wrapping_add(1);
        Some(self.consumers[idx].1.clone())
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAILBOX)
    }
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bus whose consumer mailboxes hold at most `capacity` messages.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                table: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Route>> {
        self.inner
            .table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a new consumer at `address`.
    pub fn consumer(&self, address: impl Into<String>) -> Consumer {
        let address = address.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        self.table()
            .entry(address.clone())
            .or_default()
            .consumers
            .push((id, tx));
        debug!(address = %address, consumer_id = id, "consumer registered");
        Consumer {
            bus: self.clone(),
            address,
            id,
            rx,
        }
    }

    /// Removes a consumer. Returns `false` if it was already gone.
    pub fn unregister(&self, address: &str, id: ConsumerId) -> bool {
        let mut table = self.table();
        let Some(route) = table.get_mut(address) else {
            return false;
        };
        let before = route.consumers.len();
        route.consumers.retain(|(cid, _)| *cid != id);
        let removed = route.consumers.len() != before;
        if route.consumers.is_empty() {
            table.remove(address);
        }
        if removed {
            debug!(address = %address, consumer_id = id, "consumer unregistered");
        }
        removed
    }

    pub fn has_consumers(&self, address: &str) -> bool {
        self.consumer_count(address) > 0
    }

    pub fn consumer_count(&self, address: &str) -> usize {
        self.table()
            .get_mut(address)
            .map(|route| {
                route.prune();
                route.consumers.len()
            })
            .unwrap_or(0)
    }

    fn pick(&self, address: &str) -> Result<mpsc::Sender<Message>, BusError> {
        self.table()
            .get_mut(address)
            .and_then(Route::next)
            .ok_or_else(|| BusError::NoHandlers(address.to_string()))
    }

    async fn deliver(&self, address: &str, message: Message) -> Result<(), BusError> {
        let tx = self.pick(address)?;
        tx.send(message)
            .await
            .map_err(|_| BusError::NoHandlers(address.to_string()))
    }

    /// Point-to-point delivery without a reply.
    pub async fn send(
        &self,
        address: &str,
        headers: Headers,
        body: Option<Value>,
    ) -> Result<(), BusError> {
        trace!(address = %address, "send");
        self.deliver(address, Message::new(address, headers, body, None))
            .await
    }

    /// Delivers a copy of the message to every consumer of `address`.
    ///
    /// Returns the number of consumers reached. Publishing to an address nobody listens
    /// on is not an error.
    pub async fn publish(&self, address: &str, headers: Headers, body: Option<Value>) -> usize {
        let targets: Vec<_> = match self.table().get_mut(address) {
            Some(route) => {
                route.prune();
                route.consumers.iter().map(|(_, tx)| tx.clone()).collect()
            }
            None => Vec::new(),
        };

        let mut reached = 0;
        for tx in targets {
            let message = Message::new(address, headers.clone(), body.clone(), None);
            if tx.send(message).await.is_ok() {
                reached += 1;
            }
        }
        trace!(address = %address, reached, "publish");
        reached
    }

    /// Point-to-point delivery that waits for a reply.
    pub async fn request(
        &self,
        address: &str,
        headers: Headers,
        body: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, BusError> {
        let (tx, rx) = oneshot::channel();
        self.deliver(address, Message::new(address, headers, body, Some(tx)))
            .await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(BusError::ReplyDropped(address.to_string())),
            Err(_) => Err(BusError::Timeout {
                address: address.to_string(),
                timeout,
            }),
        }
    }
}

/// The receiving half of a bus registration. Dropping it unregisters the consumer.
pub struct Consumer {
    bus: Bus,
    address: String,
    id: ConsumerId,
    rx: mpsc::Receiver<Message>,
}

impl Consumer {
    pub fn id(&self) -> ConsumerId {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Waits for the next message. `None` once the consumer has been unregistered
    /// and its mailbox is drained.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.bus.unregister(&self.address, self.id);
    }
}

/// A message taken off the bus.
pub struct Message {
    pub address: String,
    pub headers: Headers,
    pub body: Option<Value>,
    replier: Replier,
}

impl Message {
    fn new(address: &str, headers: Headers, body: Option<Value>, reply: Option<Reply>) -> Self {
        Self {
            address: address.to_string(),
            headers,
            body,
            replier: Replier { tx: reply },
        }
    }

    pub fn expects_reply(&self) -> bool {
        self.replier.expects_reply()
    }

    pub fn reply(self, value: Value) {
        self.replier.reply(value)
    }

    pub fn fail(self, code: u16, message: impl Into<String>) {
        self.replier.fail(code, message)
    }

    pub fn split(self) -> (String, Headers, Option<Value>, Replier) {
        (self.address, self.headers, self.body, self.replier)
    }
}

/// Completes a request. Both operations are no-ops for messages that were sent or published.
pub struct Replier {
    tx: Option<Reply>,
}

impl Replier {
    pub fn expects_reply(&self) -> bool {
        self.tx.is_some()
    }

    pub fn reply(self, value: Value) {
        if let Some(tx) = self.tx {
            let _ = tx.send(Ok(value));
        }
    }

    pub fn fail(self, code: u16, message: impl Into<String>) {
        if let Some(tx) = self.tx {
            let _ = tx.send(Err(BusError::Failure {
                code,
                message: message.into(),
            }));
        }
    }
}
