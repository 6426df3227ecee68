//! # Action Dispatch Gateway
//!
//! The gateway sits between a bus address and one worker instance. For every message it
//! decodes an [`ActionEnvelope`], resolves the handler through the worker's
//! [`ActionTable`], runs it, and turns the outcome into a reply, a failure reply, or a
//! log record.
//!
//! Each message is handled in its own Tokio task, so a slow action does not hold up the
//! mailbox and a panicking handler only fails its own envelope.

use crate::actions::{ActionTable, HandlerFault};
use crate::bus::{Consumer, Message, Replier};
use crate::error::ActionError;
use crate::message::ActionEnvelope;
use crate::worker::Worker;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

pub struct Gateway<W> {
    worker: Arc<W>,
    table: Arc<ActionTable<W>>,
    address: String,
}

impl<W> Clone for Gateway<W> {
    fn clone(&self) -> Self {
        Self {
            worker: self.worker.clone(),
            table: self.table.clone(),
            address: self.address.clone(),
        }
    }
}

impl<W: Worker> Gateway<W> {
    /// Builds the gateway, filling the action table from [`Worker::actions`].
    pub fn new(worker: Arc<W>, address: impl Into<String>) -> Self {
        let mut table = ActionTable::new();
        W::actions(&mut table);
        Self {
            worker,
            table: Arc::new(table),
            address: address.into(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Resolves and runs one envelope.
    pub async fn dispatch(&self, envelope: ActionEnvelope) -> Result<Value, ActionError> {
        let signature = envelope.signature();
        let Some(handler) = self.table.resolve(&self.worker, envelope) else {
            return Err(ActionError::NotFound { signature });
        };

        match tokio::spawn(handler).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(HandlerFault::BadPayload(reason))) => {
                Err(ActionError::BadPayload { signature, reason })
            }
            Ok(Err(HandlerFault::Failed(reason))) => {
                Err(ActionError::Invocation { signature, reason })
            }
            Err(_) => Err(ActionError::Panicked { signature }),
        }
    }

    /// Handles a raw bus message end to end.
    pub async fn handle(&self, message: Message) {
        let (address, headers, body, replier) = message.split();
        let envelope = ActionEnvelope::from_headers(&address, &headers, body);
        let style = envelope.style;
        let action = envelope.action.clone();
        debug!(address = %address, action = %action, style = %style, "dispatching");

        let outcome = self.dispatch(envelope).await;
        respond(replier, &action, style.as_str(), outcome);
    }

    /// Serves the consumer until `stop` fires or the consumer is unregistered,
    /// then calls [`Worker::on_stop`].
    pub async fn run(self, mut consumer: Consumer, mut stop: oneshot::Receiver<()>) {
        info!(address = %self.address, "gateway started");
        loop {
            tokio::select! {
                _ = &mut stop => break,
                next = consumer.recv() => match next {
                    Some(message) => {
                        let gateway = self.clone();
                        tokio::spawn(async move { gateway.handle(message).await });
                    }
                    None => break,
                },
            }
        }
        drop(consumer);
        self.worker.on_stop().await;
        info!(address = %self.address, "gateway stopped");
    }
}

fn respond(replier: Replier, action: &str, style: &str, outcome: Result<Value, ActionError>) {
    match outcome {
        Ok(value) => replier.reply(value),
        Err(e) if replier.expects_reply() => {
            debug!(action = %action, error = %e, "failing request");
            replier.fail(e.code(), e.to_string());
        }
        Err(e @ ActionError::NotFound { .. }) => {
            warn!(action = %action, style = %style, error = %e, "unknown action");
        }
        Err(e) => {
            error!(
                action = %action,
                style = %style,
                error = %e,
                label = e.as_label(),
                "action failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use crate::client::ActionEndpoint;
    use crate::error::BusError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Probe {
        fired: AtomicUsize,
    }

    #[async_trait]
    impl Worker for Probe {
        fn actions(table: &mut ActionTable<Self>) {
            table
                .on("echo", |_w: Arc<Probe>, env: ActionEnvelope| async move {
                    Ok::<_, String>(env.payload.unwrap_or(Value::Null))
                })
                .unary("fail", |w: Arc<Probe>, _v: Value| async move {
                    w.fired.fetch_add(1, Ordering::SeqCst);
                    Err::<Value, _>("handler failed")
                })
                .nullary("panic", |_w: Arc<Probe>| async move {
                    if true {
                        panic!("boom");
                    }
                    Ok::<Value, String>(Value::Null)
                })
                .unary("typed", |_w: Arc<Probe>, n: u32| async move {
                    Ok::<_, String>(n * 2)
                });
        }
    }

    fn serve(bus: &Bus, probe: Arc<Probe>) -> oneshot::Sender<()> {
        let gateway = Gateway::new(probe, "probe");
        let consumer = bus.consumer("probe");
        let (stop_tx, stop_rx) = oneshot::channel();
        tokio::spawn(gateway.run(consumer, stop_rx));
        stop_tx
    }

    fn endpoint(bus: &Bus) -> ActionEndpoint {
        ActionEndpoint::new(bus.clone())
            .address("probe")
            .timeout(Duration::from_secs(1))
    }

    #[tokio::test]
    async fn echo_round_trip() {
        let bus = Bus::new();
        let _stop = serve(&bus, Arc::new(Probe::default()));

        let reply = endpoint(&bus).action("echo").request(json!({"x": 1})).await;
        assert_eq!(reply, Ok(json!({"x": 1})));
    }

    #[tokio::test]
    async fn send_failure_is_silent() {
        let bus = Bus::new();
        let probe = Arc::new(Probe::default());
        let _stop = serve(&bus, probe.clone());

        let sent = endpoint(&bus).action("fail").send(json!({})).await;
        assert_eq!(sent, Ok(()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(probe.fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn publish_failures_are_swallowed() {
        let bus = Bus::new();
        let probe = Arc::new(Probe::default());
        let _stop = serve(&bus, probe.clone());
        let ep = endpoint(&bus);

        assert_eq!(ep.clone().action("echo").publish(json!({"x": 1})).await, 1);
        assert_eq!(ep.clone().action("fail").publish(json!({})).await, 1);
        assert_eq!(ep.clone().action("doesNotExist").publish(json!({})).await, 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(probe.fired.load(Ordering::SeqCst), 1);

        let next = ep.action("echo").request(json!("still here")).await;
        assert_eq!(next, Ok(json!("still here")));
    }

    #[tokio::test]
    async fn request_failures_carry_codes() {
        let bus = Bus::new();
        let _stop = serve(&bus, Arc::new(Probe::default()));
        let ep = endpoint(&bus);

        let missing = ep.clone().action("doesNotExist").request(json!({})).await;
        assert_eq!(missing.as_ref().err().and_then(BusError::code), Some(404));

        let bad = ep.clone().action("typed").request(json!("seven")).await;
        assert_eq!(bad.as_ref().err().and_then(BusError::code), Some(400));

        let failed = ep.clone().action("fail").request(json!({})).await;
        assert_eq!(failed.as_ref().err().and_then(BusError::code), Some(500));

        let typed = ep.action("typed").request(json!(21)).await;
        assert_eq!(typed, Ok(json!(42)));
    }

    #[tokio::test]
    async fn panicking_handler_does_not_kill_the_gateway() {
        let bus = Bus::new();
        let _stop = serve(&bus, Arc::new(Probe::default()));
        let ep = endpoint(&bus);

        let panicked = ep.clone().action("panic").request_empty().await;
        assert_eq!(panicked.as_ref().err().and_then(BusError::code), Some(500));

        let still_alive = ep.action("echo").request(json!("ok")).await;
        assert_eq!(still_alive, Ok(json!("ok")));
    }

    #[tokio::test]
    async fn stop_detaches_the_gateway() {
        let bus = Bus::new();
        let stop = serve(&bus, Arc::new(Probe::default()));
        assert!(bus.has_consumers("probe"));

        stop.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!bus.has_consumers("probe"));
    }
}
