//! # Subscriber Registry
//!
//! A last-known-value slot plus an ordered list of callbacks, one registry per resource.
//!
//! * A new subscriber is called immediately with the latest value, if there is one.
//! * Every [`publish`](Subscribers::publish) calls all subscribers in registration order.
//! * Subscriptions live until [`Subscription::cancel`] is called; dropping the handle
//!   keeps the callback registered.
//!
//! Callbacks run outside the lock guarding the slot, so a callback may read
//! [`latest`](Subscribers::latest) or cancel a subscription. Delivery itself is ordered by
//! a second lock held across registration and fan-out, so a subscriber never misses a
//! value published while it was being added. A callback must not subscribe to, or
//! publish on, the registry that is calling it.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

type Callback<H> = Arc<dyn Fn(H) + Send + Sync>;

struct Slot<H> {
    latest: Option<H>,
    callbacks: Vec<(u64, Callback<H>)>,
    next_id: u64,
}

pub struct Subscribers<H> {
    slot: Arc<Mutex<Slot<H>>>,
    // orders deliveries; never taken while `slot` is held
    delivery: Arc<Mutex<()>>,
}

impl<H> Clone for Subscribers<H> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
            delivery: self.delivery.clone(),
        }
    }
}

impl<H: Clone + Send + 'static> Default for Subscribers<H> {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<H: Clone + Send + 'static> Subscribers<H> {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot {
                latest: None,
                callbacks: Vec::new(),
                next_id: 1,
            })),
            delivery: Arc::new(Mutex::new(())),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(H) + Send + Sync + 'static,
    {
        let _delivery = lock(&self.delivery);
        let callback: Callback<H> = Arc::new(callback);
        let (id, latest) = {
            let mut slot = lock(&self.slot);
            let id = slot.next_id;
            slot.next_id += 1;
            slot.callbacks.push((id, callback.clone()));
            (id, slot.latest.clone())
        };
        if let Some(latest) = latest {
            callback(latest);
        }

        let weak: Weak<Mutex<Slot<H>>> = Arc::downgrade(&self.slot);
        Subscription {
            id,
            cancel: Some(Box::new(move || {
                if let Some(slot) = weak.upgrade() {
                    lock(&slot).callbacks.retain(|(cid, _)| *cid != id);
                }
            })),
        }
    }

    /// Stores `value` as the latest and hands it to every subscriber.
    pub fn publish(&self, value: H) {
        let _delivery = lock(&self.delivery);
        let callbacks: Vec<Callback<H>> = {
            let mut slot = lock(&self.slot);
            slot.latest = Some(value.clone());
            slot.callbacks.iter().map(|(_, cb)| cb.clone()).collect()
        };
        for callback in callbacks {
            callback(value.clone());
        }
    }

    pub fn latest(&self) -> Option<H> {
        lock(&self.slot).latest.clone()
    }

    /// Forgets the latest value; later subscribers are not called until the next publish.
    pub fn invalidate(&self) {
        lock(&self.slot).latest = None;
    }

    /// Drops every subscriber and the latest value.
    pub fn clear(&self) {
        let mut slot = lock(&self.slot);
        slot.latest = None;
        slot.callbacks.clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.slot).callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by [`Subscribers::subscribe`].
pub struct Subscription {
    id: u64,
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Log = Arc<Mutex<Vec<String>>>;
    type Recorder = Box<dyn Fn(u32) + Send + Sync>;

    fn recorder() -> (Log, impl Fn(&'static str) -> Recorder) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let make = move |tag: &'static str| {
            let sink = sink.clone();
            Box::new(move |v: u32| sink.lock().unwrap().push(format!("{tag}{v}"))) as Recorder
        };
        (log, make)
    }

    #[test]
    fn late_subscriber_gets_latest() {
        let subs = Subscribers::<u32>::new();
        let (log, make) = recorder();

        let _a = subs.subscribe(make("a"));
        subs.publish(1);
        let _b = subs.subscribe(make("b"));

        assert_eq!(*log.lock().unwrap(), vec!["a1", "b1"]);
        assert_eq!(subs.latest(), Some(1));
    }

    #[test]
    fn rebuild_fans_out_in_registration_order() {
        let subs = Subscribers::<u32>::new();
        let (log, make) = recorder();
        let _handles: Vec<_> = ["x", "y", "z"]
            .into_iter()
            .map(|tag| subs.subscribe(make(tag)))
            .collect();

        subs.publish(7);
        assert_eq!(*log.lock().unwrap(), vec!["x7", "y7", "z7"]);
    }

    #[test]
    fn cancel_and_invalidate() {
        let subs = Subscribers::<u32>::new();
        let (log, make) = recorder();
        let a = subs.subscribe(make("a"));
        let _b = subs.subscribe(make("b"));

        a.cancel();
        subs.publish(2);
        assert_eq!(*log.lock().unwrap(), vec!["b2"]);
        assert_eq!(subs.len(), 1);

        subs.invalidate();
        let _c = subs.subscribe(make("c"));
        assert_eq!(log.lock().unwrap().len(), 1);

        subs.clear();
        assert!(subs.is_empty());
    }

    #[test]
    fn callbacks_may_read_the_latest_value() {
        let subs = Subscribers::<u32>::new();
        let seen: Arc<Mutex<Vec<Option<u32>>>> = Arc::default();

        let (inner, sink) = (subs.clone(), seen.clone());
        let _sub = subs.subscribe(move |_| sink.lock().unwrap().push(inner.latest()));
        subs.publish(3);
        let (inner, sink) = (subs.clone(), seen.clone());
        let _late = subs.subscribe(move |_| sink.lock().unwrap().push(inner.latest()));

        assert_eq!(*seen.lock().unwrap(), vec![Some(3), Some(3)]);
    }
}
