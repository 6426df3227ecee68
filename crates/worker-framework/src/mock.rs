//! # Mock Builder & Testing Guide
//!
//! [`MockBuilder`] is a [`WorkerBuilder`] for tests. It records every snapshot it is asked
//! to build from, can be scripted to fail, and can be slowed down to widen race windows.
//! Clones share state, so a test keeps one clone for assertions and hands the other to the
//! supervisor.
//!
//! ## When to use the mock vs a real builder
//!
//! | Need | MockBuilder | Real builder |
//! |------|-------------|--------------|
//! | **Count builds** | `call_count()` | not observable |
//! | **Inject failures** | `fail_next(..)` | requires a broken config |
//! | **Concurrency checks** | `with_delay(..)` + `max_concurrent()` | timing dependent |
//!
//! ## Example
//!
//! ```rust
//! use worker_framework::mock::MockBuilder;
//! use worker_framework::{ActionTable, BuildError, ConfigSource, RuntimeConfig, Supervisor, Worker};
//!
//! struct Noop;
//!
//! impl Worker for Noop {
//!     fn actions(_table: &mut ActionTable<Self>) {}
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let supervisor = Supervisor::new(RuntimeConfig::default());
//!     let builder = MockBuilder::new(|_| Ok(Noop));
//!     builder.fail_next(BuildError::Failed("pool exhausted".into()));
//!
//!     let resource = supervisor
//!         .register("noop", "main", builder.clone(), ConfigSource::None)
//!         .unwrap();
//!     let state = resource.start().await.unwrap();
//!
//!     assert!(!state.is_active());
//!     assert_eq!(builder.call_count(), 1);
//! }
//! ```

use crate::config::ConfigSnapshot;
use crate::error::BuildError;
use crate::worker::{Worker, WorkerBuilder};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

type Factory<W> = Box<dyn Fn(&ConfigSnapshot) -> Result<W, BuildError> + Send + Sync>;

struct MockState<W> {
    factory: Factory<W>,
    failures: Mutex<VecDeque<BuildError>>,
    calls: Mutex<Vec<ConfigSnapshot>>,
    delay: Mutex<Duration>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

pub struct MockBuilder<W> {
    state: Arc<MockState<W>>,
}

impl<W> Clone for MockBuilder<W> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<W: Worker> MockBuilder<W> {
    /// Builds workers with `factory` unless a scripted failure is pending.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&ConfigSnapshot) -> Result<W, BuildError> + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(MockState {
                factory: Box::new(factory),
                failures: Mutex::new(VecDeque::new()),
                calls: Mutex::new(Vec::new()),
                delay: Mutex::new(Duration::ZERO),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            }),
        }
    }

    /// The next build returns `error`. Calls queue up in order.
    pub fn fail_next(&self, error: BuildError) -> &Self {
        lock(&self.state.failures).push_back(error);
        self
    }

    /// Every build blocks for `delay` before producing its result.
    pub fn with_delay(self, delay: Duration) -> Self {
        *lock(&self.state.delay) = delay;
        self
    }

    pub fn calls(&self) -> Vec<ConfigSnapshot> {
        lock(&self.state.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.state.calls).len()
    }

    /// Highest number of builds that ran at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.state.max_active.load(Ordering::SeqCst)
    }
}

impl<W: Worker> WorkerBuilder for MockBuilder<W> {
    type Worker = W;

    fn build(&self, config: &ConfigSnapshot) -> Result<W, BuildError> {
        let state = &self.state;
        lock(&state.calls).push(config.clone());
        let running = state.active.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_active.fetch_max(running, Ordering::SeqCst);

        let delay = *lock(&state.delay);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let scripted = lock(&state.failures).pop_front();
        let outcome = match scripted {
            Some(error) => Err(error),
            None => (state.factory)(config),
        };
        state.active.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}
