//! The store: a single state tree, a bounded action queue, and the loop that
//! reduces actions and notifies subscribers.

use crate::action::Action;
use crate::reducer::reduce;
use crate::state::EngineState;
use crate::StoreError;
use parking_lot::{RwLock, RwLockReadGuard};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

/// Observer notified after every reduction.
///
/// `on_change` runs on the store loop. It must not block; long work belongs
/// in a spawned task that dispatches its outcome back as actions.
pub trait Subscriber: Send {
    fn name(&self) -> &str;

    fn on_change(&mut self, store: &Store);
}

struct Inner {
    state: RwLock<EngineState>,
    actions: mpsc::Sender<Action>,
    changes: watch::Sender<u64>,
}

/// Cheap, cloneable handle to the engine state.
///
/// Readers take a short-lived read guard; only the [`StoreLoop`] writes.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl Store {
    /// Create a store and the loop that drives it.
    ///
    /// `capacity` bounds the number of queued, not yet reduced actions.
    pub fn new(state: EngineState, capacity: usize) -> (Store, StoreLoop) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (changes, _) = watch::channel(0);
        let store = Store {
            inner: Arc::new(Inner {
                state: RwLock::new(state),
                actions: tx,
                changes,
            }),
        };
        let store_loop = StoreLoop {
            store: store.clone(),
            actions: rx,
            subscribers: Vec::new(),
            generation: 0,
        };
        (store, store_loop)
    }

    /// Enqueue an action, waiting while the queue is full.
    pub async fn dispatch(&self, action: Action) -> Result<(), StoreError> {
        self.inner
            .actions
            .send(action)
            .await
            .map_err(|_| StoreError::Closed)
    }

    /// Enqueue an action without waiting.
    pub fn try_dispatch(&self, action: Action) -> Result<(), StoreError> {
        self.inner.actions.try_send(action).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => StoreError::Full,
            mpsc::error::TrySendError::Closed(_) => StoreError::Closed,
        })
    }

    /// Read access to the current state.
    ///
    /// Reductions wait while the guard is alive, so drop it quickly.
    pub fn read_state(&self) -> RwLockReadGuard<'_, EngineState> {
        self.inner.state.read()
    }

    /// Owned copy of the current state.
    pub fn snapshot(&self) -> EngineState {
        self.inner.state.read().clone()
    }

    /// Receiver of the reduction generation, bumped after every action.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.changes.subscribe()
    }
}

/// Owns the receiving end of the action queue and the subscribers.
pub struct StoreLoop {
    store: Store,
    actions: mpsc::Receiver<Action>,
    subscribers: Vec<Box<dyn Subscriber>>,
    generation: u64,
}

impl StoreLoop {
    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn add_subscriber(&mut self, subscriber: Box<dyn Subscriber>) {
        debug!("registered subscriber '{}'", subscriber.name());
        self.subscribers.push(subscriber);
    }

    /// Reduce actions one at a time, in arrival order, until cancelled.
    ///
    /// Returns an error only when a reduction breaks a state invariant.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), StoreError> {
        info!("store loop started with {} subscriber(s)", self.subscribers.len());
        loop {
            let action = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                action = self.actions.recv() => match action {
                    Some(action) => action,
                    None => break,
                },
            };
            self.apply(&action)?;
            self.notify();
        }
        info!("store loop stopped after {} action(s)", self.generation);
        Ok(())
    }

    fn apply(&mut self, action: &Action) -> Result<(), StoreError> {
        trace!(action = action.kind(), "reducing");
        let mut state = self.store.inner.state.write();
        if let Err(e) = reduce(&mut state, action).and_then(|()| state.check_invariants()) {
            error!("reducing {} failed: {e}", action.kind());
            return Err(e);
        }
        Ok(())
    }

    fn notify(&mut self) {
        self.generation += 1;
        self.store.inner.changes.send_replace(self.generation);

        let store = &self.store;
        for subscriber in &mut self.subscribers {
            let outcome = catch_unwind(AssertUnwindSafe(|| subscriber.on_change(store)));
            if let Err(payload) = outcome {
                error!(
                    "subscriber '{}' panicked: {}",
                    subscriber.name(),
                    panic_message(payload.as_ref())
                );
            }
        }
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
