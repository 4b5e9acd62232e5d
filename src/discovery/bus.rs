//! Event fan-out to membership observers
//!
//! Every observer gets its own bounded queue and worker task. Publishing
//! never waits: when an observer's queue is full the event is dropped for
//! that observer only. Errors and panics raised by an observer are caught in
//! its worker and logged.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};

use super::event::{MembershipEvent, MembershipObserver};
use crate::metrics;

/// Handle returned by [`EventBus::subscribe`]
pub type ObserverId = u64;

/// Default per-observer queue length
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

struct ObserverSlot {
    id: ObserverId,
    name: String,
    tx: mpsc::Sender<MembershipEvent>,
}

/// Fan-out of membership events to registered observers
pub struct EventBus {
    observers: RwLock<Vec<ObserverSlot>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl EventBus {
    /// Create a bus with the given per-observer queue capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Register an observer and spawn its worker
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe(&self, observer: Arc<dyn MembershipObserver>) -> ObserverId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = observer.name().to_string();
        let (tx, rx) = mpsc::channel(self.capacity);

        tokio::spawn(run_observer(observer, rx));

        tracing::debug!(observer = %name, id, "Observer subscribed");
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ObserverSlot { id, name, tx });
        id
    }

    /// Remove an observer; events already queued for it are still delivered
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|slot| slot.id != id);
        let removed = observers.len() != before;
        if removed {
            tracing::debug!(id, "Observer unsubscribed");
        }
        removed
    }

    /// Queue an event for every observer; returns how many accepted it
    pub fn publish(&self, event: &MembershipEvent) -> usize {
        let observers = self.observers.read().unwrap_or_else(PoisonError::into_inner);
        let mut delivered = 0;

        for slot in observers.iter() {
            match slot.tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        observer = %slot.name,
                        event = %event,
                        "Observer queue full, dropping event"
                    );
                    metrics::record_observer_dropped(&slot.name);
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::warn!(observer = %slot.name, "Observer worker has stopped");
                    metrics::record_observer_dropped(&slot.name);
                }
            }
        }

        delivered
    }

    /// Number of registered observers
    pub fn len(&self) -> usize {
        self.observers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn run_observer(
    observer: Arc<dyn MembershipObserver>,
    mut rx: mpsc::Receiver<MembershipEvent>,
) {
    while let Some(event) = rx.recv().await {
        let outcome = AssertUnwindSafe(observer.on_event(&event))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(
                    observer = observer.name(),
                    event = %event,
                    error = %e,
                    "Observer failed to handle event"
                );
                metrics::record_observer_failure(observer.name());
            }
            Err(panic) => {
                tracing::error!(
                    observer = observer.name(),
                    event = %event,
                    panic = %panic_message(panic.as_ref()),
                    "Observer panicked while handling event"
                );
                metrics::record_observer_failure(observer.name());
            }
        }
    }

    tracing::debug!(observer = observer.name(), "Observer worker exiting");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
