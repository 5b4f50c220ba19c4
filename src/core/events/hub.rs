use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;
use tracing::trace;

/// Per-subscriber queue depth. A subscriber that falls this far behind
/// starts losing events instead of slowing the producer down.
pub const DEFAULT_SUBSCRIBER_BACKLOG: usize = 256;

type Registry<T> = Mutex<HashMap<u64, mpsc::Sender<T>>>;

/// Publish/subscribe registry.
///
/// `publish` never awaits: every subscriber gets a `try_send`, so a slow or
/// dead connection cannot stall log capture or telemetry. Registrations are
/// owned by the returned [`Subscription`] and removed when it is dropped.
pub struct Hub<T> {
    registry: Arc<Registry<T>>,
    next_id: Arc<AtomicU64>,
    backlog: usize,
}

impl<T> Clone for Hub<T> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            next_id: self.next_id.clone(),
            backlog: self.backlog,
        }
    }
}

impl<T: Clone + Send + 'static> Default for Hub<T> {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BACKLOG)
    }
}

impl<T: Clone + Send + 'static> Hub<T> {
    pub fn new(backlog: usize) -> Self {
        Self {
            registry: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            backlog: backlog.max(1),
        }
    }

    pub fn subscribe(&self) -> Subscription<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.backlog);
        lock(&self.registry).insert(id, tx);

        Subscription {
            id,
            receiver: rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Best-effort fan-out. Returns how many subscribers accepted the item.
    pub fn publish(&self, item: T) -> usize {
        let mut registry = lock(&self.registry);
        let mut delivered = 0;

        registry.retain(|id, tx| match tx.try_send(item.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!("Subscriber {} lagging, event dropped", id);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).len()
    }
}

/// Live registration in a [`Hub`]. Dropping it deregisters.
pub struct Subscription<T> {
    id: u64,
    receiver: mpsc::Receiver<T>,
    registry: Weak<Registry<T>>,
}

impl<T> Subscription<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).remove(&self.id);
        }
    }
}

fn lock<T>(registry: &Registry<T>) -> std::sync::MutexGuard<'_, HashMap<u64, mpsc::Sender<T>>> {
    registry
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
