use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};

use tokio::sync::mpsc;
use tracing::warn;

use crate::reconcile::SyncUpdate;

/// Fan-out point between the sync loop and its consumers.
///
/// Each subscriber gets an independent bounded queue and progresses at its
/// own pace. Publishing never blocks: when a subscriber's queue is full the
/// update is dropped for that subscriber and counted, so a slow or absent
/// consumer can never stall ingestion.
#[derive(Debug, Clone)]
pub struct SubscriptionHub {
    inner: Arc<HubInner>,
}

#[derive(Debug)]
struct HubInner {
    capacity: usize,
    next_id: AtomicU64,
    dropped: AtomicU64,
    slots: Mutex<Vec<SubscriberSlot>>,
}

#[derive(Debug)]
struct SubscriberSlot {
    id: u64,
    tx: mpsc::Sender<SyncUpdate>,
}

impl SubscriptionHub {
    /// Create a hub whose subscriber queues hold up to `capacity` updates.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                capacity: capacity.max(1),
                next_id: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                slots: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a new subscriber. The returned handle only observes
    /// updates published after this call.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock_slots().push(SubscriberSlot { id, tx });
        Subscription { id, rx }
    }

    /// Deliver updates to every live subscriber without blocking.
    ///
    /// Dropped subscribers are pruned; full queues lose the update for
    /// that subscriber only, with a recorded diagnostic.
    pub fn publish(&self, updates: &[SyncUpdate]) {
        if updates.is_empty() {
            return;
        }

        let mut slots = self.lock_slots();
        slots.retain(|slot| !slot.tx.is_closed());
        for update in updates {
            for slot in slots.iter() {
                match slot.tx.try_send(update.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            subscriber = slot.id,
                            "subscriber queue full, dropping sync update"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {}
                }
            }
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        let mut slots = self.lock_slots();
        slots.retain(|slot| !slot.tx.is_closed());
        slots.len()
    }

    /// Total updates dropped across all subscribers since creation.
    pub fn dropped_updates(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, Vec<SubscriberSlot>> {
        self.inner
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A subscriber's lazy pull handle over its own bounded queue.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<SyncUpdate>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next update. `None` once the hub is gone and the
    /// queue has drained.
    pub async fn recv(&mut self) -> Option<SyncUpdate> {
        self.rx.recv().await
    }

    /// Non-blocking poll of the queue.
    pub fn try_recv(&mut self) -> Option<SyncUpdate> {
        self.rx.try_recv().ok()
    }
}
