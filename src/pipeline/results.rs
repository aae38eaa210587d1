//! Single-slot, latest-wins handoff from the capture thread to presentation

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tokio::sync::Notify;

use crate::classifier::Prediction;

#[derive(Default)]
struct Slot {
    latest: ArcSwapOption<Prediction>,
    /// Bumped after every store to `latest`
    version: AtomicU64,
    notify: Notify,
}

/// Coalescing result delivery.
///
/// Publishing never blocks and never queues: a newer prediction replaces one
/// that has not been observed yet. Cloning yields another handle to the same
/// slot.
#[derive(Clone, Default)]
pub struct ResultChannel {
    slot: Arc<Slot>,
}

impl ResultChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the pending prediction and wake any waiting feed.
    pub fn publish(&self, prediction: Prediction) {
        self.slot.latest.store(Some(Arc::new(prediction)));
        self.slot.version.fetch_add(1, Ordering::AcqRel);
        self.slot.notify.notify_waiters();
    }

    /// Take the pending prediction, leaving the slot empty.
    pub fn consume(&self) -> Option<Prediction> {
        self.slot
            .latest
            .swap(None)
            .map(|p| Arc::try_unwrap(p).unwrap_or_else(|shared| (*shared).clone()))
    }

    /// Look at the pending prediction without taking it.
    pub fn latest(&self) -> Option<Arc<Prediction>> {
        self.slot.latest.load_full()
    }

    /// An async view that yields each newest prediction once.
    pub fn subscribe(&self) -> ResultFeed {
        ResultFeed {
            slot: self.slot.clone(),
            seen: self.slot.version.load(Ordering::Acquire),
        }
    }
}

/// Presentation-side observer of a [`ResultChannel`].
///
/// Independent of [`ResultChannel::consume`]: a feed peeks at the slot and
/// tracks what it has already reported.
pub struct ResultFeed {
    slot: Arc<Slot>,
    seen: u64,
}

impl ResultFeed {
    /// Wait until something newer than the last observed prediction is
    /// published and return the most recent one.
    pub async fn changed(&mut self) -> Arc<Prediction> {
        loop {
            let notified = self.slot.notify.notified();
            let version = self.slot.version.load(Ordering::Acquire);
            if version != self.seen {
                if let Some(latest) = self.slot.latest.load_full() {
                    self.seen = version;
                    return latest;
                }
                // Consumed in between; wait for the next publish
                self.seen = version;
            }
            notified.await;
        }
    }

    /// The newest prediction if one arrived since the last call.
    pub fn try_changed(&mut self) -> Option<Arc<Prediction>> {
        let version = self.slot.version.load(Ordering::Acquire);
        if version == self.seen {
            return None;
        }
        self.seen = version;
        self.slot.latest.load_full()
    }
}
