//! Work queue shared by all workers
//!
//! An unbounded FIFO of `(index, item)` pairs that were not bypassed at
//! startup. Dequeuing never blocks: an empty queue tells a worker to exit.
//!
//! Every dequeued index is also recorded as *claimed* until the worker
//! releases it after writing an outcome. Claims that are never released
//! belong to workers that died mid-item.

use crate::item::Item;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

/// An item waiting in the queue
#[derive(Debug)]
pub struct QueuedItem<P> {
    /// Slot in the result store
    pub index: usize,

    /// Shared item
    pub item: Arc<Item<P>>,
}

impl<P> Clone for QueuedItem<P> {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            item: Arc::clone(&self.item),
        }
    }
}

/// FIFO of pending items with in-flight tracking
pub struct WorkQueue<P> {
    sender: Sender<QueuedItem<P>>,
    receiver: Receiver<QueuedItem<P>>,
    claimed: Arc<Mutex<BTreeSet<usize>>>,
}

impl<P> Clone for WorkQueue<P> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            claimed: Arc::clone(&self.claimed),
        }
    }
}

impl<P> Default for WorkQueue<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> WorkQueue<P> {
    /// Create an empty queue
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();

        Self {
            sender,
            receiver,
            claimed: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    /// Append an item
    pub fn push(&self, item: Arc<Item<P>>) {
        let queued = QueuedItem {
            index: item.index,
            item,
        };
        // Both ends live in `self`, so the channel cannot be disconnected.
        let _ = self.sender.send(queued);
    }

    /// Take the next item without blocking, claiming its index
    pub fn pop(&self) -> Option<QueuedItem<P>> {
        let queued = self.receiver.try_recv().ok()?;
        self.claimed.lock().insert(queued.index);
        Some(queued)
    }

    /// Release the claim on `index` once its outcome is recorded
    pub fn release(&self, index: usize) {
        self.claimed.lock().remove(&index);
    }

    /// Indices dequeued but never released, in ascending order
    pub fn claimed(&self) -> Vec<usize> {
        self.claimed.lock().iter().copied().collect()
    }

    /// Get current queue length
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Collection;

    #[test]
    fn test_queue_fifo() {
        let collection = Collection::from_names(["a", "b", "c"]).unwrap();
        let queue = WorkQueue::new();
        for item in &collection {
            queue.push(Arc::clone(item));
        }

        assert_eq!(queue.len(), 3);
        let order: Vec<_> = std::iter::from_fn(|| queue.pop()).map(|q| q.item.name.clone()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert!(queue.is_empty());
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_claims() {
        let collection = Collection::from_names(["a", "b"]).unwrap();
        let queue = WorkQueue::new();
        for item in &collection {
            queue.push(Arc::clone(item));
        }

        let first = queue.pop().unwrap();
        let second = queue.pop().unwrap();
        assert_eq!(queue.claimed(), vec![0, 1]);

        queue.release(first.index);
        assert_eq!(queue.claimed(), vec![second.index]);

        // Releasing twice is harmless
        queue.release(first.index);
        assert_eq!(queue.claimed(), vec![second.index]);
    }

    #[test]
    fn test_clones_share_state() {
        let collection = Collection::from_names(["a", "b"]).unwrap();
        let queue = WorkQueue::new();
        let worker_view = queue.clone();

        for item in &collection {
            queue.push(Arc::clone(item));
        }
        let popped = worker_view.pop().unwrap();

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.claimed(), vec![popped.index]);
    }
}
