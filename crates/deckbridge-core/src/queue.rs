//! Mutex-guarded queue shared between a producer thread and a tick loop.
//!
//! Locking discipline: the lock is held only for a single `push` or a single
//! `drain`. No caller may perform I/O or take another lock while holding it,
//! so a driver callback or connection thread never waits on a render pass.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// FIFO filled by one side and drained wholesale by the other.
#[derive(Debug)]
pub struct EventQueue<T> {
    inner: Mutex<VecDeque<T>>,
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, item: T) {
        lock_unpoisoned(&self.inner).push_back(item);
    }

    /// Remove and return everything queued so far, oldest first.
    pub fn drain(&self) -> Vec<T> {
        lock_unpoisoned(&self.inner).drain(..).collect()
    }

    /// Drop everything queued so far, returning how many items were lost.
    pub fn clear(&self) -> usize {
        let mut inner = lock_unpoisoned(&self.inner);
        let dropped = inner.len();
        inner.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_drain_preserves_order() {
        let queue = EventQueue::new();
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.drain(), vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_clear_reports_count() {
        let queue = EventQueue::new();
        queue.push("a");
        queue.push("b");
        assert_eq!(queue.clear(), 2);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_concurrent_producers() {
        let queue = Arc::new(EventQueue::new());
        let workers: Vec<_> = (0..4)
            .map(|t| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..100 {
                        queue.push(t * 1000 + i);
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        let items = queue.drain();
        assert_eq!(items.len(), 400);
        // Each producer's items stay in its own order.
        for t in 0..4 {
            let mine: Vec<_> = items.iter().filter(|&&v| v / 1000 == t).collect();
            assert!(mine.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
