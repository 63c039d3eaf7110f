//! Distribution of units across a fixed set of executors

use std::sync::atomic::{AtomicUsize, Ordering};

/// Lock-free work queue distributing items to workers.
///
/// Workers call [`next()`](WorkQueue::next) to atomically claim the next item.
pub struct WorkQueue<S> {
    items: Vec<S>,
    cursor: AtomicUsize,
}

impl<S> WorkQueue<S> {
    /// Create queue over all items
    pub fn new(items: Vec<S>) -> Self {
        Self {
            items,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Get next item to process (lock-free)
    pub fn next(&self) -> Option<&S> {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.items.get(i)
    }
}

/// Static round-robin assignment: item `i` goes to lane `i % lanes`.
///
/// Each lane keeps the original relative order of its items, so a lane run
/// sequentially processes its items in ascending order.
pub fn round_robin<S>(items: Vec<S>, lanes: usize) -> Vec<Vec<S>> {
    let lanes = lanes.max(1);
    let mut out: Vec<Vec<S>> = (0..lanes).map(|_| Vec::new()).collect();
    for (i, item) in items.into_iter().enumerate() {
        out[i % lanes].push(item);
    }
    out
}
