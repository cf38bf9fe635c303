//! Bounded concurrent queue
//!
//! Thread-safe double-ended list of owned payloads, used to hand blocks from
//! a stream worker to the application (and back). Pairing the ends selects
//! the discipline:
//!
//! | Push | Pop | Behaviour |
//! |------|-----|-----------|
//! | head | tail | FIFO |
//! | tail | head | FIFO |
//! | head | head | LIFO |
//! | tail | tail | LIFO |
//!
//! Pops never block; an empty queue reports `Empty`.

use crate::error::{Result, SmiError};
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Thread-safe double-ended queue with an optional capacity
#[derive(Debug)]
pub struct BlockQueue<T = Bytes> {
    items: Mutex<VecDeque<T>>,
    capacity: Option<usize>,
    dropped: AtomicU64,
}

impl<T> Default for BlockQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BlockQueue<T> {
    /// Unbounded queue
    pub const fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity: None,
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue refusing pushes beyond `capacity` items
    pub const fn bounded(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity: Some(capacity),
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit(&self, items: &mut VecDeque<T>) -> Result<()> {
        let full = self.capacity.is_some_and(|cap| items.len() >= cap);
        if full || items.try_reserve(1).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(SmiError::out_of_memory(format!(
                "queue holds {} items (capacity {:?})",
                items.len(),
                self.capacity
            )));
        }
        Ok(())
    }

    /// Insert at the head
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the queue is full or cannot grow; the item is
    /// dropped and counted.
    pub fn push_head(&self, item: T) -> Result<()> {
        let mut items = self.lock();
        self.admit(&mut items)?;
        items.push_front(item);
        Ok(())
    }

    /// Insert at the tail
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the queue is full or cannot grow; the item is
    /// dropped and counted.
    pub fn push_tail(&self, item: T) -> Result<()> {
        let mut items = self.lock();
        self.admit(&mut items)?;
        items.push_back(item);
        Ok(())
    }

    /// Remove from the head
    ///
    /// # Errors
    ///
    /// Returns `Empty` if there is nothing to remove.
    pub fn pop_head(&self) -> Result<T> {
        self.lock().pop_front().ok_or(SmiError::Empty)
    }

    /// Remove from the tail
    ///
    /// # Errors
    ///
    /// Returns `Empty` if there is nothing to remove.
    pub fn pop_tail(&self) -> Result<T> {
        self.lock().pop_back().ok_or(SmiError::Empty)
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Capacity bound, if any
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Drop every queued item
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Items refused since creation or the last [`reset_dropped`](Self::reset_dropped)
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Reset the refused-item counter, returning its previous value
    pub fn reset_dropped(&self) -> u64 {
        self.dropped.swap(0, Ordering::Relaxed)
    }
}

impl<T: Clone> BlockQueue<T> {
    /// Copy of the head item
    pub fn peek_head(&self) -> Option<T> {
        self.lock().front().cloned()
    }

    /// Copy of the tail item
    pub fn peek_tail(&self) -> Option<T> {
        self.lock().back().cloned()
    }
}

impl<T: AsRef<[u8]>> BlockQueue<T> {
    /// Log every item's length, head first (debug aid)
    pub fn dump(&self) {
        let items = self.lock();
        tracing::debug!("Queue: {} items, {} dropped", items.len(), self.dropped());
        for (i, item) in items.iter().enumerate() {
            tracing::debug!("  [{i}] {} bytes", item.as_ref().len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn drain(queue: &BlockQueue<&'static str>, pop: fn(&BlockQueue<&'static str>) -> Result<&'static str>) -> Vec<&'static str> {
        std::iter::from_fn(|| pop(queue).ok()).collect()
    }

    #[test]
    fn head_in_tail_out_is_fifo() {
        let queue = BlockQueue::new();
        for item in ["a", "b", "c"] {
            queue.push_head(item).unwrap();
        }
        assert_eq!(drain(&queue, BlockQueue::pop_tail), ["a", "b", "c"]);
    }

    #[test]
    fn head_in_head_out_is_lifo() {
        let queue = BlockQueue::new();
        for item in ["a", "b", "c"] {
            queue.push_head(item).unwrap();
        }
        assert_eq!(drain(&queue, BlockQueue::pop_head), ["c", "b", "a"]);
    }

    #[test]
    fn tail_in_head_out_is_fifo() {
        let queue = BlockQueue::new();
        for item in ["a", "b", "c"] {
            queue.push_tail(item).unwrap();
        }
        assert_eq!(drain(&queue, BlockQueue::pop_head), ["a", "b", "c"]);
    }

    #[test]
    fn empty_pop_fails() {
        let queue: BlockQueue = BlockQueue::new();
        assert!(matches!(queue.pop_head(), Err(SmiError::Empty)));
        assert!(matches!(queue.pop_tail(), Err(SmiError::Empty)));
    }

    #[test]
    fn bounded_queue_counts_refusals() {
        let queue = BlockQueue::bounded(2);
        queue.push_tail(Bytes::from_static(b"one")).unwrap();
        queue.push_tail(Bytes::from_static(b"two")).unwrap();
        assert!(matches!(
            queue.push_head(Bytes::from_static(b"three")),
            Err(SmiError::OutOfMemory { .. })
        ));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.reset_dropped(), 1);
        assert_eq!(queue.dropped(), 0);

        queue.dump();
        assert_eq!(queue.peek_head().unwrap(), Bytes::from_static(b"one"));
        assert_eq!(queue.peek_tail().unwrap(), Bytes::from_static(b"two"));
        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn concurrent_producers_lose_nothing() {
        let queue = Arc::new(BlockQueue::<u32>::new());
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        queue.push_tail(p * 1000 + i).unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let mut seen: Vec<u32> = std::iter::from_fn(|| queue.pop_head().ok()).collect();
        assert_eq!(seen.len(), 1000);
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 1000);
    }
}
