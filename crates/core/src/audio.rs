//! Audio ingestion queue
//!
//! Bounded, lossy FIFO decoupling the rate audio chunks arrive from the
//! network from the rate the transcription relay can forward them. Pushing
//! into a full queue evicts the oldest unconsumed chunk: recognition
//! tolerates a small gap better than ever-growing latency, so the bias is
//! toward freshness. This is the sole backpressure point between network
//! ingress and the transcription provider.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Default queue capacity in chunks.
pub const DEFAULT_CAPACITY: usize = 50;

/// Bounded lossy queue of raw audio chunks.
pub struct AudioQueue {
    inner: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
    capacity: usize,
    evicted: AtomicU64,
}

impl AudioQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            evicted: AtomicU64::new(0),
        }
    }

    /// Push a chunk without blocking. If the queue is full the oldest chunk
    /// is evicted to make room; returns `true` when an eviction happened.
    pub fn push(&self, chunk: Vec<u8>) -> bool {
        let evicted = {
            let mut queue = self.inner.lock();
            let evicted = if queue.len() >= self.capacity {
                queue.pop_front();
                true
            } else {
                false
            };
            queue.push_back(chunk);
            evicted
        };

        if evicted {
            let total = self.evicted.fetch_add(1, Ordering::Relaxed) + 1;
            if total % 50 == 1 {
                tracing::debug!(total_evicted = total, "audio queue full, evicting oldest chunk");
            }
        }

        self.notify.notify_one();
        evicted
    }

    /// Pop the oldest chunk, waiting until one is available.
    pub async fn pop(&self) -> Vec<u8> {
        loop {
            // Register interest before checking, so a push between the check
            // and the await cannot be missed.
            let notified = self.notify.notified();
            if let Some(chunk) = self.inner.lock().pop_front() {
                return chunk;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total chunks evicted since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for AudioQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_push_never_grows_past_capacity() {
        let queue = AudioQueue::new(5);
        for i in 0..20u8 {
            queue.push(vec![i]);
        }
        assert_eq!(queue.len(), 5);
        assert_eq!(queue.evicted(), 15);
    }

    #[test]
    fn test_newest_chunk_retained_when_full() {
        let queue = AudioQueue::new(3);
        for i in 0..10u8 {
            queue.push(vec![i]);
        }
        let contents: Vec<u8> = {
            let inner = queue.inner.lock();
            inner.iter().map(|c| c[0]).collect()
        };
        assert_eq!(contents, vec![7, 8, 9]);
    }

    #[tokio::test]
    async fn test_pop_returns_in_fifo_order() {
        let queue = AudioQueue::new(10);
        queue.push(vec![1]);
        queue.push(vec![2]);
        assert_eq!(queue.pop().await, vec![1]);
        assert_eq!(queue.pop().await, vec![2]);
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(AudioQueue::new(10));
        let popper = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!popper.is_finished());

        queue.push(vec![42]);
        let chunk = tokio::time::timeout(Duration::from_secs(1), popper)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(chunk, vec![42]);
    }
}
