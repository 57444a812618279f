//! Bounded audio queue between the capture path and the recognizer.
//!
//! The capture side never waits: when the queue is full the oldest chunk is
//! discarded to make room. The forwarding task awaits chunks in order and
//! sees `None` once the conduit is closed and drained.

use std::sync::Arc;

use parking_lot::Mutex;
use ringbuf::{
    traits::{Consumer, Observer, RingBuffer},
    HeapRb,
};
use tokio::sync::Notify;

struct Queue {
    chunks: HeapRb<Vec<u8>>,
    closed: bool,
}

struct Inner {
    queue: Mutex<Queue>,
    notify: Notify,
}

/// Single-producer, single-consumer, drop-oldest chunk queue.
#[derive(Clone)]
pub struct AudioConduit {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for AudioConduit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queue = self.inner.queue.lock();
        f.debug_struct("AudioConduit")
            .field("len", &queue.chunks.occupied_len())
            .field("capacity", &queue.chunks.capacity())
            .field("closed", &queue.closed)
            .finish()
    }
}

/// Result of [`AudioConduit::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after discarding the oldest chunk.
    DroppedOldest,
    /// The conduit is closed; the chunk was discarded.
    Closed,
}

impl AudioConduit {
    pub fn bounded(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(Queue {
                    chunks: HeapRb::new(capacity.max(1)),
                    closed: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Enqueue without waiting.
    pub fn push(&self, chunk: Vec<u8>) -> PushOutcome {
        let outcome = {
            let mut queue = self.inner.queue.lock();
            if queue.closed {
                return PushOutcome::Closed;
            }
            match queue.chunks.push_overwrite(chunk) {
                Some(_evicted) => PushOutcome::DroppedOldest,
                None => PushOutcome::Queued,
            }
        };
        self.inner.notify.notify_one();
        outcome
    }

    /// Next chunk in order; `None` once closed and empty.
    pub async fn recv(&self) -> Option<Vec<u8>> {
        loop {
            let (next, closed) = {
                let mut queue = self.inner.queue.lock();
                (queue.chunks.try_pop(), queue.closed)
            };
            if next.is_some() || closed {
                return next;
            }
            self.inner.notify.notified().await;
        }
    }

    /// Stop accepting chunks and wake the consumer.
    pub fn close(&self) {
        self.inner.queue.lock().closed = true;
        self.inner.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.queue.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.queue.lock().chunks.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.queue.lock().chunks.capacity().get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_order() {
        let c = AudioConduit::bounded(4);
        c.push(vec![1]);
        c.push(vec![2]);
        assert_eq!(c.recv().await, Some(vec![1]));
        assert_eq!(c.recv().await, Some(vec![2]));
    }

    #[tokio::test]
    async fn overflow_drops_oldest() {
        let c = AudioConduit::bounded(2);
        assert_eq!(c.push(vec![1]), PushOutcome::Queued);
        assert_eq!(c.push(vec![2]), PushOutcome::Queued);
        assert_eq!(c.push(vec![3]), PushOutcome::DroppedOldest);
        assert_eq!(c.len(), 2);
        assert_eq!(c.capacity(), 2);
        assert_eq!(c.recv().await, Some(vec![2]));
        assert_eq!(c.recv().await, Some(vec![3]));
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let c = AudioConduit::bounded(4);
        c.push(vec![7]);
        c.close();
        assert_eq!(c.push(vec![8]), PushOutcome::Closed);
        assert_eq!(c.recv().await, Some(vec![7]));
        assert_eq!(c.recv().await, None);
    }

    #[tokio::test]
    async fn waiting_consumer_is_woken() {
        let c = AudioConduit::bounded(4);
        let consumer = {
            let c = c.clone();
            tokio::spawn(async move { c.recv().await })
        };
        tokio::task::yield_now().await;
        c.push(vec![42]);
        assert_eq!(consumer.await.unwrap(), Some(vec![42]));
    }
}
