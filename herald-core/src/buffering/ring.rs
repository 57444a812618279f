//! Pre-roll ring buffer holding the most recent canonical audio.
//!
//! One writer (the capture path) and any number of readers (wake checks,
//! pre-roll replay). Every operation takes a short `parking_lot::Mutex`
//! critical section around a `ringbuf::HeapRb<u8>`; reads copy out and
//! never consume.

use parking_lot::Mutex;
use ringbuf::{
    traits::{Consumer, Observer, Producer},
    HeapRb,
};

use crate::audio::CANONICAL_BYTES_PER_SEC;

/// Smallest possible buffer: one 16-bit sample.
const MIN_CAPACITY_BYTES: usize = 2;

/// Fixed-capacity circular store of the last N milliseconds of audio.
pub struct RingBuffer {
    inner: Mutex<HeapRb<u8>>,
    capacity: usize,
}

impl RingBuffer {
    /// Create a buffer able to hold `capacity_ms` of canonical audio.
    ///
    /// Capacity is rounded up to an even byte count and never drops below
    /// one sample.
    pub fn new(capacity_ms: u64) -> Self {
        let mut capacity = bytes_for_ms(capacity_ms).max(MIN_CAPACITY_BYTES);
        if capacity % 2 == 1 {
            capacity += 1;
        }
        Self {
            inner: Mutex::new(HeapRb::new(capacity)),
            capacity,
        }
    }

    /// Append bytes, overwriting the oldest content once full.
    ///
    /// When `data` alone exceeds capacity only its trailing `capacity` bytes
    /// are written.
    pub fn add(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let tail = &data[data.len().saturating_sub(self.capacity)..];

        let mut rb = self.inner.lock();
        let overflow = (rb.occupied_len() + tail.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            rb.skip(overflow);
        }
        let written = rb.push_slice(tail);
        debug_assert_eq!(written, tail.len());
    }

    /// Copy out the most recent `ms` milliseconds.
    ///
    /// The request is rounded down to whole samples and clamped to what is
    /// stored. Zero or negative durations yield an empty vector.
    pub fn get_last(&self, ms: i64) -> Vec<u8> {
        if ms <= 0 {
            return Vec::new();
        }
        let mut requested = bytes_for_ms(ms as u64);
        requested -= requested % 2;
        if requested == 0 {
            return Vec::new();
        }

        let rb = self.inner.lock();
        let take = requested.min(rb.occupied_len());
        if take == 0 {
            return Vec::new();
        }

        let (head, tail) = rb.as_slices();
        let mut out = Vec::with_capacity(take);
        if tail.len() >= take {
            out.extend_from_slice(&tail[tail.len() - take..]);
        } else {
            let from_head = take - tail.len();
            out.extend_from_slice(&head[head.len() - from_head..]);
            out.extend_from_slice(tail);
        }
        out
    }

    /// Drop all stored audio. The allocation is kept.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Capacity in bytes, fixed at construction.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently stored.
    pub fn len(&self) -> usize {
        self.inner.lock().occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

fn bytes_for_ms(ms: u64) -> usize {
    (ms.saturating_mul(CANONICAL_BYTES_PER_SEC as u64) / 1000) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// 100 ms → 3200 bytes.
    fn small() -> RingBuffer {
        RingBuffer::new(100)
    }

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed)).collect()
    }

    #[test]
    fn capacity_follows_canonical_byte_rate() {
        assert_eq!(RingBuffer::new(1000).capacity(), 32_000);
        assert_eq!(RingBuffer::new(2500).capacity(), 80_000);
        assert_eq!(RingBuffer::new(0).capacity(), 2);
    }

    #[test]
    fn under_capacity_returns_concatenation() {
        let rb = small();
        let a = pattern(1000, 1);
        let b = pattern(600, 50);
        rb.add(&a);
        rb.add(&b);

        let mut expected = a.clone();
        expected.extend_from_slice(&b);
        assert_eq!(rb.get_last(i64::MAX / 64), expected);
    }

    #[test]
    fn over_capacity_matches_reference_window() {
        let rb = small();
        let cap = rb.capacity();
        let mut reference: VecDeque<u8> = VecDeque::new();

        for (i, len) in [700usize, 1300, 2900, 10, 4100, 333, 1800].iter().enumerate() {
            let data = pattern(*len, i as u8);
            rb.add(&data);
            reference.extend(data.iter().copied());
            while reference.len() > cap {
                reference.pop_front();
            }
            let expected: Vec<u8> = reference.iter().copied().collect();
            assert_eq!(rb.get_last(1_000_000), expected, "after write #{i}");
        }
    }

    #[test]
    fn oversized_write_keeps_trailing_bytes() {
        let rb = small();
        let data = pattern(10_000, 9);
        rb.add(&data);
        assert_eq!(rb.get_last(1_000), data[data.len() - rb.capacity()..].to_vec());
    }

    #[test]
    fn zero_and_negative_durations_are_empty() {
        let rb = small();
        rb.add(&pattern(500, 3));
        assert!(rb.get_last(0).is_empty());
        assert!(rb.get_last(-20).is_empty());
    }

    #[test]
    fn get_last_returns_only_requested_tail() {
        let rb = small();
        let data = pattern(3000, 4);
        rb.add(&data);
        // 10 ms = 320 bytes
        assert_eq!(rb.get_last(10), data[data.len() - 320..].to_vec());
    }

    #[test]
    fn get_last_is_a_copy() {
        let rb = small();
        rb.add(&[1, 2, 3, 4]);
        let mut out = rb.get_last(50);
        out[0] = 99;
        assert_eq!(rb.get_last(50), vec![1, 2, 3, 4]);
    }

    #[test]
    fn clear_keeps_capacity() {
        let rb = small();
        rb.add(&pattern(2000, 0));
        rb.clear();
        assert!(rb.is_empty());
        assert!(rb.get_last(100).is_empty());
        assert_eq!(rb.capacity(), 3200);
        rb.add(&[5, 6]);
        assert_eq!(rb.get_last(100), vec![5, 6]);
    }

    #[test]
    fn concurrent_readers_see_consistent_lengths() {
        use std::sync::Arc;
        use std::thread;

        let rb = Arc::new(small());
        let writer = {
            let rb = Arc::clone(&rb);
            thread::spawn(move || {
                for i in 0..500u32 {
                    rb.add(&pattern(64, i as u8));
                }
            })
        };
        let readers: Vec<_> = (0..3)
            .map(|_| {
                let rb = Arc::clone(&rb);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let out = rb.get_last(100);
                        assert!(out.len() <= 3200);
                        assert_eq!(out.len() % 2, 0);
                    }
                })
            })
            .collect();

        writer.join().expect("writer panicked");
        for r in readers {
            r.join().expect("reader panicked");
        }
        assert_eq!(rb.len(), 3200);
    }
}
