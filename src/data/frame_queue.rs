//! Bounded, drop-oldest FIFO between the capture worker and the persistence writer.
//!
//! # Policy
//!
//! The queue favours fresh data over complete data. `push` never blocks and never
//! fails: when the queue is full the oldest sample is evicted to make room. A slow
//! disk therefore costs old frames, never capture continuity or unbounded memory.
//!
//! # Locking
//!
//! A single `parking_lot::Mutex` guards the `VecDeque`. It is held only while a
//! sample is moved in or out; encoding and disk I/O always happen on samples the
//! caller already owns. Consumers park on a `tokio::sync::Notify` and also select on
//! the run state, so a shutdown wakes every waiter even when nothing is pushed.

use crate::data::Sample;
use crate::run_state::RunState;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Bounded sample queue with drop-oldest overflow.
#[derive(Debug)]
pub struct FrameQueue {
    samples: Mutex<VecDeque<Sample>>,
    capacity: usize,
    not_empty: Notify,
    run_state: Arc<RunState>,
    evicted: AtomicU64,
}

impl FrameQueue {
    /// Capacity used by both daemons unless configured otherwise.
    pub const DEFAULT_CAPACITY: usize = 1000;

    /// Create a queue holding at most `capacity` samples (minimum one).
    pub fn new(capacity: usize, run_state: Arc<RunState>) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity.min(Self::DEFAULT_CAPACITY))),
            capacity,
            not_empty: Notify::new(),
            run_state,
            evicted: AtomicU64::new(0),
        }
    }

    /// Append a sample, evicting the oldest one if the queue is full.
    ///
    /// Returns `true` if a sample was evicted.
    pub fn push(&self, sample: Sample) -> bool {
        let evicted = {
            let mut samples = self.samples.lock();
            let evicted = if samples.len() >= self.capacity {
                samples.pop_front()
            } else {
                None
            };
            samples.push_back(sample);
            evicted
        };
        self.not_empty.notify_one();

        match evicted {
            Some(old) => {
                let total = self.evicted.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::trace!(
                    timestamp_ms = old.timestamp_ms,
                    total_evicted = total,
                    "Frame queue full; dropped oldest sample"
                );
                true
            }
            None => false,
        }
    }

    /// Take the oldest sample, waiting while the queue is empty and the run is active.
    ///
    /// Returns `None` once the run has stopped and the queue is drained. Samples
    /// buffered before the stop are still handed out.
    pub async fn pop(&self) -> Option<Sample> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            // Register interest before checking, so a push between the check and
            // the await is not missed.
            notified.as_mut().enable();

            let next = self.samples.lock().pop_front();
            if next.is_some() {
                return next;
            }
            if !self.run_state.is_running() {
                return None;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = self.run_state.stopped() => {}
            }
        }
    }

    /// Take the oldest sample without waiting.
    pub fn try_pop(&self) -> Option<Sample> {
        self.samples.lock().pop_front()
    }

    /// Wake every consumer currently parked in [`FrameQueue::pop`].
    pub fn wake_all(&self) {
        self.not_empty.notify_waiters();
    }

    /// Number of buffered samples.
    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    /// Whether no samples are buffered.
    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    /// Maximum number of buffered samples.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples discarded by overflow since the queue was created.
    pub fn evicted_count(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Modality;
    use crate::run_state::ShutdownReason;
    use image::{DynamicImage, GrayImage};
    use std::time::Duration;

    fn sample(ts: i64) -> Sample {
        Sample::new(
            Modality::Sonar,
            DynamicImage::ImageLuma8(GrayImage::new(2, 2)),
            ts,
        )
    }

    fn queue(capacity: usize) -> (Arc<RunState>, FrameQueue) {
        let state = Arc::new(RunState::new());
        let queue = FrameQueue::new(capacity, state.clone());
        (state, queue)
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let (_state, queue) = queue(3);
        for ts in 0..3 {
            assert!(!queue.push(sample(ts)));
        }
        assert!(queue.push(sample(3)));
        assert!(queue.push(sample(4)));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.evicted_count(), 2);
        let remaining: Vec<i64> = std::iter::from_fn(|| queue.try_pop())
            .map(|s| s.timestamp_ms)
            .collect();
        assert_eq!(remaining, vec![2, 3, 4]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let (_state, queue) = queue(0);
        assert_eq!(queue.capacity(), 1);
        queue.push(sample(1));
        queue.push(sample(2));
        assert_eq!(queue.try_pop().map(|s| s.timestamp_ms), Some(2));
    }

    #[tokio::test]
    async fn test_pop_drains_after_stop() {
        let (state, queue) = queue(10);
        queue.push(sample(7));
        queue.push(sample(8));
        state.request_stop(ShutdownReason::Interrupted);

        assert_eq!(queue.pop().await.map(|s| s.timestamp_ms), Some(7));
        assert_eq!(queue.pop().await.map(|s| s.timestamp_ms), Some(8));
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_blocked_pop_wakes_on_push() {
        let state = Arc::new(RunState::new());
        let queue = Arc::new(FrameQueue::new(4, state));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        queue.push(sample(42));
        let popped = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer should wake")
            .unwrap();
        assert_eq!(popped.map(|s| s.timestamp_ms), Some(42));
    }

    #[tokio::test]
    async fn test_blocked_pop_wakes_on_stop() {
        let state = Arc::new(RunState::new());
        let queue = Arc::new(FrameQueue::new(4, state.clone()));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        state.request_stop(ShutdownReason::ParentDisconnected);
        let popped = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer should wake on stop")
            .unwrap();
        assert!(popped.is_none());
    }
}
