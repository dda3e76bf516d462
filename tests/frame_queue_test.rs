//! Ordering and overflow properties of the frame queue.

use capture_daemon::data::{FrameQueue, Modality, Sample};
use capture_daemon::run_state::{RunState, ShutdownReason};
use image::{DynamicImage, GrayImage};
use std::sync::Arc;
use std::time::Duration;

fn sample(ts: i64) -> Sample {
    Sample::new(Modality::Camera, DynamicImage::ImageLuma8(GrayImage::new(1, 1)), ts)
}

#[test]
fn test_overflow_keeps_newest_k_in_order() {
    for (pushes, capacity) in [(10usize, 3usize), (1001, 1000), (50, 1)] {
        let queue = FrameQueue::new(capacity, Arc::new(RunState::new()));
        for ts in 0..pushes {
            queue.push(sample(ts as i64));
        }

        assert_eq!(queue.len(), capacity);
        assert_eq!(queue.evicted_count(), (pushes - capacity) as u64);
        let kept: Vec<i64> = std::iter::from_fn(|| queue.try_pop()).map(|s| s.timestamp_ms).collect();
        let expected: Vec<i64> = ((pushes - capacity)..pushes).map(|t| t as i64).collect();
        assert_eq!(kept, expected);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_push_pop_preserves_order() {
    const TOTAL: i64 = 5_000;
    let state = Arc::new(RunState::new());
    let queue = Arc::new(FrameQueue::new(64, state.clone()));

    let consumer = {
        let queue = queue.clone();
        tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(s) = queue.pop().await {
                seen.push(s.timestamp_ms);
                if seen.len() % 97 == 0 {
                    tokio::task::yield_now().await;
                }
            }
            seen
        })
    };

    for ts in 0..TOTAL {
        queue.push(sample(ts));
        if ts % 500 == 0 {
            tokio::task::yield_now().await;
        }
    }
    state.request_stop(ShutdownReason::EndOfStream);

    let seen = tokio::time::timeout(Duration::from_secs(5), consumer)
        .await
        .expect("consumer must finish after stop")
        .unwrap();

    assert!(seen.windows(2).all(|w| w[0] < w[1]), "dequeued out of order");
    assert_eq!(seen.len() as u64 + queue.evicted_count(), TOTAL as u64);
    assert_eq!(seen.last(), Some(&(TOTAL - 1)));
}

#[tokio::test]
async fn test_stop_wakes_every_waiter() {
    let state = Arc::new(RunState::new());
    let queue = Arc::new(FrameQueue::new(8, state.clone()));

    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await.is_none() })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(state.request_stop(ShutdownReason::Interrupted));
    for waiter in waiters {
        let woke_empty = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter must wake")
            .unwrap();
        assert!(woke_empty);
    }
}
