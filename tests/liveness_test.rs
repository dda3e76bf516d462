//! Parent-disconnect detection and console commands through a full pipeline.

mod common;

use capture_daemon::data::Modality;
use capture_daemon::lifecycle::{LifecycleController, LifecyclePlan, PowerOffOutcome, RetryPolicy};
use capture_daemon::pipeline::Pipeline;
use capture_daemon::run_state::ShutdownReason;
use common::{AfterFrames, CountingDevice, RecordingArtifacts, ScriptedSource};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};

fn silent_pipeline(device: Arc<CountingDevice>) -> Pipeline {
    let lifecycle = LifecycleController::new(
        device,
        LifecyclePlan {
            stream_mode: "rtsp".to_string(),
            range_m: 3.0,
        },
        RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(10),
        },
    );
    Pipeline::builder(Modality::Sonar)
        .queue_capacity(16)
        .source(Box::new(ScriptedSource::new(
            3,
            Duration::from_millis(10),
            AfterFrames::Silence,
        )))
        .artifacts(Box::new(RecordingArtifacts::default()))
        .lifecycle(lifecycle)
        .settings(common::settings(Duration::from_secs(30)))
        .graceful_timeout(Duration::from_secs(2))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_parent_disconnect_shuts_down_cleanly() {
    let device = Arc::new(CountingDevice::default());
    let pipeline = silent_pipeline(device.clone());
    let ctx = pipeline.context();

    let (parent, child) = tokio::io::duplex(64);
    let run = tokio::spawn(pipeline.run(BufReader::new(child)));

    // A consumer parked on the empty queue must be released by the shutdown.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let extra_waiter = {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            while ctx.queue.pop().await.is_some() {}
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    drop(parent);
    let summary = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("pipeline must stop after parent disconnect")
        .unwrap();

    assert_eq!(summary.reason, ShutdownReason::ParentDisconnected);
    assert_eq!(summary.exit_code(), 0);
    assert!(!summary.forced);
    assert_eq!(summary.power_off, PowerOffOutcome::Confirmed { attempts: 1 });
    assert_eq!(device.off_calls.load(Ordering::SeqCst), 1);

    tokio::time::timeout(Duration::from_secs(1), extra_waiter)
        .await
        .expect("queue waiter must wake")
        .unwrap();
}

#[tokio::test]
async fn test_range_command_reaches_device() {
    let device = Arc::new(CountingDevice::default());
    let pipeline = silent_pipeline(device.clone());

    let (mut parent, child) = tokio::io::duplex(64);
    let run = tokio::spawn(pipeline.run(BufReader::new(child)));

    tokio::time::sleep(Duration::from_millis(50)).await;
    parent.write_all(b"hello\nRANGE 5.5\n").await.unwrap();
    parent.flush().await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !device.power_on.lock().contains(&5.5) {
        assert!(tokio::time::Instant::now() < deadline, "range never applied");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    drop(parent);
    let summary = tokio::time::timeout(Duration::from_secs(5), run).await.unwrap().unwrap();
    assert_eq!(summary.reason, ShutdownReason::ParentDisconnected);
    // Power-on at start with the configured range, then the commanded one.
    assert_eq!(*device.power_on.lock(), vec![3.0, 5.5]);
    assert_eq!(device.off_calls.load(Ordering::SeqCst), 1);
}
