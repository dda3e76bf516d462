//! Process-wide "keep running" flag.
//!
//! `RunState` starts out running and flips to stopped exactly once. The first
//! caller of [`RunState::request_stop`] wins and records why the run ended; every
//! later call is a no-op. Anything that waits (the frame queue, the capture loop,
//! the liveness monitor) selects on [`RunState::stopped`] so it is woken the
//! moment the flag flips.

use crate::error::CaptureError;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use tokio::sync::watch;

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownReason {
    /// SIGINT / SIGTERM / Ctrl-C.
    Interrupted,
    /// The supervising console closed the liveness channel.
    ParentDisconnected,
    /// No frame was read for longer than the freeze threshold.
    StreamFrozen,
    /// The capture source could not be opened or its worker died.
    SourceFailed,
    /// A finite source ran out of frames.
    EndOfStream,
}

impl ShutdownReason {
    /// Whether the run ended because the sensor stream failed.
    pub fn is_failure(self) -> bool {
        matches!(self, ShutdownReason::StreamFrozen | ShutdownReason::SourceFailed)
    }

    /// Shutdown reason for a fatal error, `None` for errors a worker absorbs.
    pub fn for_error(err: &CaptureError) -> Option<Self> {
        if !err.is_fatal() {
            return None;
        }
        match err {
            CaptureError::StreamFrozen(_) => Some(ShutdownReason::StreamFrozen),
            _ => Some(ShutdownReason::SourceFailed),
        }
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ShutdownReason::Interrupted => "operator interrupt",
            ShutdownReason::ParentDisconnected => "parent process disconnected",
            ShutdownReason::StreamFrozen => "stream frozen",
            ShutdownReason::SourceFailed => "capture source failed",
            ShutdownReason::EndOfStream => "end of stream",
        };
        f.write_str(text)
    }
}

/// Shared run flag with a broadcast wake-up on the running → stopped transition.
#[derive(Debug)]
pub struct RunState {
    running: AtomicBool,
    reason: OnceLock<ShutdownReason>,
    tx: watch::Sender<bool>,
}

impl RunState {
    /// Create a run state in the running position.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self {
            running: AtomicBool::new(true),
            reason: OnceLock::new(),
            tx,
        }
    }

    /// Whether the run is still active.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Flip the flag to stopped.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn request_stop(&self, reason: ShutdownReason) -> bool {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!(%reason, "Shutdown already in progress; ignoring trigger");
            return false;
        }

        let _ = self.reason.set(reason);
        self.tx.send_replace(false);
        tracing::info!(%reason, "Shutdown requested");
        true
    }

    /// The reason recorded by the winning trigger, if the run has stopped.
    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().copied()
    }

    /// Resolve once the run has stopped. Returns immediately if it already has.
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|running| !*running).await;
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_first_trigger_wins() {
        let state = RunState::new();
        assert!(state.is_running());
        assert!(state.request_stop(ShutdownReason::StreamFrozen));
        assert!(!state.request_stop(ShutdownReason::Interrupted));
        assert!(!state.is_running());
        assert_eq!(state.reason(), Some(ShutdownReason::StreamFrozen));
    }

    #[test]
    fn test_fatal_errors_map_to_failure_reasons() {
        let frozen = CaptureError::StreamFrozen(Duration::from_secs(6));
        assert_eq!(ShutdownReason::for_error(&frozen), Some(ShutdownReason::StreamFrozen));

        let open = CaptureError::SourceOpen {
            source_name: "rtsp://10.0.0.1/stream".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(ShutdownReason::for_error(&open), Some(ShutdownReason::SourceFailed));

        let read = CaptureError::SourceRead("short read".into());
        assert_eq!(ShutdownReason::for_error(&read), None);
    }

    #[tokio::test]
    async fn test_stopped_resolves_for_late_subscribers() {
        let state = RunState::new();
        state.request_stop(ShutdownReason::EndOfStream);
        tokio::time::timeout(Duration::from_millis(100), state.stopped())
            .await
            .expect("already-stopped state should resolve immediately");
    }

    #[tokio::test]
    async fn test_stopped_wakes_waiters() {
        let state = Arc::new(RunState::new());
        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.stopped().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        state.request_stop(ShutdownReason::ParentDisconnected);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[test]
    fn test_failure_reasons() {
        assert!(ShutdownReason::StreamFrozen.is_failure());
        assert!(ShutdownReason::SourceFailed.is_failure());
        assert!(!ShutdownReason::Interrupted.is_failure());
        assert!(!ShutdownReason::ParentDisconnected.is_failure());
        assert!(!ShutdownReason::EndOfStream.is_failure());
    }
}
