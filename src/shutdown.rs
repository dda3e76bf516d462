//! Shutdown coordination
//!
//! Process phases advance strictly forward:
//!
//! ```text
//! Init → Configuring → Running → ShuttingDown → DeviceSafe → Terminated
//! ```
//!
//! Any trigger (signal, liveness channel closed, stream freeze, capture ending)
//! flips the shared [`RunState`]. The coordinator then:
//!
//! 1. wakes every queue waiter
//! 2. waits for capture to stop and persistence to drain, bounded by the
//!    graceful deadline; past the deadline both tasks are abandoned
//! 3. powers the device off (always attempted, whatever happened in step 2)
//! 4. reports a [`RunSummary`]; the binary exits with its exit code

use crate::capture::CaptureStats;
use crate::context::RunContext;
use crate::data::Modality;
use crate::lifecycle::{LifecycleController, PowerOffOutcome};
use crate::run_state::{RunState, ShutdownReason};
use crate::storage::PersistenceReport;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Process phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Phase {
    /// Process started, nothing set up.
    Init = 0,
    /// Device lifecycle setup and source open.
    Configuring = 1,
    /// Capture, persistence and preview running.
    Running = 2,
    /// Stop requested; draining.
    ShuttingDown = 3,
    /// Power-off attempted.
    DeviceSafe = 4,
    /// Done.
    Terminated = 5,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Phase::Init,
            1 => Phase::Configuring,
            2 => Phase::Running,
            3 => Phase::ShuttingDown,
            4 => Phase::DeviceSafe,
            _ => Phase::Terminated,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "INIT",
            Phase::Configuring => "CONFIGURING",
            Phase::Running => "RUNNING",
            Phase::ShuttingDown => "SHUTTING_DOWN",
            Phase::DeviceSafe => "DEVICE_SAFE",
            Phase::Terminated => "TERMINATED",
        };
        f.write_str(name)
    }
}

/// Monotonic phase register.
#[derive(Debug)]
pub struct PhaseTracker {
    phase: AtomicU8,
}

impl PhaseTracker {
    /// Start at [`Phase::Init`].
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(Phase::Init as u8),
        }
    }

    /// Current phase.
    pub fn current(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Move forward to `next`. Returns `false` (and changes nothing) if the
    /// tracker is already at or past `next`.
    pub fn advance(&self, next: Phase) -> bool {
        let result = self
            .phase
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < next as u8).then_some(next as u8)
            });
        match result {
            Ok(previous) => {
                tracing::debug!(from = %Phase::from_u8(previous), to = %next, "Phase transition");
                true
            }
            Err(_) => false,
        }
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Stop the run on SIGINT, SIGTERM or Ctrl-C. Returns once the run has stopped.
pub async fn listen_for_signals(run_state: Arc<RunState>) {
    tokio::select! {
        _ = run_state.stopped() => {}
        _ = interrupted() => {
            run_state.request_stop(ShutdownReason::Interrupted);
        }
    }
}

#[cfg(unix)]
async fn interrupted() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable; listening for Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn interrupted() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Outcome of one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    /// Sensor served.
    pub modality: Modality,
    /// Winning shutdown trigger.
    pub reason: ShutdownReason,
    /// Capture counters.
    pub capture: CaptureStats,
    /// Persistence counters.
    pub persistence: PersistenceReport,
    /// Power-off result.
    pub power_off: PowerOffOutcome,
    /// Whether the graceful deadline expired.
    pub forced: bool,
}

impl RunSummary {
    /// Process exit code: non-zero when the sensor stream failed.
    pub fn exit_code(&self) -> i32 {
        if self.reason.is_failure() {
            1
        } else {
            0
        }
    }
}

/// Drives the shutdown sequence once a trigger fires.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    ctx: Arc<RunContext>,
    lifecycle: Arc<LifecycleController>,
    grace: Duration,
}

impl ShutdownCoordinator {
    /// Coordinate `ctx`, powering off through `lifecycle`, with `grace` to drain.
    pub fn new(ctx: Arc<RunContext>, lifecycle: Arc<LifecycleController>, grace: Duration) -> Self {
        Self { ctx, lifecycle, grace }
    }

    /// Wait for a trigger, then stop, drain, power off and summarize.
    pub async fn drive(
        self,
        mut capture: JoinHandle<CaptureStats>,
        mut writer: JoinHandle<PersistenceReport>,
    ) -> RunSummary {
        let ctx = &self.ctx;

        let capture_done = tokio::select! {
            _ = ctx.run_state.stopped() => None,
            joined = &mut capture => {
                if ctx.run_state.request_stop(ShutdownReason::SourceFailed) {
                    tracing::error!("Capture ended without a shutdown trigger");
                }
                Some(joined)
            }
        };

        ctx.phase.advance(Phase::ShuttingDown);
        ctx.queue.wake_all();
        let reason = ctx.run_state.reason().unwrap_or(ShutdownReason::Interrupted);
        tracing::info!(%reason, buffered = ctx.queue.len(), "Shutting down");

        let capture_ref = &mut capture;
        let writer_ref = &mut writer;
        let graceful = async move {
            let capture = match capture_done {
                Some(joined) => joined,
                None => capture_ref.await,
            };
            (capture, writer_ref.await)
        };

        let (capture_stats, persistence, forced) = match tokio::time::timeout(self.grace, graceful).await {
            Ok((capture_joined, writer_joined)) => {
                let capture_stats = capture_joined.unwrap_or_else(|e| {
                    tracing::error!(error = %e, "Capture task failed");
                    CaptureStats::default()
                });
                let persistence = writer_joined.unwrap_or_else(|e| {
                    tracing::error!(error = %e, "Persistence task failed");
                    PersistenceReport::default()
                });
                (capture_stats, persistence, false)
            }
            Err(_) => {
                tracing::error!(
                    grace_ms = self.grace.as_millis() as u64,
                    buffered = ctx.queue.len(),
                    "Graceful shutdown deadline exceeded; abandoning capture and persistence"
                );
                capture.abort();
                writer.abort();
                (CaptureStats::default(), PersistenceReport::default(), true)
            }
        };

        let power_off = self.lifecycle.safe_power_off().await;
        match power_off {
            PowerOffOutcome::Confirmed { attempts } => {
                tracing::info!(attempts, "Device powered off")
            }
            PowerOffOutcome::Failed { .. } | PowerOffOutcome::Skipped | PowerOffOutcome::AlreadyAttempted => {}
        }
        ctx.phase.advance(Phase::DeviceSafe);

        let summary = RunSummary {
            modality: ctx.modality,
            reason,
            capture: capture_stats,
            persistence,
            power_off,
            forced,
        };
        tracing::info!(
            modality = %summary.modality,
            %reason,
            images_saved = persistence.written,
            frames_read = capture_stats.frames_read,
            forced,
            "Run finished"
        );
        ctx.phase.advance(Phase::Terminated);
        summary
    }
}
