//! One capture pipeline, parameterized by modality strategies.
//!
//! A [`Pipeline`] is assembled from:
//! - a [`FrameSource`] (network stream, local device, synthetic pattern)
//! - an [`ArtifactWriter`] (camera or sonar persistence)
//! - an optional [`PreviewPublisher`]
//! - a [`LifecycleController`], possibly without a device
//!
//! [`Pipeline::run`] walks the process through its phases and returns a
//! [`RunSummary`]. Both daemons share this control flow.

use crate::capture::{CaptureSettings, CaptureStats, CaptureWorker};
use crate::context::RunContext;
use crate::data::{FrameQueue, Modality};
use crate::error::{CaptureError, CaptureResult};
use crate::hardware::capabilities::FrameSource;
use crate::lifecycle::LifecycleController;
use crate::liveness::{handle_commands, LivenessMonitor};
use crate::preview::PreviewPublisher;
use crate::run_state::ShutdownReason;
use crate::shutdown::{Phase, RunSummary, ShutdownCoordinator};
use crate::storage::{ArtifactWriter, PersistenceReport, PersistenceWriter};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufRead;
use tokio::sync::mpsc;

/// Default graceful shutdown deadline.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(15);

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    modality: Modality,
    queue_capacity: usize,
    source: Option<Box<dyn FrameSource>>,
    artifacts: Option<Box<dyn ArtifactWriter>>,
    preview: Option<PreviewPublisher>,
    lifecycle: Option<LifecycleController>,
    settings: Option<CaptureSettings>,
    grace: Duration,
}

impl PipelineBuilder {
    fn new(modality: Modality) -> Self {
        Self {
            modality,
            queue_capacity: FrameQueue::DEFAULT_CAPACITY,
            source: None,
            artifacts: None,
            preview: None,
            lifecycle: None,
            settings: None,
            grace: DEFAULT_GRACE,
        }
    }

    /// Frame queue capacity.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Capture source (required).
    pub fn source(mut self, source: Box<dyn FrameSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Persistence strategy (required).
    pub fn artifacts(mut self, artifacts: Box<dyn ArtifactWriter>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// Preview publisher.
    pub fn preview(mut self, preview: PreviewPublisher) -> Self {
        self.preview = Some(preview);
        self
    }

    /// Device lifecycle. Defaults to a controller without a device.
    pub fn lifecycle(mut self, lifecycle: LifecycleController) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    /// Capture cadence and health settings (required).
    pub fn settings(mut self, settings: CaptureSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Graceful shutdown deadline.
    pub fn graceful_timeout(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Assemble the pipeline.
    pub fn build(self) -> CaptureResult<Pipeline> {
        let missing = |what: &str| CaptureError::Configuration(format!("pipeline has no {what}"));
        Ok(Pipeline {
            ctx: RunContext::new(self.modality, self.queue_capacity),
            source: self.source.ok_or_else(|| missing("capture source"))?,
            artifacts: self.artifacts.ok_or_else(|| missing("artifact writer"))?,
            preview: self.preview,
            lifecycle: Arc::new(self.lifecycle.unwrap_or_else(LifecycleController::disabled)),
            settings: self.settings.ok_or_else(|| missing("capture settings"))?,
            grace: self.grace,
        })
    }
}

/// A fully assembled capture daemon.
pub struct Pipeline {
    ctx: Arc<RunContext>,
    source: Box<dyn FrameSource>,
    artifacts: Box<dyn ArtifactWriter>,
    preview: Option<PreviewPublisher>,
    lifecycle: Arc<LifecycleController>,
    settings: CaptureSettings,
    grace: Duration,
}

impl Pipeline {
    /// Start building a pipeline for `modality`.
    pub fn builder(modality: Modality) -> PipelineBuilder {
        PipelineBuilder::new(modality)
    }

    /// Shared run context (run state, queue, phase).
    pub fn context(&self) -> Arc<RunContext> {
        self.ctx.clone()
    }

    /// Lifecycle controller.
    pub fn lifecycle(&self) -> Arc<LifecycleController> {
        self.lifecycle.clone()
    }

    /// Run to completion, watching `liveness` for parent disconnect and commands.
    pub async fn run<R>(self, liveness: R) -> RunSummary
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let Pipeline {
            ctx,
            mut source,
            artifacts,
            preview,
            lifecycle,
            settings,
            grace,
        } = self;
        let modality = ctx.modality;

        ctx.phase.advance(Phase::Configuring);
        if lifecycle.has_device() && !lifecycle.start().await {
            tracing::warn!(%modality, "Device setup incomplete; continuing with stream open");
        }

        let opened = tokio::select! {
            biased;
            _ = ctx.run_state.stopped() => None,
            result = source.open() => Some(result),
        };
        match opened {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                tracing::error!(%modality, error = %e, "Cannot open capture source");
                let reason = ShutdownReason::for_error(&e).unwrap_or(ShutdownReason::SourceFailed);
                ctx.run_state.request_stop(reason);
                return Self::abort_before_running(&ctx, source, &lifecycle).await;
            }
            None => return Self::abort_before_running(&ctx, source, &lifecycle).await,
        }

        ctx.phase.advance(Phase::Running);
        tracing::info!(%modality, "Capture pipeline running");

        let writer = tokio::spawn(PersistenceWriter::new(ctx.clone(), artifacts).run());
        let capture = tokio::spawn(CaptureWorker::new(ctx.clone(), source, preview, settings).run());

        let (command_tx, command_rx) = mpsc::channel(8);
        let liveness_task = tokio::spawn(
            LivenessMonitor::new(liveness, ctx.run_state.clone())
                .with_commands(command_tx)
                .run(),
        );
        let command_task = tokio::spawn(handle_commands(command_rx, lifecycle.clone(), ctx.run_state.clone()));

        let summary = ShutdownCoordinator::new(ctx.clone(), lifecycle, grace)
            .drive(capture, writer)
            .await;

        liveness_task.abort();
        command_task.abort();
        summary
    }

    async fn abort_before_running(
        ctx: &Arc<RunContext>,
        mut source: Box<dyn FrameSource>,
        lifecycle: &LifecycleController,
    ) -> RunSummary {
        ctx.phase.advance(Phase::ShuttingDown);
        source.close().await;
        let power_off = lifecycle.safe_power_off().await;
        ctx.phase.advance(Phase::DeviceSafe);
        ctx.phase.advance(Phase::Terminated);

        RunSummary {
            modality: ctx.modality,
            reason: ctx.run_state.reason().unwrap_or(ShutdownReason::SourceFailed),
            capture: CaptureStats::default(),
            persistence: PersistenceReport::default(),
            power_off,
            forced: false,
        }
    }
}
