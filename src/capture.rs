//! Capture worker
//!
//! The producer side of the pipeline. Each iteration reads one frame from the
//! [`FrameSource`] and then:
//!
//! 1. timestamps it
//! 2. previews every `preview_every`-th successful read (the first read included)
//! 3. enqueues every `record_every`-th successful read after the modality's
//!    pre-enqueue transform
//! 4. checks stream health: no successful read for longer than the freeze
//!    threshold stops the whole run
//!
//! The worker owns its source and closes it on exit.

use crate::config::{FrameSize, SensorProfile};
use crate::context::RunContext;
use crate::data::sample::now_millis;
use crate::data::{Modality, Sample};
use crate::error::CaptureError;
use crate::hardware::capabilities::{FrameSource, ReadOutcome};
use crate::imaging;
use crate::preview::{PreviewOutcome, PreviewPublisher};
use crate::run_state::ShutdownReason;
use image::DynamicImage;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::spawn_blocking;
use tokio::time::Instant;

/// Transform applied to a frame before it is queued for persistence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PreEnqueueTransform {
    /// Store as read.
    None,
    /// Resize to a fixed size.
    Downscale(FrameSize),
    /// Reduce to one intensity channel.
    Intensity,
}

impl PreEnqueueTransform {
    /// Apply the transform.
    pub fn apply(&self, frame: DynamicImage) -> DynamicImage {
        match self {
            PreEnqueueTransform::None => frame,
            PreEnqueueTransform::Downscale(size) => imaging::resize(&frame, size.width, size.height),
            PreEnqueueTransform::Intensity => imaging::to_intensity(frame),
        }
    }
}

/// Cadence and health settings for the capture loop.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    /// Preview every Nth successful read.
    pub preview_every: u64,
    /// Record every Nth successful read.
    pub record_every: u64,
    /// Longest tolerated gap between successful reads.
    pub freeze_threshold: Duration,
    /// Applied before enqueueing.
    pub transform: PreEnqueueTransform,
}

impl CaptureSettings {
    /// Settings for `modality` from its profile.
    pub fn from_profile(modality: Modality, profile: &SensorProfile) -> Self {
        let transform = match modality {
            Modality::Camera => profile
                .record_size
                .map_or(PreEnqueueTransform::None, PreEnqueueTransform::Downscale),
            Modality::Sonar => PreEnqueueTransform::Intensity,
        };
        Self {
            preview_every: profile.preview_every.max(1),
            record_every: profile.record_every.max(1),
            freeze_threshold: profile.freeze_threshold(),
            transform,
        }
    }
}

/// Counters reported when the worker exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Successful reads.
    pub frames_read: u64,
    /// Reads that returned nothing or failed.
    pub missed_reads: u64,
    /// Previews handed to the transport.
    pub previews_sent: u64,
    /// Previews dropped (too large, encode or send failure).
    pub previews_dropped: u64,
    /// Samples pushed to the queue.
    pub samples_enqueued: u64,
    /// Pushes that evicted an older sample.
    pub samples_evicted: u64,
}

/// Producer task.
pub struct CaptureWorker {
    ctx: Arc<RunContext>,
    source: Box<dyn FrameSource>,
    preview: Option<Arc<PreviewPublisher>>,
    settings: CaptureSettings,
}

impl CaptureWorker {
    /// Capture from an already opened `source` into `ctx.queue`.
    pub fn new(
        ctx: Arc<RunContext>,
        source: Box<dyn FrameSource>,
        preview: Option<PreviewPublisher>,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            ctx,
            source,
            preview: preview.map(Arc::new),
            settings,
        }
    }

    /// Run until the run state stops, the stream ends, or the stream freezes.
    pub async fn run(mut self) -> CaptureStats {
        let modality = self.ctx.modality;
        let run_state = self.ctx.run_state.clone();
        let mut stats = CaptureStats::default();
        let mut successful: u64 = 0;
        let mut last_frame = Instant::now();

        tracing::info!(%modality, source = %self.source.describe(), "Capture started");

        while run_state.is_running() {
            let outcome = tokio::select! {
                biased;
                _ = run_state.stopped() => break,
                outcome = self.source.read_frame() => outcome,
            };

            match outcome {
                Ok(ReadOutcome::Frame(frame)) => {
                    last_frame = Instant::now();
                    let timestamp_ms = now_millis();
                    stats.frames_read += 1;

                    let preview = if successful % self.settings.preview_every == 0 {
                        self.preview.clone()
                    } else {
                        None
                    };
                    successful += 1;
                    let record = successful % self.settings.record_every == 0;

                    if preview.is_some() || record {
                        self.process_frame(frame, preview, record, timestamp_ms, &mut stats)
                            .await;
                    }
                }
                Ok(ReadOutcome::Missed) => stats.missed_reads += 1,
                Ok(ReadOutcome::EndOfStream) => {
                    tracing::info!(%modality, "Capture source reached end of stream");
                    run_state.request_stop(ShutdownReason::EndOfStream);
                    break;
                }
                Err(e) => {
                    stats.missed_reads += 1;
                    if self.stop_if_fatal(&e) {
                        break;
                    }
                    tracing::debug!(%modality, error = %e, "Capture read failed");
                }
            }

            let silent = last_frame.elapsed();
            if silent > self.settings.freeze_threshold
                && self.stop_if_fatal(&CaptureError::StreamFrozen(silent))
            {
                break;
            }
        }

        self.source.close().await;
        tracing::info!(
            %modality,
            frames_read = stats.frames_read,
            samples_enqueued = stats.samples_enqueued,
            samples_evicted = stats.samples_evicted,
            previews_sent = stats.previews_sent,
            previews_dropped = stats.previews_dropped,
            "Capture stopped"
        );
        stats
    }

    /// Preview and enqueue one frame. Resizing and encoding run on the blocking
    /// pool so the read loop's executor thread stays free.
    async fn process_frame(
        &mut self,
        frame: DynamicImage,
        preview: Option<Arc<PreviewPublisher>>,
        record: bool,
        timestamp_ms: i64,
        stats: &mut CaptureStats,
    ) {
        let modality = self.ctx.modality;
        let transform = self.settings.transform;
        let job = spawn_blocking(move || {
            let sent = preview.map(|publisher| publisher.publish(&frame));
            let recorded = record.then(|| transform.apply(frame));
            (sent, recorded)
        });

        let (sent, recorded) = match job.await {
            Ok(done) => done,
            Err(e) => {
                tracing::warn!(%modality, error = %e, "Frame processing failed; frame dropped");
                return;
            }
        };

        match sent {
            Some(PreviewOutcome::Sent(_)) => stats.previews_sent += 1,
            Some(PreviewOutcome::TooLarge(_) | PreviewOutcome::Failed) => stats.previews_dropped += 1,
            None => {}
        }
        if let Some(frame) = recorded {
            if self.ctx.queue.push(Sample::new(modality, frame, timestamp_ms)) {
                stats.samples_evicted += 1;
            }
            stats.samples_enqueued += 1;
        }
    }

    /// Request a shutdown if `err` is fatal. Returns whether it was.
    fn stop_if_fatal(&self, err: &CaptureError) -> bool {
        let Some(reason) = ShutdownReason::for_error(err) else {
            return false;
        };
        tracing::error!(
            modality = %self.ctx.modality,
            error = %err,
            threshold_ms = self.settings.freeze_threshold.as_millis() as u64,
            "Capture cannot continue; shutting down"
        );
        self.ctx.run_state.request_stop(reason);
        true
    }
}
