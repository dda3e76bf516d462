//! Persistence writer
//!
//! The consumer side of the pipeline. Drains the frame queue in FIFO order and
//! hands each sample to an [`ArtifactWriter`] together with a sequence number
//! that starts at zero and increases by one per consumed sample, including
//! samples whose write failed.
//!
//! The writer keeps going after a failed write and exits only when the run has
//! stopped and the queue is empty, so everything buffered at shutdown still
//! reaches disk.

use crate::context::RunContext;
use crate::storage::ArtifactWriter;
use std::sync::Arc;
use tokio::task::spawn_blocking;

/// Counts reported when the writer exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistenceReport {
    /// Samples taken from the queue.
    pub consumed: u64,
    /// Samples written successfully.
    pub written: u64,
    /// Samples whose write failed.
    pub failed: u64,
}

/// Consumer task.
pub struct PersistenceWriter {
    ctx: Arc<RunContext>,
    artifacts: Box<dyn ArtifactWriter>,
}

impl PersistenceWriter {
    /// Drain `ctx.queue` into `artifacts`.
    pub fn new(ctx: Arc<RunContext>, artifacts: Box<dyn ArtifactWriter>) -> Self {
        Self { ctx, artifacts }
    }

    /// Run until the run has stopped and the queue is drained.
    pub async fn run(self) -> PersistenceReport {
        let modality = self.ctx.modality;
        let mut report = PersistenceReport::default();
        let mut artifacts = self.artifacts;

        artifacts = match spawn_blocking(move || {
            let result = artifacts.prepare();
            (artifacts, result)
        })
        .await
        {
            Ok((artifacts, Ok(()))) => artifacts,
            Ok((artifacts, Err(e))) => {
                tracing::error!(%modality, error = %e, "Failed to prepare session directory");
                artifacts
            }
            Err(e) => {
                tracing::error!(%modality, error = %e, "Session preparation panicked");
                return report;
            }
        };

        while let Some(sample) = self.ctx.queue.pop().await {
            let seq = report.consumed;
            report.consumed += 1;

            let (returned, result) = match spawn_blocking(move || {
                let result = artifacts.write(seq, &sample);
                (artifacts, result)
            })
            .await
            {
                Ok(pair) => pair,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(%modality, seq, error = %e, "Artifact writer panicked; persistence stopped");
                    return report;
                }
            };
            artifacts = returned;

            match result {
                Ok(()) => report.written += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(%modality, seq, error = %e, "Failed to write artifact");
                }
            }
        }

        match spawn_blocking(move || artifacts.finish()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(%modality, error = %e, "Failed to finalize session files"),
            Err(e) => tracing::error!(%modality, error = %e, "Session finalization panicked"),
        }

        tracing::info!(
            %modality,
            consumed = report.consumed,
            written = report.written,
            failed = report.failed,
            "Persistence finished"
        );
        report
    }
}
