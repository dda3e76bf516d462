//! Shared state for one daemon run.

use crate::data::{FrameQueue, Modality};
use crate::run_state::RunState;
use crate::shutdown::PhaseTracker;
use std::sync::Arc;

/// Everything the concurrently running workers share.
///
/// Created once at startup and handed to each task behind an `Arc`; there is no
/// process-global state.
#[derive(Debug)]
pub struct RunContext {
    /// Sensor served by this run.
    pub modality: Modality,
    /// Keep-running flag and shutdown reason.
    pub run_state: Arc<RunState>,
    /// Capture to persistence hand-off.
    pub queue: FrameQueue,
    /// Process phase.
    pub phase: PhaseTracker,
}

impl RunContext {
    /// Fresh context with a queue of `queue_capacity` samples.
    pub fn new(modality: Modality, queue_capacity: usize) -> Arc<Self> {
        let run_state = Arc::new(RunState::new());
        Arc::new(Self {
            modality,
            queue: FrameQueue::new(queue_capacity, run_state.clone()),
            run_state,
            phase: PhaseTracker::new(),
        })
    }
}
