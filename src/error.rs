//! Custom error types for the capture daemons.
//!
//! This module defines the primary error type, `CaptureError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized way to describe everything
//! that can go wrong between the sensor and the session directory.
//!
//! ## Error Taxonomy
//!
//! Errors fall into four classes, and only the first one ever propagates beyond the
//! component that observed it:
//!
//! - **Fatal**: the capture source cannot be opened, or the stream froze beyond the
//!   freeze threshold. These request a process-wide shutdown.
//! - **Transient**: a single control-plane request failed. The lifecycle controller
//!   retries a bounded number of times and then logs the failure.
//! - **Best-effort**: a preview was too large or could not be sent. Dropped silently.
//! - **Non-fatal local**: one artifact could not be written. Logged; the writer keeps
//!   going and that frame is simply missing from the session.
//!
//! [`CaptureError::is_fatal`] draws the line; fatal errors are turned into a
//! shutdown reason by [`ShutdownReason::for_error`](crate::run_state::ShutdownReason::for_error).

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type CaptureResult<T> = std::result::Result<T, CaptureError>;

/// Errors raised by the capture pipeline.
#[derive(Error, Debug)]
pub enum CaptureError {
    /// The layered configuration could not be extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// The configuration parsed but contains values that make no sense.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Any filesystem or socket failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The capture source could not be opened at all.
    #[error("Failed to open capture source '{source_name}': {reason}")]
    SourceOpen {
        /// Human readable description of the source (URL, device path).
        source_name: String,
        /// Why opening failed.
        reason: String,
    },

    /// A single read from the source failed.
    #[error("Capture source read failed: {0}")]
    SourceRead(String),

    /// No frame was read successfully for longer than the freeze threshold.
    #[error("Stream lost or frozen: no frame for {0:?}")]
    StreamFrozen(Duration),

    /// Encoding or converting an image failed.
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// A control-plane request did not complete successfully.
    #[error("Control plane request to {url} failed: {reason}")]
    ControlPlane {
        /// Full request URL.
        url: String,
        /// Transport error or HTTP status.
        reason: String,
    },

    /// The calibration document exists but could not be used.
    #[error("Calibration error: {0}")]
    Calibration(String),

    /// A line received on the liveness channel is not a known command.
    #[error("Invalid console command: {0}")]
    InvalidCommand(String),
}

impl CaptureError {
    /// Whether this error must bring the whole process down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CaptureError::SourceOpen { .. } | CaptureError::StreamFrozen(_)
        )
    }
}

impl From<figment::Error> for CaptureError {
    fn from(err: figment::Error) -> Self {
        CaptureError::Config(Box::new(err))
    }
}
