//! # Capture Daemon Library
//!
//! Real-time sensor capture for the field robotics console. One generic pipeline
//! serves both sensors (a video camera and an imaging sonar): it pulls frames
//! from a live stream, buffers them against slow disks, records them with
//! per-frame timestamps, republishes a small live preview over UDP and, for
//! sensors with controllable hardware, drives power and mode over a control API.
//!
//! ## Crate Structure
//!
//! - **`config`**: Figment-based layered configuration (`CaptureConfig`).
//! - **`logging`**: `tracing` subscriber setup.
//! - **`error`**: The crate-wide `CaptureError` enum.
//! - **`run_state`** / **`context`**: The shared keep-running flag and the run
//!   context every worker holds.
//! - **`data`**: `Sample` and the drop-oldest `FrameQueue`.
//! - **`hardware`**: Frame sources (decoder stream, synthetic pattern) and the
//!   sonar control plane, behind capability traits.
//! - **`capture`**: The producer loop (cadence, pre-enqueue transform, freeze
//!   detection).
//! - **`preview`**: Best-effort JPEG-over-UDP preview.
//! - **`storage`**: Session layout and the persistence writer.
//! - **`calibration`** / **`imaging`**: Lens calibration and pixel operations.
//! - **`lifecycle`**: Retry and exactly-once power-off policy.
//! - **`liveness`**: Parent-disconnect detection and console commands.
//! - **`shutdown`**: Phases, signal handling and the shutdown coordinator.
//! - **`pipeline`** / **`daemon`**: Pipeline assembly per modality.

pub mod calibration;
pub mod capture;
pub mod config;
pub mod context;
pub mod daemon;
pub mod data;
pub mod error;
pub mod hardware;
pub mod imaging;
pub mod lifecycle;
pub mod liveness;
pub mod logging;
pub mod pipeline;
pub mod preview;
pub mod run_state;
pub mod shutdown;
pub mod storage;

pub use error::{CaptureError, CaptureResult};
