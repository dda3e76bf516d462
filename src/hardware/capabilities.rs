//! Sensor capabilities
//!
//! The capture pipeline is generic over two small traits instead of one trait per
//! sensor:
//!
//! - [`FrameSource`]: anything that yields frames (network stream, local device,
//!   generated pattern, scripted test source)
//! - [`DeviceLifecycle`]: sensors with controllable mode and power
//!
//! The camera only implements a source. The sonar additionally has a lifecycle,
//! driven through its REST control plane.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn first_frame(source: &mut dyn FrameSource) -> CaptureResult<Option<DynamicImage>> {
//!     source.open().await?;
//!     loop {
//!         match source.read_frame().await? {
//!             ReadOutcome::Frame(frame) => return Ok(Some(frame)),
//!             ReadOutcome::Missed => continue,
//!             ReadOutcome::EndOfStream => return Ok(None),
//!         }
//!     }
//! }
//! ```

use crate::error::CaptureResult;
use anyhow::Result;
use async_trait::async_trait;
use image::DynamicImage;
use std::fmt;

/// Result of a single read from a [`FrameSource`].
#[derive(Debug)]
pub enum ReadOutcome {
    /// A complete frame.
    Frame(DynamicImage),
    /// Nothing arrived within the read timeout. The stream may still recover.
    Missed,
    /// The source is exhausted and will never produce another frame.
    EndOfStream,
}

/// Capability: Frame Acquisition
///
/// # Contract
/// - `open` either leaves the source ready to read or fails with
///   [`CaptureError::SourceOpen`](crate::error::CaptureError::SourceOpen)
/// - `read_frame` returns within a bounded time, reporting [`ReadOutcome::Missed`]
///   rather than blocking indefinitely on a silent stream
/// - `close` releases the underlying device or process and may be called more
///   than once
///
/// # Thread Safety
/// A source is owned by exactly one capture worker, so methods take `&mut self`.
#[async_trait]
pub trait FrameSource: Send {
    /// Human readable description (URL, device path) for logs and errors.
    fn describe(&self) -> String;

    /// Open the source.
    async fn open(&mut self) -> CaptureResult<()>;

    /// Read the next frame.
    async fn read_frame(&mut self) -> CaptureResult<ReadOutcome>;

    /// Release the source.
    async fn close(&mut self);
}

/// Requested transceiver power state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PowerState {
    /// Powered and pinging out to `range_m` metres.
    On {
        /// Operating range in metres.
        range_m: f64,
    },
    /// Transmitter off. The only safe state to leave the sensor in.
    Off,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::On { range_m } => write!(f, "on ({range_m} m)"),
            PowerState::Off => f.write_str("off"),
        }
    }
}

/// Last state successfully applied to a device.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LifecycleState {
    /// Stream transport, once configured.
    pub stream_mode: Option<String>,
    /// Power state, once set.
    pub power: Option<PowerState>,
}

impl LifecycleState {
    /// Operating range if the device is powered on.
    pub fn range_m(&self) -> Option<f64> {
        match self.power {
            Some(PowerState::On { range_m }) => Some(range_m),
            _ => None,
        }
    }
}

/// Capability: Device Lifecycle
///
/// Sensors whose mode and power are controlled over a request/response API.
///
/// # Contract
/// - Every call is bounded by the implementation's own connect and total timeouts
/// - A call either reaches the device and is acknowledged, or returns `Err`;
///   implementations do not retry (policy lives in the lifecycle controller)
/// - [`DeviceLifecycle::state`] reflects only acknowledged requests
#[async_trait]
pub trait DeviceLifecycle: Send + Sync {
    /// Device name for logs.
    fn name(&self) -> &str;

    /// Select the stream transport.
    async fn configure(&self, stream_mode: &str) -> Result<()>;

    /// Switch the transceiver on (with a range) or off.
    async fn set_power(&self, state: PowerState) -> Result<()>;

    /// Last acknowledged state.
    fn state(&self) -> LifecycleState;
}
