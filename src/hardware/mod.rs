//! Sensor access
//!
//! Frame sources and device control behind the traits in [`capabilities`].

pub mod capabilities;
pub mod pattern;
pub mod sonar_api;
pub mod stream;
pub mod synthetic;

pub use capabilities::{DeviceLifecycle, FrameSource, LifecycleState, PowerState, ReadOutcome};
pub use sonar_api::SonarController;
pub use stream::{StreamInput, StreamSource};
pub use synthetic::SyntheticSource;
