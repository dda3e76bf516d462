//! Samples and the buffer that decouples capture from persistence.
pub mod frame_queue;
pub mod sample;

pub use frame_queue::FrameQueue;
pub use sample::{Modality, Sample};
