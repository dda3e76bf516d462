//! One captured frame and the sensor it came from.

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical sensor modality served by a capture daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    /// Video camera on an RTSP stream.
    Camera,
    /// Imaging sonar with a REST control plane.
    Sonar,
}

impl Modality {
    /// Lower-case name used in logs and configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            Modality::Camera => "camera",
            Modality::Sonar => "sonar",
        }
    }

    /// Name of this modality's directory inside a session root.
    ///
    /// These names are consumed by the ingestion pipeline and must not change.
    pub fn session_dir_name(self) -> &'static str {
        match self {
            Modality::Camera => "camera_1",
            Modality::Sonar => "sonar",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A timestamped frame moving through the pipeline.
///
/// Samples are deliberately not `Clone`: a sample is owned by the producer, then
/// by a queue slot, then by the persistence writer, and is never shared.
#[derive(Debug)]
pub struct Sample {
    /// Sensor that produced the frame.
    pub modality: Modality,
    /// Wall-clock capture time in milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Pixel or intensity data.
    pub frame: DynamicImage,
}

impl Sample {
    /// Wrap a frame captured at `timestamp_ms`.
    pub fn new(modality: Modality, frame: DynamicImage, timestamp_ms: i64) -> Self {
        Self {
            modality,
            timestamp_ms,
            frame,
        }
    }

    /// Frame width in pixels.
    pub fn width(&self) -> u32 {
        self.frame.width()
    }

    /// Frame height in pixels.
    pub fn height(&self) -> u32 {
        self.frame.height()
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_directory_names_are_stable() {
        assert_eq!(Modality::Camera.session_dir_name(), "camera_1");
        assert_eq!(Modality::Sonar.session_dir_name(), "sonar");
    }

    #[test]
    fn test_modality_round_trips_through_config_names() {
        let parsed: Modality = serde_json::from_str("\"sonar\"").unwrap();
        assert_eq!(parsed, Modality::Sonar);
        assert_eq!(Modality::Camera.to_string(), "camera");
    }
}
