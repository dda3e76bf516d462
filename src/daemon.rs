//! Per-modality pipeline assembly.
//!
//! Maps configuration and command-line options onto the strategies a
//! [`Pipeline`] is built from:
//!
//! | | camera | sonar |
//! |---|---|---|
//! | source | network stream, or local device with `--debug` | same |
//! | pre-enqueue | downscale to `record_size` | single-channel intensity |
//! | artifacts | undistorted JPEG + `timestamps.txt` | JPEG + raw matrix dump |
//! | lifecycle | none | REST control plane (skipped with `--debug`) |

use crate::calibration::CalibrationProfile;
use crate::capture::CaptureSettings;
use crate::config::{CaptureConfig, SensorProfile};
use crate::data::Modality;
use crate::error::{CaptureError, CaptureResult};
use crate::hardware::capabilities::FrameSource;
use crate::hardware::{SonarController, StreamInput, StreamSource, SyntheticSource};
use crate::lifecycle::LifecycleController;
use crate::pipeline::Pipeline;
use crate::preview::PreviewPublisher;
use crate::storage::{ArtifactWriter, CameraArtifacts, Session, SonarArtifacts};
use std::path::PathBuf;
use std::sync::Arc;

/// Local device name that selects the generated test pattern.
pub const SYNTHETIC_DEVICE: &str = "synthetic";

/// Command-line options that shape a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonOptions {
    /// Sensor to serve.
    pub modality: Modality,
    /// Use the local test source and skip device lifecycle calls.
    pub debug: bool,
    /// Session root.
    pub out: PathBuf,
}

/// Build the capture source for `profile`.
pub fn build_source(profile: &SensorProfile, debug: bool) -> Box<dyn FrameSource> {
    if debug && profile.local_device == SYNTHETIC_DEVICE {
        return Box::new(SyntheticSource::new(
            profile.local_size.width,
            profile.local_size.height,
            profile.local_fps,
            profile.pixel_format,
        ));
    }

    let (input, output) = if debug {
        (
            StreamInput::LocalDevice {
                device: profile.local_device.clone(),
                size: profile.local_size,
                fps: profile.local_fps,
            },
            profile.local_size,
        )
    } else {
        (
            StreamInput::Network {
                url: profile.stream_url.clone(),
            },
            profile.stream_size,
        )
    };

    Box::new(
        StreamSource::new(profile.ffmpeg_path.clone(), input, output, profile.pixel_format)
            .with_open_timeout(profile.open_timeout())
            .with_read_timeout(profile.read_timeout()),
    )
}

/// Build the persistence strategy for `modality`.
pub fn build_artifacts(modality: Modality, profile: &SensorProfile, session: &Session) -> Box<dyn ArtifactWriter> {
    match modality {
        Modality::Camera => {
            let calibration = CalibrationProfile::load_or_identity(&profile.calibration_paths);
            Box::new(CameraArtifacts::new(session, calibration, profile.jpeg_quality))
        }
        Modality::Sonar => Box::new(SonarArtifacts::new(session, profile.jpeg_quality)),
    }
}

/// Build the lifecycle controller; without a control section or in debug mode it
/// has no device.
pub fn build_lifecycle(profile: &SensorProfile, debug: bool) -> CaptureResult<LifecycleController> {
    match (&profile.control, debug) {
        (Some(control), false) => {
            let controller = SonarController::from_config(control).map_err(|e| CaptureError::ControlPlane {
                url: control.base_url.clone(),
                reason: format!("{e:#}"),
            })?;
            Ok(LifecycleController::from_config(Arc::new(controller), control))
        }
        (Some(_), true) => {
            tracing::info!("Debug mode: device lifecycle calls skipped");
            Ok(LifecycleController::disabled())
        }
        (None, _) => Ok(LifecycleController::disabled()),
    }
}

/// Assemble the full pipeline for `options.modality`.
pub fn build_pipeline(config: &CaptureConfig, options: &DaemonOptions) -> CaptureResult<Pipeline> {
    let modality = options.modality;
    let profile = config.profile(modality);
    let session = Session::new(&options.out);

    let mut builder = Pipeline::builder(modality)
        .queue_capacity(profile.queue_capacity)
        .source(build_source(profile, options.debug))
        .artifacts(build_artifacts(modality, profile, &session))
        .lifecycle(build_lifecycle(profile, options.debug)?)
        .settings(CaptureSettings::from_profile(modality, profile))
        .graceful_timeout(config.graceful_timeout());

    match PreviewPublisher::udp(&profile.preview) {
        Ok(preview) => builder = builder.preview(preview),
        Err(e) => tracing::warn!(error = %e, "Preview disabled"),
    }

    tracing::info!(
        %modality,
        debug = options.debug,
        session = %session.root().display(),
        "Pipeline assembled"
    );
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_mode_never_controls_the_device() {
        let profile = SensorProfile::sonar_defaults();
        assert!(!build_lifecycle(&profile, true).unwrap().has_device());
        assert!(build_lifecycle(&profile, false).unwrap().has_device());
        assert!(!build_lifecycle(&SensorProfile::camera_defaults(), false).unwrap().has_device());
    }

    #[test]
    fn test_source_follows_debug_flag() {
        let mut profile = SensorProfile::camera_defaults();
        assert_eq!(build_source(&profile, false).describe(), "rtsp://192.168.2.54:554/stream");

        profile.local_device = SYNTHETIC_DEVICE.into();
        assert!(build_source(&profile, true).describe().starts_with("synthetic"));
    }

    #[tokio::test]
    async fn test_synthetic_debug_pipeline_builds() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CaptureConfig::default();
        config.camera.local_device = SYNTHETIC_DEVICE.into();
        let options = DaemonOptions {
            modality: Modality::Camera,
            debug: true,
            out: dir.path().to_path_buf(),
        };
        let pipeline = build_pipeline(&config, &options).unwrap();
        assert!(!pipeline.lifecycle().has_device());
        assert_eq!(pipeline.context().queue.capacity(), 1000);
    }
}
