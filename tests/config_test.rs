//! The shipped configuration file.

use capture_daemon::config::{CaptureConfig, FrameSize, PixelFormat};
use capture_daemon::data::Modality;
use figment::providers::{Format, Toml};
use std::path::PathBuf;
use std::time::Duration;

fn shipped() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/capture.toml")
}

#[test]
fn test_shipped_config_loads_and_validates() {
    let config = CaptureConfig::load(Some(&shipped())).unwrap();
    config.validate().unwrap();

    assert_eq!(config.graceful_timeout(), Duration::from_secs(15));
    let camera = config.profile(Modality::Camera);
    assert_eq!(camera.pixel_format, PixelFormat::Rgb24);
    assert_eq!(camera.record_size, Some(FrameSize::new(850, 480)));
    assert!(camera.control.is_none());

    let sonar = config.profile(Modality::Sonar);
    assert_eq!(sonar.pixel_format, PixelFormat::Gray);
    assert_eq!(sonar.preview.port, 5002);
    assert!(sonar.control.is_some());
}

#[test]
fn test_file_layer_overrides_single_keys() {
    let config: CaptureConfig = CaptureConfig::figment(&shipped())
        .merge(Toml::string(
            r#"
            [sonar]
            record_every = 4

            [sonar.control]
            range_m = 6.0
            "#,
        ))
        .extract()
        .unwrap();

    assert_eq!(config.sonar.record_every, 4);
    assert_eq!(config.sonar.control.as_ref().map(|c| c.range_m), Some(6.0));
    // Untouched keys keep the file's values.
    assert_eq!(config.sonar.queue_capacity, 1000);
    assert_eq!(config.camera.record_every, 3);
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = CaptureConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
    assert_eq!(config, CaptureConfig::default());
}
