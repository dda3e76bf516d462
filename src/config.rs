//! Layered configuration using Figment
//!
//! Configuration is assembled from, in increasing priority:
//! 1. Built-in defaults (the values the field console ships with)
//! 2. `config/capture.toml`, or the file given with `--config`
//! 3. Environment variables prefixed with `CAPTURE_`, nested keys split on `__`
//!
//! # Example
//! ```no_run
//! use capture_daemon::config::CaptureConfig;
//!
//! let config = CaptureConfig::load(None)?;
//! config.validate()?;
//! println!("Sonar stream: {}", config.sonar.stream_url);
//! # Ok::<(), capture_daemon::error::CaptureError>(())
//! ```
//!
//! Override a single value from the shell:
//! ```bash
//! CAPTURE_SONAR__CONTROL__RANGE_M=6.0 capture_daemon sonar
//! ```

use crate::data::Modality;
use crate::error::{CaptureError, CaptureResult};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/capture.toml";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Shutdown timing
    pub shutdown: ShutdownConfig,
    /// Camera daemon profile
    pub camera: SensorProfile,
    /// Sonar daemon profile
    pub sonar: SensorProfile,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

/// Shutdown timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// How long capture and persistence get to finish before the process is forced down
    pub graceful_timeout_ms: u64,
}

/// Raw pixel layout requested from the stream decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 8-bit interleaved RGB
    Rgb24,
    /// 8-bit single channel
    Gray,
    /// 16-bit little-endian single channel
    Gray16le,
}

impl PixelFormat {
    /// Name understood by ffmpeg's `-pix_fmt`.
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Gray => "gray",
            PixelFormat::Gray16le => "gray16le",
        }
    }

    /// Bytes per pixel in the decoded stream.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Gray => 1,
            PixelFormat::Gray16le => 2,
        }
    }
}

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl FrameSize {
    /// Construct a frame size.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Live preview settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewConfig {
    /// Destination host (the console listens on loopback)
    pub host: String,
    /// Destination UDP port
    pub port: u16,
    /// Preview frame size
    pub size: FrameSize,
    /// JPEG quality (1-100)
    pub quality: u8,
    /// Encoded previews of this many bytes or more are dropped
    pub max_bytes: usize,
}

/// Sensor control-plane settings (sensors with controllable power/mode)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlConfig {
    /// REST base URL, e.g. `http://192.168.2.42:8000/api/v2`
    pub base_url: String,
    /// Transport the sensor should stream with
    pub stream_mode: String,
    /// Operating range in metres applied at power-on
    pub range_m: f64,
    /// TCP connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Total request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Attempts for the safety-critical power-off
    pub power_off_attempts: u32,
    /// Fixed delay between power-off attempts in milliseconds
    pub power_off_backoff_ms: u64,
}

/// Per-modality daemon profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorProfile {
    /// Network stream opened in production
    pub stream_url: String,
    /// Decoded frame size of the network stream
    pub stream_size: FrameSize,
    /// Decoded pixel layout
    pub pixel_format: PixelFormat,
    /// Local device used with `--debug`; `synthetic` selects the built-in test pattern
    pub local_device: String,
    /// Resolution requested from the local device
    pub local_size: FrameSize,
    /// Frame rate requested from the local device
    pub local_fps: u32,
    /// Decoder executable
    pub ffmpeg_path: String,
    /// How long opening the source may take before it is declared failed
    pub open_timeout_ms: u64,
    /// Upper bound on a single blocking read
    pub read_timeout_ms: u64,
    /// No successful read for longer than this is a stream freeze
    pub freeze_threshold_ms: u64,
    /// Every Nth successfully read frame is previewed
    pub preview_every: u64,
    /// Every Nth successfully read frame is recorded
    pub record_every: u64,
    /// Downscale applied before recording (`None` keeps native size)
    pub record_size: Option<FrameSize>,
    /// Frame queue capacity
    pub queue_capacity: usize,
    /// JPEG quality of recorded images
    pub jpeg_quality: u8,
    /// Calibration search path, first existing file wins
    pub calibration_paths: Vec<PathBuf>,
    /// Live preview
    pub preview: PreviewConfig,
    /// Control plane, if the sensor has one
    pub control: Option<ControlConfig>,
}

impl SensorProfile {
    fn base(preview_port: u16) -> Self {
        Self {
            stream_url: String::new(),
            stream_size: FrameSize::new(1920, 1080),
            pixel_format: PixelFormat::Rgb24,
            local_device: default_local_device().to_string(),
            local_size: FrameSize::new(1280, 720),
            local_fps: 30,
            ffmpeg_path: "ffmpeg".to_string(),
            open_timeout_ms: 10_000,
            read_timeout_ms: 1_000,
            freeze_threshold_ms: 5_000,
            preview_every: 2,
            record_every: 1,
            record_size: None,
            queue_capacity: 1000,
            jpeg_quality: 95,
            calibration_paths: Vec::new(),
            preview: PreviewConfig {
                host: "127.0.0.1".to_string(),
                port: preview_port,
                size: FrameSize::new(400, 225),
                quality: 50,
                max_bytes: 60_000,
            },
            control: None,
        }
    }

    /// Defaults for the RTSP video camera.
    pub fn camera_defaults() -> Self {
        Self {
            stream_url: "rtsp://192.168.2.54:554/stream".to_string(),
            record_every: 3,
            record_size: Some(FrameSize::new(850, 480)),
            calibration_paths: vec![
                PathBuf::from("config/panasonic_calib.yml"),
                PathBuf::from("../config/panasonic_calib.yml"),
            ],
            ..Self::base(5001)
        }
    }

    /// Defaults for the imaging sonar.
    pub fn sonar_defaults() -> Self {
        Self {
            stream_url: "rtsp://192.168.2.42:8554/raw".to_string(),
            stream_size: FrameSize::new(1024, 512),
            pixel_format: PixelFormat::Gray,
            record_every: 1,
            control: Some(ControlConfig {
                base_url: "http://192.168.2.42:8000/api/v2".to_string(),
                stream_mode: "rtsp".to_string(),
                range_m: 3.0,
                connect_timeout_ms: 2_000,
                request_timeout_ms: 3_000,
                power_off_attempts: 3,
                power_off_backoff_ms: 500,
            }),
            ..Self::base(5002)
        }
    }

    /// Freeze threshold as a duration.
    pub fn freeze_threshold(&self) -> Duration {
        Duration::from_millis(self.freeze_threshold_ms)
    }

    /// Read timeout as a duration.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Open timeout as a duration.
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    fn validate(&self, modality: Modality) -> Result<(), String> {
        if self.preview_every == 0 || self.record_every == 0 {
            return Err(format!("{modality}: preview_every and record_every must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(format!("{modality}: queue_capacity must be at least 1"));
        }
        if self.preview.port == 0 {
            return Err(format!("{modality}: preview.port must be non-zero"));
        }
        for (name, quality) in [("preview.quality", self.preview.quality), ("jpeg_quality", self.jpeg_quality)] {
            if !(1..=100).contains(&quality) {
                return Err(format!("{modality}: {name} {quality} must be 1-100"));
            }
        }
        if self.freeze_threshold_ms == 0 || self.read_timeout_ms == 0 {
            return Err(format!("{modality}: freeze_threshold_ms and read_timeout_ms must be positive"));
        }
        let sizes = [Some(self.stream_size), Some(self.local_size), Some(self.preview.size), self.record_size];
        if sizes.iter().flatten().any(|s| s.width == 0 || s.height == 0) {
            return Err(format!("{modality}: frame sizes must be non-zero"));
        }
        if let Some(control) = &self.control {
            if !(control.range_m.is_finite() && control.range_m > 0.0) {
                return Err(format!("{modality}: control.range_m must be positive, got {}", control.range_m));
            }
            if control.power_off_attempts == 0 {
                return Err(format!("{modality}: control.power_off_attempts must be at least 1"));
            }
        }
        Ok(())
    }
}

fn default_local_device() -> &'static str {
    if cfg!(target_os = "linux") {
        "/dev/video0"
    } else if cfg!(target_os = "windows") {
        "video=Integrated Camera"
    } else {
        "0"
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            application: ApplicationConfig {
                name: "capture-daemon".to_string(),
                log_level: "info".to_string(),
                log_format: "compact".to_string(),
            },
            shutdown: ShutdownConfig {
                graceful_timeout_ms: 15_000,
            },
            camera: SensorProfile::camera_defaults(),
            sonar: SensorProfile::sonar_defaults(),
        }
    }
}

impl CaptureConfig {
    /// Load configuration from defaults, a TOML file and the environment.
    ///
    /// `path` defaults to [`DEFAULT_CONFIG_PATH`]; a missing file is not an error.
    pub fn load(path: Option<&Path>) -> CaptureResult<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        Self::figment(path).extract().map_err(CaptureError::from)
    }

    /// The provider stack behind [`CaptureConfig::load`].
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("CAPTURE_").split("__"))
    }

    /// Profile for one modality.
    pub fn profile(&self, modality: Modality) -> &SensorProfile {
        match modality {
            Modality::Camera => &self.camera,
            Modality::Sonar => &self.sonar,
        }
    }

    /// Graceful shutdown deadline.
    pub fn graceful_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown.graceful_timeout_ms)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> CaptureResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(CaptureError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(CaptureError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.shutdown.graceful_timeout_ms == 0 {
            return Err(CaptureError::Configuration(
                "shutdown.graceful_timeout_ms must be positive".into(),
            ));
        }

        for modality in [Modality::Camera, Modality::Sonar] {
            self.profile(modality)
                .validate(modality)
                .map_err(CaptureError::Configuration)?;
        }

        Ok(())
    }
}
