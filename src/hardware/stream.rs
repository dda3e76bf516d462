//! Decoder-backed frame source
//!
//! Frames are decoded by an `ffmpeg` child process that writes fixed-size raw
//! frames to its stdout. The same source serves both inputs:
//!
//! - a network stream (RTSP), opened with minimal receive buffering so that a
//!   read always returns the newest frame rather than a backlog
//! - a local capture device (`--debug`), requested at a fixed resolution and
//!   frame rate through the platform's capture backend
//!
//! Reads are cancel-safe: a partially received frame stays in the buffer and is
//! completed by the next call, so a read timeout never shifts frame boundaries.

use crate::config::{FrameSize, PixelFormat};
use crate::error::{CaptureError, CaptureResult};
use crate::hardware::capabilities::{FrameSource, ReadOutcome};
use async_trait::async_trait;
use image::{DynamicImage, GrayImage, ImageBuffer, Luma, RgbImage};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::{timeout_at, Instant};

#[cfg(target_os = "linux")]
const CAPTURE_BACKEND: &str = "v4l2";
#[cfg(target_os = "windows")]
const CAPTURE_BACKEND: &str = "dshow";
#[cfg(not(any(target_os = "linux", target_os = "windows")))]
const CAPTURE_BACKEND: &str = "avfoundation";

/// Where the decoder reads from.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamInput {
    /// Live network stream.
    Network {
        /// Stream URL, e.g. `rtsp://192.168.2.54:554/stream`.
        url: String,
    },
    /// Local capture device.
    LocalDevice {
        /// Device path or backend-specific name.
        device: String,
        /// Requested capture size.
        size: FrameSize,
        /// Requested frame rate.
        fps: u32,
    },
}

enum Fill {
    Complete,
    TimedOut,
    Closed,
}

/// Frame source reading raw frames from an `ffmpeg` child process.
#[derive(Debug)]
pub struct StreamSource {
    ffmpeg: String,
    input: StreamInput,
    output: FrameSize,
    pixel_format: PixelFormat,
    open_timeout: Duration,
    read_timeout: Duration,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    buffer: Vec<u8>,
    filled: usize,
    primed: Option<DynamicImage>,
}

impl StreamSource {
    /// Create a source decoding `input` into `output`-sized frames of `pixel_format`.
    pub fn new(
        ffmpeg: impl Into<String>,
        input: StreamInput,
        output: FrameSize,
        pixel_format: PixelFormat,
    ) -> Self {
        let frame_bytes = output.width as usize * output.height as usize * pixel_format.bytes_per_pixel();
        Self {
            ffmpeg: ffmpeg.into(),
            input,
            output,
            pixel_format,
            open_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(1),
            child: None,
            stdout: None,
            buffer: vec![0; frame_bytes],
            filled: 0,
            primed: None,
        }
    }

    /// Bound on waiting for the first frame after spawning the decoder.
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Bound on a single read.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Decoder arguments for the configured input and output.
    pub fn command_args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-loglevel", "error"]
            .into_iter()
            .map(String::from)
            .collect();

        match &self.input {
            StreamInput::Network { url } => {
                args.extend(
                    ["-fflags", "nobuffer", "-flags", "low_delay", "-i"]
                        .into_iter()
                        .map(String::from),
                );
                args.push(url.clone());
            }
            StreamInput::LocalDevice { device, size, fps } => {
                args.extend(["-f".to_string(), CAPTURE_BACKEND.to_string()]);
                if CAPTURE_BACKEND != "avfoundation" {
                    args.extend(["-input_format".to_string(), "mjpeg".to_string()]);
                }
                args.extend([
                    "-video_size".to_string(),
                    format!("{}x{}", size.width, size.height),
                    "-framerate".to_string(),
                    fps.to_string(),
                    "-i".to_string(),
                    device.clone(),
                ]);
            }
        }

        args.extend([
            "-an".to_string(),
            "-vf".to_string(),
            format!("scale={}:{}", self.output.width, self.output.height),
            "-pix_fmt".to_string(),
            self.pixel_format.ffmpeg_name().to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "pipe:1".to_string(),
        ]);
        args
    }

    async fn fill(&mut self, deadline: Instant) -> CaptureResult<Fill> {
        while self.filled < self.buffer.len() {
            let Some(stdout) = self.stdout.as_mut() else {
                return Ok(Fill::Closed);
            };
            match timeout_at(deadline, stdout.read(&mut self.buffer[self.filled..])).await {
                Err(_) => return Ok(Fill::TimedOut),
                Ok(Ok(0)) => return Ok(Fill::Closed),
                Ok(Ok(n)) => self.filled += n,
                Ok(Err(e)) => return Err(CaptureError::SourceRead(e.to_string())),
            }
        }
        self.filled = 0;
        Ok(Fill::Complete)
    }

    fn decode(&self) -> CaptureResult<DynamicImage> {
        let (w, h) = (self.output.width, self.output.height);
        let bytes = self.buffer.clone();
        let frame = match self.pixel_format {
            PixelFormat::Rgb24 => RgbImage::from_raw(w, h, bytes).map(DynamicImage::ImageRgb8),
            PixelFormat::Gray => GrayImage::from_raw(w, h, bytes).map(DynamicImage::ImageLuma8),
            PixelFormat::Gray16le => {
                let samples = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                ImageBuffer::<Luma<u16>, _>::from_raw(w, h, samples).map(DynamicImage::ImageLuma16)
            }
        };
        frame.ok_or_else(|| CaptureError::SourceRead(format!("short frame for {w}x{h}")))
    }

    async fn reap(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            match tokio::time::timeout(Duration::from_secs(1), child.wait()).await {
                Ok(Ok(status)) => tracing::debug!(%status, "Decoder exited"),
                Ok(Err(e)) => tracing::debug!(error = %e, "Failed to reap decoder"),
                Err(_) => tracing::warn!("Decoder did not exit within 1s of kill"),
            }
        }
    }
}

#[async_trait]
impl FrameSource for StreamSource {
    fn describe(&self) -> String {
        match &self.input {
            StreamInput::Network { url } => url.clone(),
            StreamInput::LocalDevice { device, .. } => device.clone(),
        }
    }

    async fn open(&mut self) -> CaptureResult<()> {
        let source_name = self.describe();
        let args = self.command_args();
        tracing::info!(source = %source_name, "Opening capture source");
        tracing::debug!(ffmpeg = %self.ffmpeg, ?args, "Spawning decoder");

        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CaptureError::SourceOpen {
                source_name: source_name.clone(),
                reason: format!("cannot start {}: {e}", self.ffmpeg),
            })?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "capture_daemon::decoder", "{line}");
                }
            });
        }
        self.stdout = child.stdout.take();
        self.child = Some(child);
        self.filled = 0;

        let deadline = Instant::now() + self.open_timeout;
        let failure = match self.fill(deadline).await {
            Ok(Fill::Complete) => {
                self.primed = Some(self.decode()?);
                tracing::info!(
                    source = %source_name,
                    width = self.output.width,
                    height = self.output.height,
                    "Capture source open"
                );
                return Ok(());
            }
            Ok(Fill::TimedOut) => format!("no frame within {:?}", self.open_timeout),
            Ok(Fill::Closed) => "decoder exited before the first frame".to_string(),
            Err(e) => e.to_string(),
        };

        self.reap().await;
        Err(CaptureError::SourceOpen {
            source_name,
            reason: failure,
        })
    }

    async fn read_frame(&mut self) -> CaptureResult<ReadOutcome> {
        if let Some(frame) = self.primed.take() {
            return Ok(ReadOutcome::Frame(frame));
        }
        if self.stdout.is_none() {
            // Decoder gone: report silence at the normal cadence and let the
            // freeze detector decide.
            tokio::time::sleep(self.read_timeout).await;
            return Ok(ReadOutcome::Missed);
        }

        let deadline = Instant::now() + self.read_timeout;
        match self.fill(deadline).await? {
            Fill::Complete => Ok(ReadOutcome::Frame(self.decode()?)),
            Fill::TimedOut => Ok(ReadOutcome::Missed),
            Fill::Closed => {
                tracing::warn!(source = %self.describe(), "Decoder closed its output");
                self.reap().await;
                Ok(ReadOutcome::Missed)
            }
        }
    }

    async fn close(&mut self) {
        self.primed = None;
        self.reap().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network() -> StreamSource {
        StreamSource::new(
            "ffmpeg",
            StreamInput::Network {
                url: "rtsp://192.168.2.42:8554/raw".into(),
            },
            FrameSize::new(640, 360),
            PixelFormat::Gray,
        )
    }

    #[test]
    fn test_network_args_request_low_latency_raw_output() {
        let args = network().command_args();
        let joined = args.join(" ");
        assert!(joined.contains("-fflags nobuffer -flags low_delay -i rtsp://192.168.2.42:8554/raw"));
        assert!(joined.contains("-vf scale=640:360"));
        assert!(joined.contains("-pix_fmt gray"));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[test]
    fn test_local_device_args_request_size_and_rate() {
        let source = StreamSource::new(
            "ffmpeg",
            StreamInput::LocalDevice {
                device: "/dev/video0".into(),
                size: FrameSize::new(1280, 720),
                fps: 30,
            },
            FrameSize::new(1280, 720),
            PixelFormat::Rgb24,
        );
        let joined = source.command_args().join(" ");
        assert!(joined.contains(&format!("-f {CAPTURE_BACKEND}")));
        assert!(joined.contains("-video_size 1280x720 -framerate 30 -i /dev/video0"));
        assert_eq!(source.describe(), "/dev/video0");
    }

    #[tokio::test]
    async fn test_missing_decoder_is_an_open_failure() {
        let mut source = StreamSource::new(
            "/nonexistent/ffmpeg-binary",
            StreamInput::Network {
                url: "rtsp://127.0.0.1:1/none".into(),
            },
            FrameSize::new(4, 4),
            PixelFormat::Gray,
        )
        .with_open_timeout(Duration::from_millis(200));

        let err = source.open().await.unwrap_err();
        assert!(matches!(err, CaptureError::SourceOpen { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_decode_sixteen_bit_little_endian() {
        let mut source = StreamSource::new(
            "ffmpeg",
            StreamInput::Network { url: "x".into() },
            FrameSize::new(2, 1),
            PixelFormat::Gray16le,
        );
        source.buffer = vec![0x34, 0x12, 0xff, 0xff];
        let frame = source.decode().unwrap();
        let luma = frame.as_luma16().unwrap();
        assert_eq!(luma.get_pixel(0, 0)[0], 0x1234);
        assert_eq!(luma.get_pixel(1, 0)[0], 0xffff);
    }
}
