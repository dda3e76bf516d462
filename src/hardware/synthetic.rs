//! Generated frame source
//!
//! Stands in for the local test device when no camera is attached
//! (`local_device = "synthetic"`) and drives the pipeline in tests. Frames come
//! from [`pattern::generate`] and are paced at the requested frame rate.

use crate::config::PixelFormat;
use crate::error::{CaptureError, CaptureResult};
use crate::hardware::capabilities::{FrameSource, ReadOutcome};
use crate::hardware::pattern;
use async_trait::async_trait;
use image::{DynamicImage, GrayImage, ImageBuffer, Luma, RgbImage};
use tokio::time::{sleep_until, Duration, Instant};

/// Test-pattern frame source.
#[derive(Debug)]
pub struct SyntheticSource {
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    frame_interval: Duration,
    frame_limit: Option<u64>,
    produced: u64,
    next_frame_at: Option<Instant>,
}

impl SyntheticSource {
    /// Generate `width` x `height` frames at `fps` frames per second.
    pub fn new(width: u32, height: u32, fps: u32, pixel_format: PixelFormat) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            pixel_format,
            frame_interval: Duration::from_secs(1) / fps.max(1),
            frame_limit: None,
            produced: 0,
            next_frame_at: None,
        }
    }

    /// End the stream after `limit` frames.
    pub fn with_frame_limit(mut self, limit: u64) -> Self {
        self.frame_limit = Some(limit);
        self
    }

    /// Frames produced so far.
    pub fn frames_produced(&self) -> u64 {
        self.produced
    }

    fn render(&self, frame_num: u64) -> DynamicImage {
        let raw = pattern::generate(self.width, self.height, frame_num);
        let (w, h) = (self.width, self.height);
        match self.pixel_format {
            PixelFormat::Gray16le => match ImageBuffer::<Luma<u16>, _>::from_raw(w, h, raw) {
                Some(buffer) => DynamicImage::ImageLuma16(buffer),
                None => DynamicImage::ImageLuma16(ImageBuffer::new(w, h)),
            },
            PixelFormat::Gray => {
                let bytes = raw.iter().map(|v| (v >> 8) as u8).collect();
                GrayImage::from_raw(w, h, bytes)
                    .map(DynamicImage::ImageLuma8)
                    .unwrap_or_else(|| DynamicImage::ImageLuma8(GrayImage::new(w, h)))
            }
            PixelFormat::Rgb24 => {
                let bytes = raw
                    .iter()
                    .flat_map(|v| {
                        let level = (v >> 8) as u8;
                        [level, level, level / 2 + 64]
                    })
                    .collect();
                RgbImage::from_raw(w, h, bytes)
                    .map(DynamicImage::ImageRgb8)
                    .unwrap_or_else(|| DynamicImage::ImageRgb8(RgbImage::new(w, h)))
            }
        }
    }
}

#[async_trait]
impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        format!(
            "synthetic {}x{} {}",
            self.width,
            self.height,
            self.pixel_format.ffmpeg_name()
        )
    }

    async fn open(&mut self) -> CaptureResult<()> {
        self.next_frame_at = Some(Instant::now());
        tracing::debug!(source = %self.describe(), "Synthetic source opened");
        Ok(())
    }

    async fn read_frame(&mut self) -> CaptureResult<ReadOutcome> {
        let Some(due) = self.next_frame_at else {
            return Err(CaptureError::SourceRead("synthetic source not open".into()));
        };
        if self.frame_limit.is_some_and(|limit| self.produced >= limit) {
            return Ok(ReadOutcome::EndOfStream);
        }

        sleep_until(due).await;
        self.next_frame_at = Some(due + self.frame_interval);

        let frame = self.render(self.produced);
        self.produced += 1;
        Ok(ReadOutcome::Frame(frame))
    }

    async fn close(&mut self) {
        if self.next_frame_at.take().is_some() {
            tracing::debug!(frames = self.produced, "Synthetic source closed");
        }
    }
}
