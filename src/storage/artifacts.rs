//! Per-modality artifact writers.

use crate::calibration::CalibrationProfile;
use crate::data::{Modality, Sample};
use crate::error::CaptureResult;
use crate::imaging::{self, Undistorter};
use crate::storage::{ArtifactWriter, Session};
use image::DynamicImage;
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// Camera: lens-corrected JPEG per sample plus one shared timestamp index.
///
/// The index line for a sample is appended only after its image was written, so
/// every index entry has an image behind it.
#[derive(Debug)]
pub struct CameraArtifacts {
    images_dir: PathBuf,
    index_path: PathBuf,
    index: Option<BufWriter<File>>,
    undistorter: Undistorter,
    quality: u8,
}

impl CameraArtifacts {
    /// Write into `session` using `calibration`, encoding at `quality`.
    pub fn new(session: &Session, calibration: CalibrationProfile, quality: u8) -> Self {
        Self {
            images_dir: session.images_dir(Modality::Camera),
            index_path: session.modality_dir(Modality::Camera).join("timestamps.txt"),
            index: None,
            undistorter: Undistorter::new(calibration),
            quality,
        }
    }
}

impl ArtifactWriter for CameraArtifacts {
    fn prepare(&mut self) -> CaptureResult<()> {
        fs::create_dir_all(&self.images_dir)?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.index_path)?;
        self.index = Some(BufWriter::new(file));
        tracing::info!(images = %self.images_dir.display(), "Camera session ready");
        Ok(())
    }

    fn write(&mut self, seq: u64, sample: &Sample) -> CaptureResult<()> {
        let corrected = self.undistorter.undistort(&sample.frame);
        let jpeg = imaging::encode_jpeg(&corrected, self.quality)?;
        fs::write(self.images_dir.join(Session::image_name(seq)), jpeg)?;

        if let Some(index) = self.index.as_mut() {
            writeln!(index, "image{} {}", seq, sample.timestamp_ms)?;
            index.flush()?;
        }
        Ok(())
    }

    fn finish(&mut self) -> CaptureResult<()> {
        if let Some(mut index) = self.index.take() {
            index.flush()?;
        }
        Ok(())
    }
}

/// Sonar: displayable JPEG plus a raw intensity dump per sample.
///
/// `raw/frame<seq>.txt` starts with the `image<seq> <timestamp_ms>` index line,
/// followed by the intensity matrix in row-major text form:
///
/// ```text
/// image0 1718000000123
/// [ 12,  40;
///    7, 255]
/// ```
#[derive(Debug)]
pub struct SonarArtifacts {
    images_dir: PathBuf,
    raw_dir: PathBuf,
    quality: u8,
}

impl SonarArtifacts {
    /// Write into `session`, encoding images at `quality`.
    pub fn new(session: &Session, quality: u8) -> Self {
        Self {
            images_dir: session.images_dir(Modality::Sonar),
            raw_dir: session.modality_dir(Modality::Sonar).join("raw"),
            quality,
        }
    }
}

impl ArtifactWriter for SonarArtifacts {
    fn prepare(&mut self) -> CaptureResult<()> {
        fs::create_dir_all(&self.images_dir)?;
        fs::create_dir_all(&self.raw_dir)?;
        tracing::info!(images = %self.images_dir.display(), raw = %self.raw_dir.display(), "Sonar session ready");
        Ok(())
    }

    fn write(&mut self, seq: u64, sample: &Sample) -> CaptureResult<()> {
        let jpeg = imaging::encode_jpeg(&sample.frame, self.quality)?;
        fs::write(self.images_dir.join(Session::image_name(seq)), jpeg)?;

        let mut text = format!("image{} {}\n", seq, sample.timestamp_ms);
        text.push_str(&format_matrix(&sample.frame));
        text.push_str("\n\n");
        fs::write(self.raw_dir.join(format!("frame{seq}.txt")), text)?;
        Ok(())
    }

    fn finish(&mut self) -> CaptureResult<()> {
        Ok(())
    }
}

/// Render an intensity frame as `[a, b;\n c, d]`, values right-aligned.
///
/// 16-bit frames keep their full values; anything else is reduced to 8-bit luma.
pub fn format_matrix(frame: &DynamicImage) -> String {
    let (values, width): (Vec<u32>, usize) = match frame {
        DynamicImage::ImageLuma16(gray) => (gray.as_raw().iter().map(|&v| u32::from(v)).collect(), 5),
        other => (other.to_luma8().into_raw().into_iter().map(u32::from).collect(), 3),
    };
    let columns = frame.width() as usize;
    if columns == 0 || values.is_empty() {
        return "[]".to_string();
    }

    let mut out = String::with_capacity(values.len() * (width + 2) + 2);
    out.push('[');
    for (row_idx, row) in values.chunks(columns).enumerate() {
        if row_idx > 0 {
            out.push_str(";\n ");
        }
        for (col_idx, value) in row.iter().enumerate() {
            if col_idx > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{value:>width$}");
        }
    }
    out.push(']');
    out
}
