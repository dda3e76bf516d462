//! Pixel operations shared by the capture, preview and persistence stages.
//!
//! Everything here works on `image::DynamicImage` so that 8-bit colour camera
//! frames and 16-bit sonar intensity frames flow through the same code.

use crate::calibration::CalibrationProfile;
use crate::error::CaptureResult;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageBuffer, Luma, Pixel, Rgb, RgbImage};

/// 16-bit single channel image.
pub type Gray16Image = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Resize to exactly `width` x `height` with bilinear filtering.
pub fn resize(frame: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    if frame.width() == width && frame.height() == height {
        return frame.clone();
    }
    frame.resize_exact(width, height, FilterType::Triangle)
}

/// Whether a frame stores more than one byte per channel.
pub fn is_high_dynamic_range(frame: &DynamicImage) -> bool {
    let color = frame.color();
    color.bytes_per_pixel() > color.channel_count()
}

/// Reduce a frame to a single intensity channel, keeping its bit depth.
pub fn to_intensity(frame: DynamicImage) -> DynamicImage {
    match frame {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageLuma16(_) => frame,
        other if is_high_dynamic_range(&other) => DynamicImage::ImageLuma16(other.to_luma16()),
        other => DynamicImage::ImageLuma8(other.to_luma8()),
    }
}

/// Stretch a 16-bit image to the full 8-bit range using its own min and max.
///
/// A flat image (max == min) maps to black.
pub fn normalize_to_u8(frame: &Gray16Image) -> GrayImage {
    let (min, max) = frame
        .as_raw()
        .iter()
        .fold((u16::MAX, u16::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));

    if frame.as_raw().is_empty() || max <= min {
        return GrayImage::new(frame.width(), frame.height());
    }

    let span = f64::from(max - min);
    let data = frame
        .as_raw()
        .iter()
        .map(|&v| ((f64::from(v - min) * 255.0 / span).round()) as u8)
        .collect();
    GrayImage::from_raw(frame.width(), frame.height(), data)
        .unwrap_or_else(|| GrayImage::new(frame.width(), frame.height()))
}

/// JET false-colour lookup for one intensity value.
pub fn jet(value: u8) -> Rgb<u8> {
    let v = f64::from(value) / 255.0;
    let channel = |centre: f64| {
        let c = 1.5 - (4.0 * v - centre).abs();
        (c.clamp(0.0, 1.0) * 255.0).round() as u8
    };
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

/// Map an 8-bit intensity image through the JET colour map.
pub fn apply_jet(frame: &GrayImage) -> RgbImage {
    RgbImage::from_fn(frame.width(), frame.height(), |x, y| {
        jet(frame.get_pixel(x, y).0[0])
    })
}

/// Turn a frame into something a human can look at.
///
/// High dynamic range frames are normalized to 8 bits and false-coloured;
/// everything else passes through unchanged.
pub fn to_displayable(frame: DynamicImage) -> DynamicImage {
    if !is_high_dynamic_range(&frame) {
        return frame;
    }
    let normalized = normalize_to_u8(&frame.to_luma16());
    DynamicImage::ImageRgb8(apply_jet(&normalized))
}

/// 8-bit representation suitable for a JPEG encoder, without false colour.
fn to_encodable(frame: &DynamicImage) -> DynamicImage {
    match frame {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => frame.clone(),
        DynamicImage::ImageLuma16(gray) => DynamicImage::ImageLuma8(normalize_to_u8(gray)),
        DynamicImage::ImageLumaA8(_) | DynamicImage::ImageLumaA16(_) => {
            DynamicImage::ImageLuma8(frame.to_luma8())
        }
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}

/// Encode a frame as JPEG at the given quality (1-100).
pub fn encode_jpeg(frame: &DynamicImage, quality: u8) -> CaptureResult<Vec<u8>> {
    let encodable = to_encodable(frame);
    let mut buffer = Vec::with_capacity(64 * 1024);
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
    encodable.write_with_encoder(encoder)?;
    Ok(buffer)
}

// =============================================================================
// Lens undistortion
// =============================================================================

/// Precomputed inverse mapping from undistorted to distorted pixel positions.
///
/// Equivalent to building a rectification map once and remapping every frame.
/// The map is rebuilt whenever the frame size changes.
#[derive(Debug, Clone)]
pub struct Undistorter {
    profile: CalibrationProfile,
    map: Option<UndistortMap>,
}

#[derive(Debug, Clone)]
struct UndistortMap {
    width: u32,
    height: u32,
    coords: Vec<(f32, f32)>,
}

impl Undistorter {
    /// Create an undistorter for a calibration profile.
    pub fn new(profile: CalibrationProfile) -> Self {
        Self { profile, map: None }
    }

    /// The profile this undistorter applies.
    pub fn profile(&self) -> &CalibrationProfile {
        &self.profile
    }

    /// Correct lens distortion, keeping the camera matrix for the output.
    pub fn undistort(&mut self, frame: &DynamicImage) -> DynamicImage {
        if !self.profile.has_distortion() {
            return frame.clone();
        }

        let (width, height) = (frame.width(), frame.height());
        let stale = self
            .map
            .as_ref()
            .map_or(true, |m| m.width != width || m.height != height);
        if stale {
            self.map = Some(UndistortMap::build(&self.profile, width, height));
        }
        let Some(map) = self.map.as_ref() else {
            return frame.clone();
        };

        match frame {
            DynamicImage::ImageLuma8(buf) => DynamicImage::ImageLuma8(map.remap(buf)),
            DynamicImage::ImageRgb8(buf) => DynamicImage::ImageRgb8(map.remap(buf)),
            other => DynamicImage::ImageRgb8(map.remap(&other.to_rgb8())),
        }
    }
}

impl UndistortMap {
    fn build(profile: &CalibrationProfile, width: u32, height: u32) -> Self {
        let k = &profile.camera_matrix;
        let (fx, skew, cx) = (k[0][0], k[0][1], k[0][2]);
        let (fy, cy) = (k[1][1], k[1][2]);
        let [k1, k2, p1, p2, k3] = profile.brown_conrady();

        let mut coords = Vec::with_capacity(width as usize * height as usize);
        for v in 0..height {
            for u in 0..width {
                let y = (f64::from(v) - cy) / fy;
                let x = (f64::from(u) - cx - skew * y) / fx;
                let r2 = x * x + y * y;
                let radial = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
                let xd = x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
                let yd = y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
                let src_u = fx * xd + skew * yd + cx;
                let src_v = fy * yd + cy;
                coords.push((src_u as f32, src_v as f32));
            }
        }

        Self {
            width,
            height,
            coords,
        }
    }

    /// Bilinear resampling; pixels mapped outside the source are black.
    fn remap<P>(&self, src: &ImageBuffer<P, Vec<u8>>) -> ImageBuffer<P, Vec<u8>>
    where
        P: Pixel<Subpixel = u8>,
    {
        let channels = usize::from(P::CHANNEL_COUNT);
        let (w, h) = (src.width() as usize, src.height() as usize);
        if w == 0 || h == 0 || self.coords.len() != w * h {
            return src.clone();
        }
        let raw = src.as_raw();
        let mut out = vec![0u8; w * h * channels];

        for (idx, &(su, sv)) in self.coords.iter().enumerate() {
            if su < 0.0 || sv < 0.0 || su > (w - 1) as f32 || sv > (h - 1) as f32 {
                continue;
            }
            let (x0, y0) = (su.floor() as usize, sv.floor() as usize);
            let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
            let (fx, fy) = (su - x0 as f32, sv - y0 as f32);

            for c in 0..channels {
                let at = |x: usize, y: usize| f32::from(raw[(y * w + x) * channels + c]);
                let top = at(x0, y0) * (1.0 - fx) + at(x1, y0) * fx;
                let bottom = at(x0, y1) * (1.0 - fx) + at(x1, y1) * fx;
                out[idx * channels + c] = (top * (1.0 - fy) + bottom * fy).round() as u8;
            }
        }

        ImageBuffer::from_raw(src.width(), src.height(), out)
            .unwrap_or_else(|| ImageBuffer::new(src.width(), src.height()))
    }
}
