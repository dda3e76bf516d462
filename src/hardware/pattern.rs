//! Deterministic test pattern for the synthetic source.

/// Simple pseudo-random number generator (LCG) for reproducible noise.
#[inline]
fn prng(seed: u64) -> u64 {
    seed.wrapping_mul(1103515245).wrapping_add(12345) & 0x7fffffff
}

/// Generates a 16-bit diagnostic frame.
///
/// Layers, bottom to top:
/// - checkerboard background with per-frame noise
/// - left-to-right gradient bar along the top edge
/// - Gaussian hotspot orbiting the centre (one revolution every ~125 frames)
///
/// Small frames (under 32 pixels on a side) get a plain diagonal gradient.
pub fn generate(width: u32, height: u32, frame_num: u64) -> Vec<u16> {
    let w = width as usize;
    let h = height as usize;
    let mut buffer = vec![0u16; w * h];

    if w < 32 || h < 32 {
        for y in 0..h {
            for x in 0..w {
                buffer[y * w + x] = ((x + y) * 65535 / (w + h).max(1)) as u16;
            }
        }
        return buffer;
    }

    let checker = (width.min(height) / 16).max(1) as usize;
    let bar_height = (h / 10).max(1);

    let cx = w as f64 / 2.0;
    let cy = h as f64 / 2.0;
    let orbit = width.min(height) as f64 / 4.0;
    let angle = (frame_num as f64 * 0.05) % std::f64::consts::TAU;
    let hot_x = cx + orbit * angle.cos();
    let hot_y = cy + orbit * angle.sin();
    let sigma = (width.min(height) as f64 / 12.0).max(2.0);
    let two_sigma_sq = 2.0 * sigma * sigma;

    let frame_seed = frame_num.wrapping_mul(2654435761);

    for y in 0..h {
        for x in 0..w {
            let idx = y * w + x;

            let noise = ((prng(frame_seed ^ idx as u64) & 0xFFF) as i32) - 2048;
            let base: i32 = if ((x / checker) + (y / checker)) % 2 == 0 {
                16384
            } else {
                19660
            };
            let mut value = base + noise;

            if y < bar_height {
                value = (x * 65535 / w) as i32;
            }

            let dx = x as f64 - hot_x;
            let dy = y as f64 - hot_y;
            let hotspot = (-(dx * dx + dy * dy) / two_sigma_sq).exp() * 45000.0;
            value += hotspot as i32;

            buffer[idx] = value.clamp(0, 65535) as u16;
        }
    }

    buffer
}
