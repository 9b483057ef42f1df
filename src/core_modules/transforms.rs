// THEORY:
// The `transforms` module collects the stateless, per-frame display
// transforms of the pipeline: operator-controlled HSV adjustment, the two
// low-light renderings (green night vision and pseudo-thermal false color),
// and the luminosity measure the driver uses to auto-select night mode.
//
// Key architectural principles:
// 1.  **Pure Functions**: Every transform maps one frame to a new frame.
//     No state, no failure modes beyond the dimension invariants `Frame`
//     itself already enforces.
// 2.  **8-bit HSV Convention**: Hue lives in [0, 180) so it fits a byte,
//     which makes the hue shift exactly periodic: a shift of +/-180 is the
//     identity. Saturation and value shifts clamp to [0, 255].
// 3.  **Identity Fast Path**: An all-zero effective adjustment returns the
//     input unchanged instead of paying for a lossy HSV round trip.

use crate::core_modules::frame::Frame;
use image::{Rgb, RgbImage};
use imageproc::contrast::equalize_histogram;
use imageproc::filter::gaussian_blur_f32;

/// Hue wraps modulo this many 8-bit hue units (2 degrees each).
const HUE_PERIOD: i32 = 180;
/// Sigma equivalent to the classic 7x7 Gaussian kernel.
const NIGHT_BLUR_SIGMA: f32 = 1.1;
/// Sigma equivalent to the classic 9x9 Gaussian kernel.
const THERMAL_BLUR_SIGMA: f32 = 1.7;

/// Converts a BGR triple to 8-bit HSV (hue in [0, 180)).
pub fn bgr_to_hsv(bgr: [u8; 3]) -> [u8; 3] {
    let b = bgr[0] as f32;
    let g = bgr[1] as f32;
    let r = bgr[2] as f32;
    let max = b.max(g).max(r);
    let min = b.min(g).min(r);
    let delta = max - min;

    let v = max;
    let s = if max > 0.0 { 255.0 * delta / max } else { 0.0 };
    let mut h = if delta == 0.0 {
        0.0
    } else if max == r {
        30.0 * (g - b) / delta
    } else if max == g {
        60.0 + 30.0 * (b - r) / delta
    } else {
        120.0 + 30.0 * (r - g) / delta
    };
    if h < 0.0 {
        h += 180.0;
    }

    [
        (h.round() as i32).rem_euclid(HUE_PERIOD) as u8,
        s.round().clamp(0.0, 255.0) as u8,
        v.round().clamp(0.0, 255.0) as u8,
    ]
}

/// Converts an 8-bit HSV triple (hue in [0, 180)) back to BGR.
pub fn hsv_to_bgr(hsv: [u8; 3]) -> [u8; 3] {
    let h = hsv[0] as f32 * 2.0; // degrees
    let s = hsv[1] as f32 / 255.0;
    let v = hsv[2] as f32;

    if s == 0.0 {
        let gray = v.round() as u8;
        return [gray, gray, gray];
    }

    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;
    let (r1, g1, b1) = match (h / 60.0) as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    [
        (b1 + m).round().clamp(0.0, 255.0) as u8,
        (g1 + m).round().clamp(0.0, 255.0) as u8,
        (r1 + m).round().clamp(0.0, 255.0) as u8,
    ]
}

/// Applies an operator-controlled hue/saturation/value adjustment.
/// Hue wraps modulo 180; saturation and value clamp to [0, 255].
pub fn hsv_shift(frame: &Frame, hue_shift: i32, sat_shift: i32, val_shift: i32) -> Frame {
    let hue_shift = hue_shift.rem_euclid(HUE_PERIOD);
    if hue_shift == 0 && sat_shift == 0 && val_shift == 0 {
        return frame.clone();
    }

    let (width, height) = frame.dimensions();
    let mut out = frame.clone();
    for y in 0..height {
        for x in 0..width {
            let [h, s, v] = bgr_to_hsv(frame.pixel(x, y));
            let h = ((h as i32 + hue_shift).rem_euclid(HUE_PERIOD)) as u8;
            let s = (s as i32 + sat_shift).clamp(0, 255) as u8;
            let v = (v as i32 + val_shift).clamp(0, 255) as u8;
            out.set_pixel(x, y, hsv_to_bgr([h, s, v]));
        }
    }
    out
}

/// Green night-vision rendering: grayscale, histogram equalization, the
/// equalized intensity rendered into the green channel, then a soft blur.
pub fn night_vision(frame: &Frame) -> Frame {
    let equalized = equalize_histogram(&frame.to_luma());
    let mut green = RgbImage::new(frame.width(), frame.height());
    for (dst, src) in green.pixels_mut().zip(equalized.pixels()) {
        *dst = Rgb([0, src[0], 0]);
    }
    let blurred = gaussian_blur_f32(&green, NIGHT_BLUR_SIGMA);
    Frame::from_rgb_image(&blurred)
}

/// Pseudo-thermal rendering: grayscale, min-max normalization to stretch
/// contrast, a blur to suppress thermal-looking noise, then an HSV
/// false-color map.
pub fn thermal(frame: &Frame) -> Frame {
    let gray = frame.to_luma();
    let min = gray.pixels().map(|p| p[0]).min().unwrap_or(0);
    let max = gray.pixels().map(|p| p[0]).max().unwrap_or(0);

    let mut normalized = gray;
    if max > min {
        let scale = 255.0 / (max - min) as f32;
        for px in normalized.pixels_mut() {
            px[0] = ((px[0] - min) as f32 * scale).round() as u8;
        }
    } else {
        for px in normalized.pixels_mut() {
            px[0] = 0;
        }
    }

    let blurred = gaussian_blur_f32(&normalized, THERMAL_BLUR_SIGMA);

    let mut out = Frame::black(frame.width(), frame.height());
    for y in 0..frame.height() {
        for x in 0..frame.width() {
            let intensity = blurred.get_pixel(x, y)[0];
            let hue = (intensity as f32 * HUE_PERIOD as f32 / 256.0) as u8;
            out.set_pixel(x, y, hsv_to_bgr([hue, 255, 255]));
        }
    }
    out
}

/// Mean grayscale intensity of the frame, used to auto-select night mode.
pub fn luminosity(frame: &Frame) -> f64 {
    let gray = frame.to_luma();
    let sum: u64 = gray.pixels().map(|p| p[0] as u64).sum();
    sum as f64 / (gray.width() as u64 * gray.height() as u64) as f64
}
