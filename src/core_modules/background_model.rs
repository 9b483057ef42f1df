// THEORY:
// The `BackgroundModel` is the stateful, learning half of the motion
// detector. It maintains a per-pixel mixture of Gaussians that statistically
// describes the "empty scene": each pixel carries a small set of weighted
// modes (mean BGR color + variance), and every incoming frame both
// classifies the pixel against those modes and folds the observation back
// into them.
//
// Key architectural principles:
// 1.  **Exclusive Ownership**: The model is owned and mutated only by the
//     `MotionDetector`. It is never shared between threads and never reset
//     between frames; its memory *is* the scene.
// 2.  **Adaptive Learning**: The effective learning rate starts high (every
//     early frame reshapes the model quickly) and settles at 1/history, so
//     a parked object is eventually absorbed into the background while a
//     moving one keeps standing out.
// 3.  **Mask Convention**: `apply` emits the standard subtractor mask values:
//     0 for background, 127 for shadow, 255 for foreground. Shadows are
//     pixels that look like a uniformly darkened version of a background
//     mode; downstream decision logic treats them as background.
// 4.  **Weight-Ordered Modes**: Modes are kept sorted by weight so that the
//     background set is always a prefix of the per-pixel mode list, which
//     makes the foreground decision a single cumulative-weight scan.

use crate::core_modules::frame::Frame;
use crate::error::{Result, VisionError};
use image::GrayImage;

/// Mask value for shadow-labelled pixels.
pub const SHADOW_VALUE: u8 = 127;
/// Mask value for foreground pixels.
pub const FOREGROUND_VALUE: u8 = 255;

/// Maximum number of Gaussian modes tracked per pixel.
const MAX_MODES: usize = 3;
/// Default length of the learning window, in frames.
const DEFAULT_HISTORY: u32 = 500;
/// Default squared-distance threshold for matching a mode, scaled by the
/// mode's variance.
const DEFAULT_VAR_THRESHOLD: f32 = 16.0;
/// Variance assigned to a freshly created mode.
const INITIAL_VARIANCE: f32 = 15.0;
/// Variance floor, so a perfectly static history still tolerates sensor noise.
const MIN_VARIANCE: f32 = 4.0;
/// Variance ceiling, so one noisy burst cannot blow a mode wide open.
const MAX_VARIANCE: f32 = 5.0 * INITIAL_VARIANCE;
/// Cumulative weight that separates background modes from foreground modes.
const BACKGROUND_RATIO: f32 = 0.9;
/// Minimum brightness ratio for a pixel to qualify as a shadow of a
/// background mode. Ratios below this are genuine foreground.
const SHADOW_TAU: f32 = 0.5;

/// One weighted Gaussian mode of a pixel's color distribution.
#[derive(Debug, Clone, Copy)]
struct Mode {
    weight: f32,
    mean: [f32; 3],
    variance: f32,
}

impl Mode {
    fn empty() -> Self {
        Self {
            weight: 0.0,
            mean: [0.0; 3],
            variance: INITIAL_VARIANCE,
        }
    }

    fn squared_distance(&self, bgr: [f32; 3]) -> f32 {
        let db = bgr[0] - self.mean[0];
        let dg = bgr[1] - self.mean[1];
        let dr = bgr[2] - self.mean[2];
        db * db + dg * dg + dr * dr
    }
}

/// Per-pixel mixture-of-Gaussians background subtractor with shadow
/// detection.
pub struct BackgroundModel {
    width: u32,
    height: u32,
    history: u32,
    var_threshold: f32,
    detect_shadows: bool,
    frames_seen: u32,
    /// Flat mode storage, `MAX_MODES` slots per pixel, weight-sorted within
    /// each pixel's used range.
    modes: Vec<Mode>,
    /// Number of live modes per pixel.
    modes_used: Vec<u8>,
}

impl BackgroundModel {
    /// Creates a model with the standard surveillance parameters
    /// (history 500, variance threshold 16, shadows on).
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_params(width, height, DEFAULT_HISTORY, DEFAULT_VAR_THRESHOLD, true)
    }

    pub fn with_params(
        width: u32,
        height: u32,
        history: u32,
        var_threshold: f32,
        detect_shadows: bool,
    ) -> Self {
        let pixels = (width * height) as usize;
        Self {
            width,
            height,
            history: history.max(1),
            var_threshold,
            detect_shadows,
            frames_seen: 0,
            modes: vec![Mode::empty(); pixels * MAX_MODES],
            modes_used: vec![0; pixels],
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Updates the model with `frame` and returns the foreground mask
    /// (0 background, 127 shadow, 255 foreground).
    pub fn apply(&mut self, frame: &Frame) -> Result<GrayImage> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(VisionError::InvalidInput(format!(
                "frame size {}x{} does not match background model {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }

        self.frames_seen = (self.frames_seen + 1).min(self.history);
        let alpha = 1.0 / self.frames_seen as f32;

        let mut mask = GrayImage::new(self.width, self.height);
        let buf: &mut [u8] = &mut mask;

        for (pixel_index, bgr) in frame.data().chunks_exact(3).enumerate() {
            let x = [bgr[0] as f32, bgr[1] as f32, bgr[2] as f32];
            buf[pixel_index] = self.classify_and_update(pixel_index, x, alpha);
        }

        Ok(mask)
    }

    /// Runs the full match/update/sort/decide sequence for one pixel and
    /// returns its mask value.
    fn classify_and_update(&mut self, pixel_index: usize, x: [f32; 3], alpha: f32) -> u8 {
        let base = pixel_index * MAX_MODES;
        let mut used = self.modes_used[pixel_index] as usize;

        // --- 1. Match ---
        // Modes are weight-sorted, so the first passing mode is the most
        // plausible explanation of the observation.
        let mut matched: Option<usize> = None;
        for k in 0..used {
            let mode = &self.modes[base + k];
            if mode.squared_distance(x) < self.var_threshold * mode.variance {
                matched = Some(k);
                break;
            }
        }

        // --- 2. Update ---
        for k in 0..used {
            self.modes[base + k].weight *= 1.0 - alpha;
        }
        let mut decided_index = matched;
        match matched {
            Some(k) => {
                let mode = &mut self.modes[base + k];
                mode.weight += alpha;
                let rho = (alpha / mode.weight).min(1.0);
                let d2 = mode.squared_distance(x);
                for c in 0..3 {
                    mode.mean[c] += rho * (x[c] - mode.mean[c]);
                }
                mode.variance =
                    (mode.variance + rho * (d2 - mode.variance)).clamp(MIN_VARIANCE, MAX_VARIANCE);
            }
            None => {
                // Unexplained observation: open a new mode, evicting the
                // weakest one if the pixel is already at capacity.
                let slot = if used < MAX_MODES {
                    used += 1;
                    self.modes_used[pixel_index] = used as u8;
                    used - 1
                } else {
                    used - 1
                };
                self.modes[base + slot] = Mode {
                    weight: alpha,
                    mean: x,
                    variance: INITIAL_VARIANCE,
                };
                decided_index = Some(slot);
            }
        }

        // Renormalize so the per-pixel weights always sum to one.
        let total: f32 = (0..used).map(|k| self.modes[base + k].weight).sum();
        if total > 0.0 {
            for k in 0..used {
                self.modes[base + k].weight /= total;
            }
        }

        // --- 3. Re-sort ---
        // Only the decided mode's relative weight increased, so bubbling it
        // toward the front restores the weight ordering.
        if let Some(mut k) = decided_index {
            while k > 0 && self.modes[base + k].weight > self.modes[base + k - 1].weight {
                self.modes.swap(base + k, base + k - 1);
                k -= 1;
            }
            decided_index = Some(k);
        }

        // --- 4. Decide ---
        // The background set is the shortest weight-sorted prefix whose
        // cumulative weight exceeds the background ratio.
        let mut cumulative = 0.0;
        let mut background_prefix = used;
        for k in 0..used {
            cumulative += self.modes[base + k].weight;
            if cumulative > BACKGROUND_RATIO {
                background_prefix = k + 1;
                break;
            }
        }

        match (matched, decided_index) {
            // A brand-new pixel's very first mode is trivially background.
            (None, Some(_)) if used == 1 => 0,
            (Some(_), Some(k)) if k < background_prefix => 0,
            _ => {
                if self.detect_shadows
                    && self.is_shadow_of_background(base, background_prefix, x)
                {
                    SHADOW_VALUE
                } else {
                    FOREGROUND_VALUE
                }
            }
        }
    }

    /// Tests whether `x` is a uniformly darkened version of one of the
    /// pixel's background modes.
    fn is_shadow_of_background(&self, base: usize, background_prefix: usize, x: [f32; 3]) -> bool {
        for k in 0..background_prefix {
            let mode = &self.modes[base + k];
            let numerator: f32 = (0..3).map(|c| x[c] * mode.mean[c]).sum();
            let denominator: f32 = (0..3).map(|c| mode.mean[c] * mode.mean[c]).sum();
            if denominator <= f32::EPSILON {
                continue;
            }
            let ratio = numerator / denominator;
            if !(SHADOW_TAU..1.0).contains(&ratio) {
                continue;
            }
            let dist2: f32 = (0..3)
                .map(|c| {
                    let d = ratio * mode.mean[c] - x[c];
                    d * d
                })
                .sum();
            if dist2 < self.var_threshold * mode.variance * ratio * ratio {
                return true;
            }
        }
        false
    }
}
