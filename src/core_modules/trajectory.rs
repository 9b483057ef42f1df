// THEORY:
// The `TrajectoryTrace` gives the pipeline a lightweight spatial memory of
// where motion has been. Every frame on which the background-model detector
// fires contributes one projected point: the center of the largest
// qualifying region, scaled from frame coordinates into a small fixed-size
// trajectory canvas. Consecutive points are joined with line segments, so
// the canvas accumulates a polyline of the intruder's path over time.
//
// Key architectural principles:
// 1.  **Append-Only**: Points are only ever appended. The trace is cleared
//     exclusively by an explicit user action, never by the pipeline itself.
// 2.  **Projection at the Boundary**: Callers hand in frame-space centers;
//     the trace owns the scaling into canvas space, so the canvas size is
//     an internal concern of this module.
// 3.  **Render As You Go**: The overlay image is updated incrementally on
//     each append instead of being re-rendered from the point list, keeping
//     the per-frame cost constant.

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;

/// Polyline color on the overlay canvas.
const TRACE_COLOR: Rgb<u8> = Rgb([255, 255, 0]);

/// An append-only trace of projected motion centers plus its rendered
/// overlay canvas.
pub struct TrajectoryTrace {
    canvas: RgbImage,
    points: Vec<(f32, f32)>,
}

impl TrajectoryTrace {
    pub fn new(canvas_width: u32, canvas_height: u32) -> Self {
        Self {
            canvas: RgbImage::new(canvas_width, canvas_height),
            points: Vec::new(),
        }
    }

    /// Scales a frame-space center into canvas coordinates.
    pub fn project(&self, frame_width: u32, frame_height: u32, center: (u32, u32)) -> (f32, f32) {
        let x = center.0 as f32 * self.canvas.width() as f32 / frame_width.max(1) as f32;
        let y = center.1 as f32 * self.canvas.height() as f32 / frame_height.max(1) as f32;
        (x, y)
    }

    /// Appends a projected point and extends the rendered polyline from the
    /// previous point, if one exists.
    pub fn record(&mut self, point: (f32, f32)) {
        if let Some(&previous) = self.points.last() {
            draw_line_segment_mut(&mut self.canvas, previous, point, TRACE_COLOR);
        }
        self.points.push(point);
    }

    /// Resets both the point list and the canvas. Explicit user action only.
    pub fn clear(&mut self) {
        self.points.clear();
        self.canvas = RgbImage::new(self.canvas.width(), self.canvas.height());
    }

    pub fn points(&self) -> &[(f32, f32)] {
        &self.points
    }

    pub fn canvas(&self) -> &RgbImage {
        &self.canvas
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_scales_to_canvas_space() {
        let trace = TrajectoryTrace::new(320, 240);
        let projected = trace.project(640, 480, (320, 240));
        assert_eq!(projected, (160.0, 120.0));
    }

    #[test]
    fn recording_two_points_draws_a_segment() {
        let mut trace = TrajectoryTrace::new(64, 64);
        trace.record((10.0, 10.0));
        // A single point draws nothing.
        assert!(trace.canvas().pixels().all(|p| *p == Rgb([0, 0, 0])));

        trace.record((50.0, 50.0));
        assert_eq!(trace.points().len(), 2);
        let lit = trace
            .canvas()
            .pixels()
            .filter(|p| **p == TRACE_COLOR)
            .count();
        assert!(lit > 0);
    }

    #[test]
    fn clear_resets_points_and_canvas() {
        let mut trace = TrajectoryTrace::new(64, 64);
        trace.record((1.0, 1.0));
        trace.record((60.0, 60.0));
        trace.clear();
        assert!(trace.points().is_empty());
        assert!(trace.canvas().pixels().all(|p| *p == Rgb([0, 0, 0])));
    }
}
