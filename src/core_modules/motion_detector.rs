// THEORY:
// The `MotionDetector` fuses two independent motion signals into one
// consensus verdict. The first signal comes from the statistical
// background model (good at "something is here that the empty scene never
// had"), the second from a plain previous-frame difference (good at
// "something just changed"). Either signal alone is noisy (lighting
// drift fools the model, sensor noise fools the differencer), so motion
// is only declared when BOTH agree.
//
// Key architectural principles:
// 1.  **Consensus Policy**: `combined == model_motion && diff_motion`,
//     always. On the first frame of a stream there is no previous frame,
//     the diff signal is false, and therefore combined is false: first-
//     frame motion is never reported. That conservative bias is part of
//     the contract, not an accident.
// 2.  **Exclusive Model Ownership**: The detector owns its
//     `BackgroundModel` outright. Nothing else updates or reads it.
// 3.  **Shadows Are Background**: Shadow-labelled mask pixels are zeroed
//     before cleanup, so a shadow sweeping across the floor does not
//     qualify a region.
// 4.  **Any Qualifying Region Counts**: Both signals ask whether any
//     cleaned region meets the minimum area, and
//     every qualifying region's box is drawn on the annotated frame. The
//     trajectory takes one point per firing frame, from the largest
//     region.

use crate::core_modules::background_model::{BackgroundModel, SHADOW_VALUE};
use crate::core_modules::frame::Frame;
use crate::core_modules::region::{clean_mask, find_regions};
use crate::core_modules::trajectory::TrajectoryTrace;
use crate::error::{Result, VisionError};
use image::Rgb;
use imageproc::contrast::{threshold, ThresholdType};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

/// Binary threshold applied to the grayscale frame difference.
const DIFF_THRESHOLD: u8 = 25;
/// Bounding-box color on the annotated frame (green).
const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// The per-frame output of the consensus detector.
#[derive(Debug, Clone)]
pub struct MotionVerdict {
    /// The background-model signal: some region the empty scene never had.
    pub model_motion: bool,
    /// The frame-difference signal: some region just changed.
    pub diff_motion: bool,
    /// The consensus: both signals agree. Never true unless both are.
    pub combined: bool,
    /// Bounding boxes of every qualifying model-side region, largest first.
    pub boxes: Vec<Rect>,
    /// The projected trajectory point appended this frame, if any.
    pub trajectory_point: Option<(f32, f32)>,
}

/// A verdict together with the annotated copy of the input frame.
pub struct Evaluation {
    pub verdict: MotionVerdict,
    pub annotated: Frame,
}

/// Dual-signal motion detector. Owns the background model exclusively.
pub struct MotionDetector {
    background: BackgroundModel,
}

impl MotionDetector {
    pub fn new(frame_width: u32, frame_height: u32) -> Self {
        Self {
            background: BackgroundModel::new(frame_width, frame_height),
        }
    }

    /// Evaluates one frame against the background model and the previous
    /// frame. Updates the model, draws qualifying boxes on the annotated
    /// output, and appends to the trajectory trace when one is supplied.
    ///
    /// Mismatched frame sizes are a precondition violation and fail fast.
    pub fn evaluate(
        &mut self,
        frame: &Frame,
        previous: Option<&Frame>,
        min_area: u32,
        trajectory: Option<&mut TrajectoryTrace>,
    ) -> Result<Evaluation> {
        if let Some(prev) = previous {
            if !frame.same_dimensions(prev) {
                return Err(VisionError::InvalidInput(format!(
                    "previous frame is {}x{} but current frame is {}x{}",
                    prev.width(),
                    prev.height(),
                    frame.width(),
                    frame.height()
                )));
            }
        }

        // --- 1. Background-model signal ---
        let mut mask = self.background.apply(frame)?;
        for px in mask.pixels_mut() {
            if px[0] == SHADOW_VALUE {
                px[0] = 0;
            }
        }
        let model_regions = find_regions(&clean_mask(&mask), min_area);
        let model_motion = !model_regions.is_empty();

        // --- 2. Annotation and trajectory ---
        let mut canvas = frame.to_rgb_image();
        let boxes: Vec<Rect> = model_regions.iter().map(|r| r.bounding_box).collect();
        for rect in &boxes {
            draw_box(&mut canvas, *rect);
        }

        let mut trajectory_point = None;
        if model_motion {
            if let Some(trace) = trajectory {
                // Regions are sorted largest first.
                let point = trace.project(frame.width(), frame.height(), model_regions[0].center);
                trace.record(point);
                trajectory_point = Some(point);
            }
        }

        // --- 3. Frame-difference signal ---
        let diff_motion = match previous {
            Some(prev) => {
                let diff = frame.abs_diff(prev)?;
                let binary = threshold(&diff, DIFF_THRESHOLD, ThresholdType::Binary);
                !find_regions(&clean_mask(&binary), min_area).is_empty()
            }
            None => false,
        };

        // --- 4. Consensus ---
        let combined = model_motion && diff_motion;

        Ok(Evaluation {
            verdict: MotionVerdict {
                model_motion,
                diff_motion,
                combined,
                boxes,
                trajectory_point,
            },
            annotated: Frame::from_rgb_image(&canvas),
        })
    }
}

/// Draws a 2-pixel-thick hollow rectangle.
fn draw_box(canvas: &mut image::RgbImage, rect: Rect) {
    draw_hollow_rect_mut(canvas, rect, BOX_COLOR);
    if rect.width() > 2 && rect.height() > 2 {
        let inner = Rect::at(rect.left() + 1, rect.top() + 1)
            .of_size(rect.width() - 2, rect.height() - 2);
        draw_hollow_rect_mut(canvas, inner, BOX_COLOR);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZE: u32 = 64;
    const MIN_AREA: u32 = 200;

    fn background_frame() -> Frame {
        Frame::filled(SIZE, SIZE, [60, 60, 60])
    }

    fn intruder_frame() -> Frame {
        let mut frame = background_frame();
        for y in 20..44 {
            for x in 20..44 {
                frame.set_pixel(x, y, [0, 0, 220]);
            }
        }
        frame
    }

    fn warmed_detector() -> MotionDetector {
        let mut detector = MotionDetector::new(SIZE, SIZE);
        let bg = background_frame();
        for _ in 0..30 {
            detector.evaluate(&bg, Some(&bg), MIN_AREA, None).unwrap();
        }
        detector
    }

    #[test]
    fn first_frame_never_reports_combined_motion() {
        let mut detector = MotionDetector::new(SIZE, SIZE);
        let evaluation = detector
            .evaluate(&intruder_frame(), None, MIN_AREA, None)
            .unwrap();
        assert!(!evaluation.verdict.diff_motion);
        assert!(!evaluation.verdict.combined);
    }

    #[test]
    fn mismatched_previous_frame_fails_fast() {
        let mut detector = MotionDetector::new(SIZE, SIZE);
        let frame = background_frame();
        let wrong = Frame::black(32, 32);
        assert!(matches!(
            detector.evaluate(&frame, Some(&wrong), MIN_AREA, None),
            Err(VisionError::InvalidInput(_))
        ));
    }

    #[test]
    fn both_signals_agree_on_a_moving_intruder() {
        let mut detector = warmed_detector();
        let previous = background_frame();
        let current = intruder_frame();

        let evaluation = detector
            .evaluate(&current, Some(&previous), MIN_AREA, None)
            .unwrap();
        let verdict = &evaluation.verdict;
        assert!(verdict.model_motion);
        assert!(verdict.diff_motion);
        assert!(verdict.combined);
        assert!(!verdict.boxes.is_empty());

        // The box sits on the intruder, give or take the morphology.
        let rect = verdict.boxes[0];
        assert!(rect.left() >= 16 && rect.left() <= 24);
        assert!(rect.top() >= 16 && rect.top() <= 24);
    }

    #[test]
    fn shadows_do_not_qualify_as_model_motion() {
        let mut detector = MotionDetector::new(SIZE, SIZE);
        let bright = Frame::filled(SIZE, SIZE, [200, 200, 200]);
        for _ in 0..30 {
            detector.evaluate(&bright, Some(&bright), MIN_AREA, None).unwrap();
        }

        // A uniform 0.6x darkening reads as shadow on every pixel; shadow
        // labels are zeroed out of the decision mask, so no region forms.
        let shadowed = Frame::filled(SIZE, SIZE, [120, 120, 120]);
        let evaluation = detector
            .evaluate(&shadowed, Some(&shadowed), MIN_AREA, None)
            .unwrap();
        let verdict = &evaluation.verdict;
        assert!(!verdict.model_motion);
        assert!(verdict.boxes.is_empty());
        assert!(!verdict.combined);
    }

    #[test]
    fn model_signal_alone_is_not_motion() {
        let mut detector = warmed_detector();
        // The intruder is present in both the current and previous frame,
        // so the difference signal stays silent.
        let current = intruder_frame();
        let previous = intruder_frame();

        let evaluation = detector
            .evaluate(&current, Some(&previous), MIN_AREA, None)
            .unwrap();
        let verdict = &evaluation.verdict;
        assert!(verdict.model_motion);
        assert!(!verdict.diff_motion);
        assert!(!verdict.combined);
    }

    #[test]
    fn diff_signal_alone_is_not_motion() {
        let mut detector = warmed_detector();
        // The previous frame had an intruder, the current one matches the
        // learned background: the difference fires, the model does not.
        let current = background_frame();
        let previous = intruder_frame();

        let evaluation = detector
            .evaluate(&current, Some(&previous), MIN_AREA, None)
            .unwrap();
        let verdict = &evaluation.verdict;
        assert!(!verdict.model_motion);
        assert!(verdict.diff_motion);
        assert!(!verdict.combined);
    }

    #[test]
    fn firing_model_signal_appends_one_trajectory_point() {
        let mut detector = warmed_detector();
        let mut trace = TrajectoryTrace::new(32, 32);
        let previous = background_frame();
        let current = intruder_frame();

        let evaluation = detector
            .evaluate(&current, Some(&previous), MIN_AREA, Some(&mut trace))
            .unwrap();
        assert_eq!(trace.points().len(), 1);
        let point = evaluation.verdict.trajectory_point.unwrap();
        // Intruder center (~31, ~31) projected into the 32x32 canvas.
        assert!((point.0 - 15.5).abs() < 2.5);
        assert!((point.1 - 15.5).abs() < 2.5);
    }
}
