// THEORY:
// The `pipeline` module is the final, top-level API for the entire
// surveillance engine. It encapsulates the full stack (HSV adjustment,
// pre-roll buffering, dual-signal detection, evidence snapshots,
// event-triggered recording and display selection) behind a single
// `process_frame` call driven by the capture loop.
//
// Key architectural principles:
// 1.  **The Capture Loop Never Dies**: `process_frame` only fails on
//     precondition violations (`InvalidInput`). Everything downstream of
//     the verdict (snapshot saves, session starts) is logged and
//     isolated, so one bad disk write costs evidence, not surveillance.
// 2.  **One Frame In, One Output Out**: Every call returns the verdict,
//     the display frame, the recording and alarm flags, and the snapshot
//     path if one was saved. External collaborators (UI, alarm sound)
//     react to the output; the pipeline never calls out.
// 3.  **Reactive Recording**: An Auto session starts on the consensus
//     verdict and seeds itself from the pre-roll ring, so the seconds
//     BEFORE the trigger are in the clip.

use crate::core_modules::buffers::SharedBuffers;
use crate::core_modules::frame::Frame;
use crate::core_modules::motion_detector::{MotionDetector, MotionVerdict};
use crate::core_modules::trajectory::TrajectoryTrace;
use crate::core_modules::transforms::{hsv_shift, luminosity, night_vision, thermal};
use crate::error::Result;
use crate::recording::evidence::EvidenceStore;
use crate::recording::sink::{MjpegAviFactory, SinkFactory};
use crate::recording::RecordingSessionManager;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for the SurveillancePipeline, allowing for tunable behavior.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Pre-roll ring buffer capacity, in frames.
    pub frame_buffer_capacity: usize,
    /// Soft cap on each session's record queue, in frames.
    pub record_queue_cap: usize,
    /// Minimum region area, in pixels, for either motion signal to fire.
    pub min_region_area: u32,
    /// Live recording time of an Auto session, past the pre-roll.
    pub auto_record_duration: Duration,
    /// Minimum spacing between alarm snapshots.
    pub snapshot_interval: Duration,
    /// Directory receiving clips and snapshots.
    pub evidence_dir: PathBuf,
    /// Frame rate written into recorded clips.
    pub fps: u32,
    /// Mean grayscale level below which night vision kicks in on its own.
    pub luminosity_threshold: f64,
    /// Trajectory overlay canvas size.
    pub trajectory_canvas: (u32, u32),
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_buffer_capacity: 60,
            record_queue_cap: 500,
            min_region_area: 2000,
            auto_record_duration: Duration::from_secs(6),
            snapshot_interval: Duration::from_secs(1),
            evidence_dir: PathBuf::from("."),
            fps: 20,
            luminosity_threshold: 40.0,
            trajectory_canvas: (320, 240),
        }
    }
}

/// Operator-selected rendering of the display frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// Annotated frame; falls back to night vision in low light.
    Normal,
    NightVision,
    Thermal,
}

/// The primary output of the pipeline for a single frame.
pub struct FrameOutput {
    pub verdict: MotionVerdict,
    /// The frame to show and to record: annotated, night or thermal.
    pub display: Frame,
    /// Path of the alarm snapshot saved this frame, if any.
    pub snapshot_path: Option<PathBuf>,
    /// True while any recording session is live.
    pub recording: bool,
    /// True when the consensus fired and the alarm is enabled.
    pub alarm_triggered: bool,
}

/// The main, top-level struct for the surveillance engine.
pub struct SurveillancePipeline {
    config: PipelineConfig,
    buffers: SharedBuffers,
    // Sized lazily to the first frame seen.
    detector: Option<MotionDetector>,
    trajectory: TrajectoryTrace,
    recorder: RecordingSessionManager,
    evidence: EvidenceStore,
    previous: Option<Frame>,
    hue_shift: i32,
    sat_shift: i32,
    val_shift: i32,
    display_mode: DisplayMode,
    alarm_enabled: bool,
    auto_record_enabled: bool,
}

impl SurveillancePipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_sink_factory(config, Arc::new(MjpegAviFactory))
    }

    /// Builds the pipeline around a custom sink factory. The seam the
    /// tests record through.
    pub fn with_sink_factory(config: PipelineConfig, sink_factory: Arc<dyn SinkFactory>) -> Self {
        let buffers = SharedBuffers::new(config.frame_buffer_capacity, config.record_queue_cap);
        let recorder = RecordingSessionManager::new(
            config.evidence_dir.clone(),
            config.fps,
            buffers.clone(),
            sink_factory,
        );
        let evidence = EvidenceStore::new(config.evidence_dir.clone(), config.snapshot_interval);
        let (canvas_w, canvas_h) = config.trajectory_canvas;
        Self {
            config,
            buffers,
            detector: None,
            trajectory: TrajectoryTrace::new(canvas_w, canvas_h),
            recorder,
            evidence,
            previous: None,
            hue_shift: 0,
            sat_shift: 0,
            val_shift: 0,
            display_mode: DisplayMode::Normal,
            alarm_enabled: true,
            auto_record_enabled: true,
        }
    }

    /// Runs one frame through the full stack. Only precondition violations
    /// fail the call; evidence and recording errors are logged and the
    /// frame still produces an output.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<FrameOutput> {
        // --- 1. Operator HSV adjustment ---
        let adjusted = hsv_shift(frame, self.hue_shift, self.sat_shift, self.val_shift);

        // --- 2. Pre-roll ---
        self.buffers.push_frame(adjusted.clone());

        // --- 3. Dual-signal detection ---
        let detector = self
            .detector
            .get_or_insert_with(|| MotionDetector::new(adjusted.width(), adjusted.height()));
        let evaluation = detector.evaluate(
            &adjusted,
            self.previous.as_ref(),
            self.config.min_region_area,
            Some(&mut self.trajectory),
        )?;

        // --- 4. React to the consensus verdict ---
        let mut snapshot_path = None;
        let mut alarm_triggered = false;
        if evaluation.verdict.combined {
            alarm_triggered = self.alarm_enabled;
            match self.evidence.save_snapshot(&evaluation.annotated) {
                Ok(path) => snapshot_path = path,
                Err(e) => log::warn!("alarm snapshot failed: {e}"),
            }
            if self.auto_record_enabled && !self.recorder.is_recording() {
                if let Err(e) = self.recorder.start_auto(self.config.auto_record_duration) {
                    log::warn!("auto recording failed to start: {e}");
                }
            }
        }

        // --- 5. Display selection ---
        // Transforms render the annotated frame, so the motion boxes
        // survive into night and thermal views.
        let display = match self.display_mode {
            DisplayMode::Thermal => thermal(&evaluation.annotated),
            DisplayMode::NightVision => night_vision(&evaluation.annotated),
            DisplayMode::Normal => {
                if luminosity(&adjusted) < self.config.luminosity_threshold {
                    night_vision(&evaluation.annotated)
                } else {
                    evaluation.annotated
                }
            }
        };

        // --- 6. Fan the display frame out to every live session ---
        for kind in self.recorder.active_kinds() {
            self.buffers.push_record(kind, display.clone());
        }

        // --- 7. Bookkeeping ---
        self.previous = Some(adjusted);
        Ok(FrameOutput {
            verdict: evaluation.verdict,
            display,
            snapshot_path,
            recording: self.recorder.is_recording(),
            alarm_triggered,
        })
    }

    /// Starts the operator-controlled session. No-op while one is live.
    pub fn start_manual_recording(&mut self) -> Result<()> {
        self.recorder.start_manual()
    }

    /// Signals the operator-controlled session to stop once drained.
    pub fn stop_manual_recording(&mut self) {
        self.recorder.stop_manual();
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    /// Stops everything within the given budget and drains the buffers.
    /// New triggers are disabled first so a late verdict cannot restart a
    /// session mid-shutdown.
    pub fn shutdown(&mut self, timeout: Duration) -> Result<()> {
        self.auto_record_enabled = false;
        self.alarm_enabled = false;
        let result = self.recorder.stop_all_and_wait(timeout);
        self.buffers.clear_all();
        result
    }

    pub fn trajectory(&self) -> &TrajectoryTrace {
        &self.trajectory
    }

    pub fn clear_trajectory(&mut self) {
        self.trajectory.clear();
    }

    /// Hue wraps modulo 180; saturation and value clamp.
    pub fn set_hsv_shift(&mut self, hue: i32, saturation: i32, value: i32) {
        self.hue_shift = hue;
        self.sat_shift = saturation;
        self.val_shift = value;
    }

    pub fn set_display_mode(&mut self, mode: DisplayMode) {
        self.display_mode = mode;
    }

    pub fn set_alarm_enabled(&mut self, enabled: bool) {
        self.alarm_enabled = enabled;
    }

    pub fn set_auto_record_enabled(&mut self, enabled: bool) {
        self.auto_record_enabled = enabled;
    }
}
