// THEORY:
// This file is the main entry point for the `vigil_vision` library crate.
// It follows the standard Rust convention of using `lib.rs` to define the
// public API that will be exposed to external consumers (a capture loop,
// a GUI shell, an alarm integration).
//
// The primary goal is to export the `SurveillancePipeline` and its
// associated data structures (`PipelineConfig`, `FrameOutput`, the motion
// verdict and recording types) as the clean, high-level interface for the
// entire engine. The internal layers (`core_modules`, `recording`) stay
// available for consumers that need finer control, such as driving the
// session manager directly.

pub mod core_modules;
pub mod error;
pub mod pipeline;
pub mod recording;

pub use core_modules::frame::Frame;
pub use error::{Result, VisionError};
pub use pipeline::{DisplayMode, FrameOutput, PipelineConfig, SurveillancePipeline};
