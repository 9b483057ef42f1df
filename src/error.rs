//! Error taxonomy for the vigil_vision pipeline.
//!
//! Every fallible operation in the crate returns [`Result`]. The variants
//! map one-to-one to the failure classes the pipeline distinguishes:
//! per-frame precondition violations abort only that frame's processing,
//! session-start failures abort only that session attempt, and mid-session
//! write failures are logged and skipped by the writer rather than
//! surfaced here.

use std::path::PathBuf;
use std::time::Duration;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, VisionError>;

/// Failure classes of the motion-detection and recording pipeline.
#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    /// Malformed or mismatched frame data. Fails fast; the current
    /// evaluate call is aborted rather than producing a wrong verdict.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A recording session was started with no buffered frames, so the
    /// sink dimensions cannot be inferred. The start is refused; an empty
    /// recording is never silently created.
    #[error("pre-roll buffer is empty; cannot start a recording session")]
    EmptyPreRoll,

    /// The video sink could not be created or opened. Fatal for that
    /// session attempt; there is no silent retry.
    #[error("failed to open video sink at {path}: {source}")]
    SinkOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A frame could not be encoded or written. Writers log this and
    /// continue best-effort; it surfaces only from direct sink calls.
    #[error("failed to write frame: {0}")]
    Write(String),

    /// The shared shutdown budget expired with a writer thread still
    /// live. The sessions were abandoned and the slots reset.
    #[error("recording shutdown exceeded the {0:?} budget; sessions abandoned")]
    ShutdownTimeout(Duration),
}
