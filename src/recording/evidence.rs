// THEORY:
// The `evidence` module names and persists the artifacts a detection
// produces: the timestamped clip paths handed to the video sinks and the
// rate-limited JPEG snapshots saved on alarm. Naming lives here so every
// artifact of one incident shares the same timestamp convention and lands
// in the same evidence directory.

use crate::core_modules::frame::Frame;
use crate::error::{Result, VisionError};
use crate::recording::SessionKind;
use chrono::Local;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Timestamp layout shared by every evidence artifact: day-month-year,
/// then hour-minute-second.
const TIMESTAMP_FORMAT: &str = "%d%m%Y_%H%M%S";

/// Current local time rendered in the evidence timestamp layout.
pub fn timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Clip path for a new recording session of the given kind.
pub fn clip_path(dir: &Path, kind: SessionKind) -> PathBuf {
    let name = match kind {
        SessionKind::Auto => format!("intruso_{}.avi", timestamp()),
        SessionKind::Manual => format!("intruso_manual_{}.avi", timestamp()),
    };
    dir.join(name)
}

/// Saves alarm snapshots, at most one per `min_interval`.
pub struct EvidenceStore {
    dir: PathBuf,
    min_interval: Duration,
    last_saved: Option<Instant>,
}

impl EvidenceStore {
    pub fn new(dir: PathBuf, min_interval: Duration) -> Self {
        Self {
            dir,
            min_interval,
            last_saved: None,
        }
    }

    /// Saves the frame as a JPEG snapshot unless one was saved within the
    /// last `min_interval`. Returns the path written, or `None` when the
    /// request was rate-limited.
    pub fn save_snapshot(&mut self, frame: &Frame) -> Result<Option<PathBuf>> {
        if let Some(last) = self.last_saved {
            if last.elapsed() < self.min_interval {
                return Ok(None);
            }
        }

        let path = self.dir.join(format!("intruso_{}.jpg", timestamp()));
        frame
            .to_rgb_image()
            .save(&path)
            .map_err(|e| VisionError::Write(format!("snapshot save failed: {e}")))?;
        self.last_saved = Some(Instant::now());
        log::info!("snapshot saved to {}", path.display());
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_paths_follow_the_naming_convention() {
        let dir = Path::new("/evidence");
        let auto = clip_path(dir, SessionKind::Auto);
        let manual = clip_path(dir, SessionKind::Manual);

        let auto_name = auto.file_name().unwrap().to_str().unwrap();
        let manual_name = manual.file_name().unwrap().to_str().unwrap();
        assert!(auto_name.starts_with("intruso_"));
        assert!(!auto_name.starts_with("intruso_manual_"));
        assert!(auto_name.ends_with(".avi"));
        assert!(manual_name.starts_with("intruso_manual_"));
        assert!(manual_name.ends_with(".avi"));

        // intruso_ + DDMMYYYY_HHMMSS + .avi
        assert_eq!(auto_name.len(), "intruso_".len() + 15 + ".avi".len());
    }

    #[test]
    fn first_snapshot_saves_and_reports_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = EvidenceStore::new(dir.path().to_path_buf(), Duration::from_secs(1));
        let frame = Frame::filled(8, 8, [10, 20, 30]);

        let path = store.save_snapshot(&frame).unwrap().expect("saved");
        assert!(path.exists());
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("intruso_"));
        assert!(name.ends_with(".jpg"));
    }

    #[test]
    fn snapshots_are_rate_limited() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = EvidenceStore::new(dir.path().to_path_buf(), Duration::from_secs(60));
        let frame = Frame::filled(8, 8, [10, 20, 30]);

        assert!(store.save_snapshot(&frame).unwrap().is_some());
        // Within the interval: silently skipped, not an error.
        assert!(store.save_snapshot(&frame).unwrap().is_none());
        assert!(store.save_snapshot(&frame).unwrap().is_none());
    }

    #[test]
    fn a_zero_interval_never_rate_limits() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = EvidenceStore::new(dir.path().to_path_buf(), Duration::ZERO);
        let frame = Frame::filled(8, 8, [10, 20, 30]);

        assert!(store.save_snapshot(&frame).unwrap().is_some());
        assert!(store.save_snapshot(&frame).unwrap().is_some());
    }
}
