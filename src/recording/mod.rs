// Recording modules

pub mod manager;
pub mod teardown;
pub mod video;

pub use manager::{Command, ManagerEvent, ManagerSettings, PipelineManager, PipelineRequest, ReconfigureWorker};
pub use teardown::{Teardown, TeardownState};
pub use video::{PreviewPipeline, RecordPipeline, RecordingInfo};

use chrono::{DateTime, Local, Utc};
use gstreamer as gst;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::devices::DeviceError;
use crate::encoding::{ContainerFormat, EncodingError};

/// Error type for pipeline construction and control
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("GStreamer error: {0}")]
    Gst(#[from] gst::glib::BoolError),

    #[error("GStreamer init error: {0}")]
    Init(#[from] gst::glib::Error),

    #[error("GStreamer state error: {0}")]
    StateChange(#[from] gst::StateChangeError),

    #[error("Failed to create element '{factory}': {reason}")]
    Element { factory: String, reason: String },

    #[error("Failed to link {0}")]
    Link(String),

    #[error("Pipeline error from {source_name}: {message}")]
    Bus {
        source_name: String,
        message: String,
        debug: Option<String>,
    },

    #[error("End-of-stream not confirmed within {0:?}")]
    TeardownTimeout(Duration),

    #[error("Recording requires a capture mode")]
    MissingMode,

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// What the orchestrator is currently doing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    /// No pipeline running
    Idle,
    /// Preview only
    Previewing,
    /// Preview plus capture to file
    Recording,
}

/// Snapshot of the orchestrator state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingState {
    pub status: RecordingStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub current_path: Option<PathBuf>,
    pub mode: Option<String>,
}

impl RecordingState {
    pub fn new() -> Self {
        Self {
            status: RecordingStatus::Idle,
            started_at: None,
            current_path: None,
            mode: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.status == RecordingStatus::Recording
    }
}

impl Default for RecordingState {
    fn default() -> Self {
        Self::new()
    }
}

/// Next file name in a numbered series.
///
/// A trailing run of digits in the file stem is incremented with its leading
/// zeros dropped (`rec007.mp4` -> `rec8.mp4`); a stem without digits gets a
/// `1` appended (`rec.mp4` -> `rec1.mp4`).
pub fn auto_increment_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let digits_at = stem
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i);

    let (name, count) = match digits_at {
        Some(i) => match stem[i..].parse::<u64>() {
            Ok(n) => (&stem[..i], n.saturating_add(1)),
            Err(_) => (stem.as_str(), 1),
        },
        None => (stem.as_str(), 1),
    };

    let mut file_name = format!("{}{}", name, count);
    if let Some(ext) = path.extension() {
        file_name.push('.');
        file_name.push_str(&ext.to_string_lossy());
    }
    path.with_file_name(file_name)
}

/// Timestamped output path inside `dir`
pub fn default_record_path(dir: &Path, container: ContainerFormat) -> PathBuf {
    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
    dir.join(format!("recording_{}.{}", timestamp, container.extension()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_increment_strips_zero_padding() {
        assert_eq!(
            auto_increment_path(Path::new("/tmp/rec007.mp4")),
            PathBuf::from("/tmp/rec8.mp4")
        );
        assert_eq!(
            auto_increment_path(Path::new("take100.avi")),
            PathBuf::from("take101.avi")
        );
        assert_eq!(auto_increment_path(Path::new("rec0.mp4")), PathBuf::from("rec1.mp4"));
    }

    #[test]
    fn test_auto_increment_without_digits() {
        assert_eq!(
            auto_increment_path(Path::new("/videos/rec.mp4")),
            PathBuf::from("/videos/rec1.mp4")
        );
        assert_eq!(auto_increment_path(Path::new("clip")), PathBuf::from("clip1"));
    }

    #[test]
    fn test_default_record_path() {
        let path = default_record_path(Path::new("/videos"), ContainerFormat::Avi);
        assert_eq!(path.parent(), Some(Path::new("/videos")));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("avi"));
        assert!(path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("recording_")));
    }

    #[test]
    fn test_state_default_is_idle() {
        let state = RecordingState::default();
        assert!(!state.is_recording());
        assert_eq!(state.status, RecordingStatus::Idle);
    }
}
