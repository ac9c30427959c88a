// Video encoding and container format support
//
// This module owns the bitrate table, the output container mapping and the
// MPEG-4 encoder settings used by the record pipeline.
// To add a new container:
// 1. Add variant to ContainerFormat
// 2. Add extension mapping in from_extension()
// 3. Add the GStreamer muxer in gst_muxer()

pub mod bitrate;
pub mod encoder;

pub use bitrate::{bitrate_for_height, select_tier, BitrateTier, BITRATE_TIERS, DEFAULT_BITRATE};
pub use encoder::EncoderSettings;

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Error type for encoding decisions
#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    #[error("No bitrate tier matches height {0}")]
    NoMatchingTier(u32),

    #[error("Unsupported output file type: {0}")]
    UnsupportedContainer(String),
}

pub type Result<T> = std::result::Result<T, EncodingError>;

/// Supported output container formats. Video is MPEG-4 in both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    /// MP4 (.mp4) - the muxer writes its header on end-of-stream
    Mp4,
    /// AVI (.avi)
    Avi,
}

impl ContainerFormat {
    /// Get the file extension for this container
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::Avi => "avi",
        }
    }

    /// Get the GStreamer muxer element name
    pub fn gst_muxer(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4mux",
            ContainerFormat::Avi => "avimux",
        }
    }

    /// Detect container from file extension (case-insensitive, no dot)
    pub fn from_extension(ext: &str) -> Option<ContainerFormat> {
        match ext.to_lowercase().as_str() {
            "mp4" => Some(ContainerFormat::Mp4),
            "avi" => Some(ContainerFormat::Avi),
            _ => None,
        }
    }

    /// Infer the container from an output path
    pub fn from_path(path: &Path) -> Result<ContainerFormat> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        Self::from_extension(&ext).ok_or_else(|| {
            EncodingError::UnsupportedContainer(if ext.is_empty() {
                path.display().to_string()
            } else {
                format!(".{}", ext)
            })
        })
    }
}
