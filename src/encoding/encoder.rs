//! MPEG-4 encoder configuration for the record branch
//!
//! The capture branch always encodes with `avenc_mpeg4`; only the bitrate is
//! tuned (from the mode height, see [`super::bitrate`], or an explicit override).

use gstreamer as gst;
use gstreamer::prelude::*;

use crate::caps::CapabilityRecord;

use super::{bitrate_for_height, DEFAULT_BITRATE};

/// GStreamer element used for encoding
pub const MPEG4_ENCODER: &str = "avenc_mpeg4";

/// Default allowed bitrate deviation (500 KiB)
pub const DEFAULT_BITRATE_TOLERANCE: u32 = 500 << 10;

/// Configuration for the MPEG-4 encoder
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncoderSettings {
    /// Target bitrate in bits per second
    pub bitrate: u32,
    /// Allowed bitrate deviation in bits
    pub bitrate_tolerance: u32,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            bitrate: DEFAULT_BITRATE,
            bitrate_tolerance: DEFAULT_BITRATE_TOLERANCE,
        }
    }
}

impl EncoderSettings {
    /// Settings for a capture mode, honoring an explicit bitrate override.
    pub fn for_mode(mode: Option<&CapabilityRecord>, bitrate_override: Option<u32>) -> Self {
        let bitrate = bitrate_override
            .or_else(|| mode.map(|m| bitrate_for_height(m.height).unwrap_or(m.bitrate)))
            .unwrap_or(DEFAULT_BITRATE);

        Self {
            bitrate,
            ..Self::default()
        }
    }

    pub fn with_tolerance(mut self, tolerance: u32) -> Self {
        self.bitrate_tolerance = tolerance;
        self
    }

    /// Create and configure the encoder element.
    pub fn build_element(&self) -> Result<gst::Element, gst::glib::BoolError> {
        // avenc properties mirror libav option types (int64 bitrate), so set
        // them from strings to let GStreamer pick the right type
        let encoder = gst::ElementFactory::make(MPEG4_ENCODER)
            .property_from_str("bitrate", &self.bitrate.to_string())
            .property_from_str("bitrate-tolerance", &self.bitrate_tolerance.to_string())
            .build()?;

        log::debug!(
            "Configured {} (bitrate {} bps, tolerance {})",
            encoder.name(),
            self.bitrate,
            self.bitrate_tolerance
        );
        Ok(encoder)
    }
}
