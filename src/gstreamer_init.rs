//! GStreamer initialization and environment checks
//!
//! GStreamer must be initialized once before any element is created. This
//! module does that, logs the runtime version and reports which of the
//! elements used by the preview and record pipelines are missing.

use std::sync::Once;

static GSTREAMER_INIT: Once = Once::new();

/// Elements the pipelines need, with the plugin that provides them
pub const REQUIRED_ELEMENTS: &[(&str, &str)] = &[
    ("capsfilter", "coreelements"),
    ("tee", "coreelements"),
    ("queue", "coreelements"),
    ("filesink", "coreelements"),
    ("videorate", "videorate"),
    ("videoconvert", "videoconvertscale"),
    ("autovideosrc", "autodetect"),
    ("autovideosink", "autodetect"),
    ("avenc_mpeg4", "libav"),
    ("mp4mux", "isomp4"),
    ("avimux", "avi"),
];

/// Initialize GStreamer
///
/// Safe to call repeatedly; only the first call does any work. Failure is
/// logged rather than returned, callers that need GStreamer will hit the
/// error again from `gstreamer::init()`.
pub fn init_gstreamer_env() {
    GSTREAMER_INIT.call_once(|| match gstreamer::init() {
        Ok(_) => {
            log::info!("GStreamer initialized successfully");
            log_gstreamer_version();
            let missing = missing_elements();
            if !missing.is_empty() {
                log::warn!("Missing GStreamer elements: {:?}", missing);
            }
        }
        Err(e) => {
            log::error!("Failed to initialize GStreamer: {}", e);
            log::error!("Video capture and recording will not be available");
        }
    });
}

fn log_gstreamer_version() {
    let (major, minor, micro, nano) = gstreamer::version();
    let nano_str = match nano {
        0 => String::new(),
        1 => " (CVS)".to_string(),
        2 => " (prerelease)".to_string(),
        _ => format!(" (nano: {})", nano),
    };
    log::info!("GStreamer version: {}.{}.{}{}", major, minor, micro, nano_str);
}

/// Required elements with no registered factory, as `element (plugin)` strings
pub fn missing_elements() -> Vec<String> {
    if gstreamer::init().is_err() {
        return REQUIRED_ELEMENTS
            .iter()
            .map(|(element, plugin)| format!("{} ({})", element, plugin))
            .collect();
    }

    REQUIRED_ELEMENTS
        .iter()
        .filter(|(element, _)| gstreamer::ElementFactory::find(element).is_none())
        .map(|(element, plugin)| format!("{} ({})", element, plugin))
        .collect()
}

/// Information about the GStreamer installation for diagnostics
#[derive(Debug, Clone)]
pub struct GStreamerInfo {
    pub is_available: bool,
    pub version: Option<String>,
    pub missing_elements: Vec<String>,
}

pub fn get_gstreamer_info() -> GStreamerInfo {
    let version = match gstreamer::init() {
        Ok(_) => {
            let (major, minor, micro, _) = gstreamer::version();
            Some(format!("{}.{}.{}", major, minor, micro))
        }
        Err(_) => None,
    };

    GStreamerInfo {
        is_available: version.is_some(),
        version,
        missing_elements: missing_elements(),
    }
}
