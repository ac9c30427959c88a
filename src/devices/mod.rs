// Device discovery and enumeration

pub mod enumeration;

pub use enumeration::*;

use gstreamer as gst;
use serde::{Deserialize, Serialize};

use crate::caps::{self, CapabilityRecord, CapsError, ParseOptions};

/// Error type for device discovery
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to probe {device}: {reason}")]
    Probe { device: String, reason: String },

    #[error("Caps error: {0}")]
    Caps(#[from] CapsError),

    #[error("GStreamer init error: {0}")]
    Init(#[from] gst::glib::Error),

    #[error("GStreamer error: {0}")]
    Gst(#[from] gst::glib::BoolError),

    #[error("GStreamer state error: {0}")]
    StateChange(#[from] gst::StateChangeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DeviceError>;

/// Identifies a capture device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId {
    /// Opaque, platform-specific identifier (device node path or provider name)
    pub id: String,
    /// Human-readable name
    pub name: String,
}

impl DeviceId {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Where capture devices come from.
///
/// Implementations enumerate device identifiers, report a device's raw caps
/// string and build a configured GStreamer source element for it.
pub trait DeviceSource: Send + Sync {
    /// List available capture devices. Fails with `DeviceNotFound` when there are none.
    fn enumerate_devices(&self) -> Result<Vec<DeviceId>>;

    /// Serialized caps of everything the device can produce
    fn probe_caps(&self, device: &DeviceId) -> Result<String>;

    /// Create a source element reading from `device`
    fn create_source(&self, device: &str) -> Result<gst::Element>;
}

/// Which device source backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceBackend {
    /// GStreamer device monitor (all platforms)
    #[default]
    Monitor,
    /// `/dev/v4l/by-id` symlinks (Linux only)
    V4l2Directory,
}

impl DeviceBackend {
    pub fn create(&self) -> Result<Box<dyn DeviceSource>> {
        Ok(match self {
            DeviceBackend::Monitor => Box::new(GstDeviceSource::new()?),
            DeviceBackend::V4l2Directory => Box::new(V4l2DirectorySource::default()),
        })
    }
}

/// Probe every device and build the de-duplicated set of capture modes.
///
/// Devices are probed `passes` times since some cameras report an incomplete
/// mode list on first open. A device whose probe or caps fail is logged and
/// skipped; only the absence of any device is an error.
pub fn get_device_configs(
    source: &dyn DeviceSource,
    passes: u32,
    options: ParseOptions,
) -> Result<Vec<CapabilityRecord>> {
    let devices = source.enumerate_devices()?;
    let mut records = Vec::new();

    for pass in 0..passes.max(1) {
        for device in &devices {
            let caps_str = match source.probe_caps(device) {
                Ok(caps_str) => caps_str,
                Err(e) => {
                    log::warn!("Probe pass {} failed for {}: {}", pass + 1, device.id, e);
                    continue;
                }
            };

            match caps::records_from_caps(&device.id, &caps_str, options) {
                Ok(device_records) => {
                    log::debug!(
                        "Pass {}: {} modes for {}",
                        pass + 1,
                        device_records.len(),
                        device.id
                    );
                    records.extend(device_records);
                }
                Err(e) => {
                    log::error!("Failed to parse caps for {}: {}", device.id, e);
                }
            }
        }
    }

    let records = caps::dedup_records(records);
    log::info!("Found {} capture mode(s) on {} device(s)", records.len(), devices.len());
    Ok(records)
}

/// Keep modes with the given pixel format and a framerate above `min_fps`.
pub fn filter_configs(
    records: &[CapabilityRecord],
    format: Option<&str>,
    min_fps: Option<f64>,
) -> Vec<CapabilityRecord> {
    records
        .iter()
        .filter(|r| format.map_or(true, |f| r.format.eq_ignore_ascii_case(f)))
        .filter(|r| min_fps.map_or(true, |min| r.fps() > min))
        .cloned()
        .collect()
}

/// Caches the most recent enumeration snapshot
pub struct DeviceManager {
    source: Box<dyn DeviceSource>,
    /// Modes from the last refresh
    pub configs: Vec<CapabilityRecord>,
    probe_passes: u32,
    parse_options: ParseOptions,
}

impl DeviceManager {
    pub fn new(source: Box<dyn DeviceSource>, probe_passes: u32, parse_options: ParseOptions) -> Self {
        Self {
            source,
            configs: Vec::new(),
            probe_passes,
            parse_options,
        }
    }

    /// Re-enumerate devices, replacing the cached snapshot
    pub fn refresh(&mut self) -> Result<&[CapabilityRecord]> {
        self.configs = get_device_configs(self.source.as_ref(), self.probe_passes, self.parse_options)?;
        Ok(&self.configs)
    }

    pub fn source(&self) -> &dyn DeviceSource {
        self.source.as_ref()
    }

    pub fn into_source(self) -> Box<dyn DeviceSource> {
        self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Device source serving canned caps strings
    struct FakeSource {
        caps: HashMap<String, String>,
    }

    impl DeviceSource for FakeSource {
        fn enumerate_devices(&self) -> Result<Vec<DeviceId>> {
            if self.caps.is_empty() {
                return Err(DeviceError::DeviceNotFound("No devices available".into()));
            }
            let mut ids: Vec<_> = self.caps.keys().map(|k| DeviceId::new(k.clone(), k.clone())).collect();
            ids.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(ids)
        }

        fn probe_caps(&self, device: &DeviceId) -> Result<String> {
            self.caps
                .get(&device.id)
                .cloned()
                .ok_or_else(|| DeviceError::DeviceNotFound(device.id.clone()))
        }

        fn create_source(&self, device: &str) -> Result<gst::Element> {
            Err(DeviceError::DeviceNotFound(device.to_string()))
        }
    }

    const STRUCTURE: &str =
        "video/x-raw, format=(string)I420, width=(int)640, height=(int)480, framerate=(fraction)30/1";

    fn strict() -> ParseOptions {
        ParseOptions { strict: true }
    }

    #[test]
    fn test_duplicate_structure_kept_once() {
        let mut caps = HashMap::new();
        caps.insert(
            "/dev/v4l/by-id/usb-Acme_Cam-video-index0".to_string(),
            format!("{}; {}", STRUCTURE, STRUCTURE),
        );
        let source = FakeSource { caps };

        let records = get_device_configs(&source, 2, strict()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].label, "Acme");
        assert_eq!(records[0].bitrate, (5 << 20) / 2);
    }

    #[test]
    fn test_no_devices() {
        let source = FakeSource { caps: HashMap::new() };
        assert!(matches!(
            get_device_configs(&source, 1, strict()),
            Err(DeviceError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_bad_device_is_skipped() {
        let mut caps = HashMap::new();
        caps.insert("a".to_string(), "video/x-raw, interlaced=(boolean)true".to_string());
        caps.insert("b".to_string(), STRUCTURE.to_string());
        let source = FakeSource { caps };

        let records = get_device_configs(&source, 1, strict()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].device, "b");
    }

    #[test]
    fn test_filter_configs() {
        let mut caps = HashMap::new();
        caps.insert(
            "cam".to_string(),
            "video/x-raw, format=(string){ I420, YUY2 }, width=(int)640, height=(int)480, framerate=(fraction){ 30/1, 5/1 }"
                .to_string(),
        );
        let mut manager = DeviceManager::new(Box::new(FakeSource { caps }), 1, strict());
        let records = manager.refresh().unwrap().to_vec();
        assert_eq!(records.len(), 4);

        let filtered = filter_configs(&records, Some("i420"), Some(10.0));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].format, "I420");
        assert_eq!(filtered[0].framerate.numer(), 30);
    }
}
