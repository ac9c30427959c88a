// Device enumeration implementations

use super::{DeviceError, DeviceId, DeviceSource, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// Directory of stable per-device symlinks maintained by udev
pub const V4L_BY_ID_DIR: &str = "/dev/v4l/by-id";

/// Device source backed by `gst::DeviceMonitor`.
///
/// The `gst::Device` objects found during enumeration are kept so that
/// pipelines can later ask the provider itself to create the source element.
pub struct GstDeviceSource {
    devices: Mutex<HashMap<String, gst::Device>>,
}

impl GstDeviceSource {
    pub fn new() -> Result<Self> {
        gst::init()?;
        Ok(Self {
            devices: Mutex::new(HashMap::new()),
        })
    }

    fn lookup(&self, device: &str) -> Option<gst::Device> {
        self.devices.lock().get(device).cloned()
    }
}

impl DeviceSource for GstDeviceSource {
    fn enumerate_devices(&self) -> Result<Vec<DeviceId>> {
        log::info!("Enumerating video devices with GStreamer...");

        let monitor = gst::DeviceMonitor::new();
        if monitor.add_filter(Some("Video/Source"), None).is_none() {
            log::warn!("Device monitor rejected the Video/Source filter");
        }

        if let Err(e) = monitor.start() {
            log::error!("Failed to start device monitor: {}", e);
            return Err(DeviceError::DeviceNotFound(format!(
                "no device provider available: {}",
                e
            )));
        }

        let mut video_devices = Vec::new();
        for device in monitor.devices() {
            let name = device.display_name().to_string();
            let device_class = device.device_class().to_string();
            if !device_class.contains("Video") {
                continue;
            }
            log::debug!("Found device: {} (class: {})", name, device_class);
            video_devices.push((name, device));
        }

        monitor.stop();

        if video_devices.is_empty() {
            return Err(DeviceError::DeviceNotFound("No devices available".into()));
        }

        // Identical cameras share a display name
        let names: Vec<String> = video_devices.iter().map(|(name, _)| name.clone()).collect();
        let mut found = HashMap::new();
        let mut ids = Vec::new();
        for (id, (name, device)) in unique_device_ids(&names).into_iter().zip(video_devices) {
            ids.push(DeviceId::new(id.clone(), name));
            found.insert(id, device);
        }
        ids.sort_by(|a, b| a.id.cmp(&b.id));

        *self.devices.lock() = found;
        log::info!("Found {} video device(s)", ids.len());
        Ok(ids)
    }

    fn probe_caps(&self, device: &DeviceId) -> Result<String> {
        let gst_device = self
            .lookup(&device.id)
            .ok_or_else(|| DeviceError::DeviceNotFound(device.id.clone()))?;

        match gst_device.caps() {
            Some(caps) => Ok(caps.to_string()),
            None => {
                // Provider has no static caps; ask the element
                let src = gst_device.create_element(None)?;
                probe_element_caps(&device.id, src)
            }
        }
    }

    fn create_source(&self, device: &str) -> Result<gst::Element> {
        let gst_device = self
            .lookup(device)
            .ok_or_else(|| DeviceError::DeviceNotFound(device.to_string()))?;
        let src = gst_device.create_element(Some("source"))?;
        log::debug!(
            "Using device provider '{}' for {}",
            gst_device.device_class(),
            device
        );
        Ok(src)
    }
}

/// Distinct ids for devices in discovery order.
///
/// The first device with a given name keeps it; later ones get ` #2`, ` #3`
/// and so on, skipping any id already taken.
pub fn unique_device_ids(names: &[String]) -> Vec<String> {
    let mut used = HashSet::new();
    names
        .iter()
        .map(|name| {
            let mut id = name.clone();
            let mut n = 1;
            while !used.insert(id.clone()) {
                n += 1;
                id = format!("{} #{}", name, n);
            }
            id
        })
        .collect()
}

/// Device source listing `/dev/v4l/by-id` symlinks and opening them with `v4l2src`.
pub struct V4l2DirectorySource {
    dir: PathBuf,
}

impl Default for V4l2DirectorySource {
    fn default() -> Self {
        Self::new(V4L_BY_ID_DIR)
    }
}

impl V4l2DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// List device node paths in the directory, sorted
    pub fn list(&self) -> Result<Vec<DeviceId>> {
        if !cfg!(target_os = "linux") {
            return Err(DeviceError::DeviceNotFound(format!(
                "Unsupported platform: {}",
                std::env::consts::OS
            )));
        }

        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            log::debug!("Cannot read {}: {}", self.dir.display(), e);
            DeviceError::DeviceNotFound("No devices available".into())
        })?;

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            ids.push(DeviceId::new(path.to_string_lossy(), name));
        }

        if ids.is_empty() {
            return Err(DeviceError::DeviceNotFound("No devices available".into()));
        }
        ids.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(ids)
    }

    fn make_v4l2src(device: &str) -> Result<gst::Element> {
        gst::init()?;
        Ok(gst::ElementFactory::make("v4l2src")
            .property("device", device)
            .build()?)
    }
}

impl DeviceSource for V4l2DirectorySource {
    fn enumerate_devices(&self) -> Result<Vec<DeviceId>> {
        self.list()
    }

    fn probe_caps(&self, device: &DeviceId) -> Result<String> {
        let src = Self::make_v4l2src(&device.id)?;
        probe_element_caps(&device.id, src)
    }

    fn create_source(&self, device: &str) -> Result<gst::Element> {
        Self::make_v4l2src(device)
    }
}

/// Bring a lone source element to READY and query what its src pad can produce.
pub fn probe_element_caps(device: &str, src: gst::Element) -> Result<String> {
    let pipeline = gst::Pipeline::with_name("caps-probe");
    pipeline.add(&src)?;

    let result = (|| -> Result<String> {
        pipeline.set_state(gst::State::Ready)?;
        let pad = src.static_pad("src").ok_or_else(|| DeviceError::Probe {
            device: device.to_string(),
            reason: "source has no src pad".into(),
        })?;
        Ok(pad.query_caps(None).to_string())
    })();

    let _ = pipeline.set_state(gst::State::Null);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_identical_cameras_get_distinct_ids() {
        let ids = unique_device_ids(&names(&[
            "HD Webcam C270",
            "HD Webcam C270",
            "Integrated Camera",
            "HD Webcam C270",
        ]));
        assert_eq!(
            ids,
            names(&[
                "HD Webcam C270",
                "HD Webcam C270 #2",
                "Integrated Camera",
                "HD Webcam C270 #3",
            ])
        );
    }

    #[test]
    fn test_generated_id_does_not_shadow_real_name() {
        let ids = unique_device_ids(&names(&["Cam #2", "Cam", "Cam"]));
        assert_eq!(ids, names(&["Cam #2", "Cam", "Cam #3"]));
    }

    #[test]
    fn test_missing_directory_is_device_not_found() {
        let source = V4l2DirectorySource::new("/nonexistent/v4l/by-id");
        assert!(matches!(
            source.enumerate_devices(),
            Err(DeviceError::DeviceNotFound(_))
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_lists_directory_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("usb-Beta_Cam-video-index0"), b"").unwrap();
        std::fs::write(dir.path().join("usb-Alpha_Cam-video-index0"), b"").unwrap();

        let source = V4l2DirectorySource::new(dir.path());
        let devices = source.enumerate_devices().unwrap();
        let names: Vec<_> = devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["usb-Alpha_Cam-video-index0", "usb-Beta_Cam-video-index0"]);
        assert!(devices[0].id.ends_with("usb-Alpha_Cam-video-index0"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_empty_directory_is_device_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = V4l2DirectorySource::new(dir.path());
        assert!(matches!(
            source.enumerate_devices(),
            Err(DeviceError::DeviceNotFound(_))
        ));
    }
}
