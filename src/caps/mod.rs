// Capability records
//
// Typed view over the rows produced by the caps parser. A `CapabilityRecord`
// is one concrete device mode (format, resolution, framerate) that can be
// turned back into a caps string to constrain a capture pipeline.

pub mod parser;

pub use parser::{parse_caps, parse_caps_with, CapsRow, FieldValue, ParseOptions};

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

use gstreamer as gst;
use serde::{Serialize, Serializer};

use crate::encoding;

/// Default media type for raw capture modes
pub const RAW_VIDEO: &str = "video/x-raw";

/// Error type for caps parsing
#[derive(Debug, thiserror::Error)]
pub enum CapsError {
    #[error("Unsupported type: {0}")]
    TypeTranslation(String),

    #[error("Malformed field in '{structure}': {field}")]
    MalformedField { structure: String, field: String },

    #[error("Invalid {dtype} value: {value}")]
    InvalidValue { dtype: String, value: String },
}

pub type Result<T> = std::result::Result<T, CapsError>;

/// Compare two fractions by value without going through floating point.
pub fn compare_fractions(a: gst::Fraction, b: gst::Fraction) -> Ordering {
    let lhs = a.numer() as i64 * b.denom() as i64;
    let rhs = b.numer() as i64 * a.denom() as i64;
    // Denominators are normalized positive, but guard anyway
    if (a.denom() < 0) != (b.denom() < 0) {
        rhs.cmp(&lhs)
    } else {
        lhs.cmp(&rhs)
    }
}

/// Decimal approximation of a fraction, for display
pub fn fraction_to_f64(f: gst::Fraction) -> f64 {
    f.numer() as f64 / (f.denom() as f64).max(1.0)
}

/// One discovered device configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityRecord {
    /// Opaque device identifier (device node path or provider display name)
    pub device: String,
    /// Short display name derived from `device`
    pub label: String,
    pub media_type: String,
    /// Pixel format, e.g. "I420"
    pub format: String,
    pub width: u32,
    pub height: u32,
    /// Exact framerate; use `fps()` for display only
    #[serde(serialize_with = "serialize_fraction")]
    pub framerate: gst::Fraction,
    #[serde(serialize_with = "serialize_optional_fraction")]
    pub pixel_aspect_ratio: Option<gst::Fraction>,
    /// Recommended encode bitrate in bits/second
    pub bitrate: u32,
}

impl CapabilityRecord {
    /// Build a record from a parsed row.
    ///
    /// Returns `None` when any of format, width, height or framerate is
    /// missing or unresolved.
    pub fn from_row(device: &str, row: &CapsRow) -> Option<Self> {
        let required = ["format", "width", "height", "framerate"];
        if required.iter().any(|key| row.is_unresolved(key)) {
            return None;
        }

        let format = row.string("format")?.to_string();
        let width = positive_u32(row.int("width")?)?;
        let height = positive_u32(row.int("height")?)?;
        let framerate = row.fraction("framerate")?;
        let pixel_aspect_ratio = row.fraction("pixel-aspect-ratio");

        Some(Self {
            device: device.to_string(),
            label: device_label(device),
            media_type: row.media_type.clone(),
            format,
            width,
            height,
            framerate,
            pixel_aspect_ratio,
            bitrate: encoding::bitrate_for_height(height).unwrap_or(encoding::DEFAULT_BITRATE),
        })
    }

    /// Framerate as a decimal value
    pub fn fps(&self) -> f64 {
        fraction_to_f64(self.framerate)
    }

    /// Pixel aspect ratio as a decimal value, if known
    pub fn pixel_aspect(&self) -> Option<f64> {
        self.pixel_aspect_ratio.map(fraction_to_f64)
    }

    /// Minimal caps string that constrains a source to exactly this mode.
    pub fn caps_string(&self) -> String {
        format!(
            "{}, format=(string){}, width=(int){}, height=(int){}, framerate=(fraction){}/{}",
            self.media_type,
            self.format,
            self.width,
            self.height,
            self.framerate.numer(),
            self.framerate.denom()
        )
    }

    /// Caps used after `videorate` to pin the output framerate
    pub fn framerate_caps_string(&self) -> String {
        format!(
            "{},framerate={}/{}",
            RAW_VIDEO,
            self.framerate.numer(),
            self.framerate.denom()
        )
    }

    pub fn to_caps(&self) -> std::result::Result<gst::Caps, gst::glib::BoolError> {
        self.caps_string().parse::<gst::Caps>()
    }

    fn dedup_key(&self) -> (String, String, u32, u32, i32, i32) {
        (
            self.device.clone(),
            self.format.clone(),
            self.width,
            self.height,
            self.framerate.numer(),
            self.framerate.denom(),
        )
    }
}

impl fmt::Display for CapabilityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}x{}\t{:.0}fps",
            self.label,
            self.width,
            self.height,
            self.fps()
        )
    }
}

fn positive_u32(value: i64) -> Option<u32> {
    u32::try_from(value).ok().filter(|v| *v > 0)
}

/// Parse a caps string into records for `device`, sorted by (framerate, width, height).
pub fn records_from_caps(
    device: &str,
    caps: &str,
    options: ParseOptions,
) -> Result<Vec<CapabilityRecord>> {
    let rows = parser::parse_caps_with(caps, options)?;
    let total = rows.len();
    let mut records: Vec<CapabilityRecord> = rows
        .iter()
        .filter_map(|row| CapabilityRecord::from_row(device, row))
        .collect();

    if records.len() < total {
        log::debug!(
            "Dropped {} of {} caps rows for {} (missing or unresolved fields)",
            total - records.len(),
            total,
            device
        );
    }

    sort_records(&mut records);
    Ok(records)
}

/// Stable sort by (framerate, width, height)
pub fn sort_records(records: &mut [CapabilityRecord]) {
    records.sort_by(|a, b| {
        compare_fractions(a.framerate, b.framerate)
            .then_with(|| a.width.cmp(&b.width))
            .then_with(|| a.height.cmp(&b.height))
    });
}

/// Drop repeated (device, format, width, height, framerate) entries, keeping the first.
pub fn dedup_records(records: Vec<CapabilityRecord>) -> Vec<CapabilityRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert(r.dedup_key()))
        .collect()
}

/// Short display name for a device.
///
/// Device node names such as `usb-Logitech_HD_Webcam_C270-video-index0` yield
/// the vendor part (`Logitech`); anything else is used as-is.
pub fn device_label(device: &str) -> String {
    let name = device.rsplit('/').next().unwrap_or(device);
    match name.split('-').nth(1) {
        Some(part) if !part.is_empty() => part.split('_').next().unwrap_or(part).to_string(),
        _ => name.to_string(),
    }
}

fn serialize_fraction<S: Serializer>(f: &gst::Fraction, s: S) -> std::result::Result<S::Ok, S::Error> {
    use serde::ser::SerializeStruct;
    let mut state = s.serialize_struct("Fraction", 3)?;
    state.serialize_field("numerator", &f.numer())?;
    state.serialize_field("denominator", &f.denom())?;
    state.serialize_field("value", &fraction_to_f64(*f))?;
    state.end()
}

fn serialize_optional_fraction<S: Serializer>(
    f: &Option<gst::Fraction>,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    match f {
        Some(f) => serialize_fraction(f, s),
        None => s.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAPS: &str = "video/x-raw, format=(string)I420, width=(int)640, height=(int)480, \
        pixel-aspect-ratio=(fraction)1/1, framerate=(fraction){ 30/1, 15/1 }; \
        image/jpeg, width=(int)1920, height=(int)1080, framerate=(fraction)30/1; \
        video/x-raw, format=(string)YUY2, width=(int)1280, height=(int)720, framerate=(fraction)10/1";

    fn strict() -> ParseOptions {
        ParseOptions { strict: true }
    }

    #[test]
    fn test_records_drop_incomplete_rows_and_sort() {
        let records = records_from_caps("/dev/v4l/by-id/usb-Acme_Cam-video-index0", CAPS, strict()).unwrap();

        // image/jpeg has no format field
        assert_eq!(records.len(), 3);
        let modes: Vec<_> = records
            .iter()
            .map(|r| (r.format.as_str(), r.width, r.framerate.numer()))
            .collect();
        assert_eq!(modes, vec![("YUY2", 1280, 10), ("I420", 640, 15), ("I420", 640, 30)]);
        assert_eq!(records[1].pixel_aspect(), Some(1.0));
        assert_eq!(records[0].label, "Acme");
        assert_eq!(records[0].bitrate, 5 * (1 << 20));
    }

    #[test]
    fn test_caps_string_round_trip() {
        let record = records_from_caps("cam", CAPS, strict()).unwrap().remove(0);
        let reparsed = records_from_caps("cam", &record.caps_string(), strict()).unwrap();

        assert_eq!(reparsed.len(), 1);
        let again = &reparsed[0];
        assert_eq!(again.width, record.width);
        assert_eq!(again.height, record.height);
        assert_eq!(again.format, record.format);
        assert_eq!(compare_fractions(again.framerate, record.framerate), Ordering::Equal);
    }

    #[test]
    fn test_ntsc_framerate_kept_exact() {
        let records = records_from_caps(
            "cam",
            "video/x-raw, format=(string)NV12, width=(int)1920, height=(int)1080, framerate=(fraction)30000/1001",
            strict(),
        )
        .unwrap();
        let record = &records[0];
        assert_eq!((record.framerate.numer(), record.framerate.denom()), (30000, 1001));
        assert!((record.fps() - 29.97).abs() < 0.01);
        assert!(record.caps_string().ends_with("framerate=(fraction)30000/1001"));
    }

    #[test]
    fn test_dedup_keeps_first() {
        let mut records = records_from_caps("cam", CAPS, strict()).unwrap();
        let copy = records.clone();
        records.extend(copy);
        assert_eq!(dedup_records(records).len(), 3);
    }

    #[test]
    fn test_device_label() {
        assert_eq!(
            device_label("/dev/v4l/by-id/usb-Logitech_HD_Webcam_C270_ABC-video-index0"),
            "Logitech"
        );
        assert_eq!(device_label("HD Webcam C270"), "HD Webcam C270");
        assert_eq!(device_label("/dev/video0"), "video0");
    }

    #[test]
    fn test_display() {
        let record = records_from_caps("usb-Acme_Cam-video", CAPS, strict()).unwrap().remove(2);
        assert_eq!(record.to_string(), "[Acme] 640x480\t30fps");
    }

    #[test]
    fn test_compare_fractions() {
        assert_eq!(
            compare_fractions(gst::Fraction::new(30000, 1001), gst::Fraction::new(30, 1)),
            Ordering::Less
        );
        assert_eq!(
            compare_fractions(gst::Fraction::new(60, 2), gst::Fraction::new(30, 1)),
            Ordering::Equal
        );
    }
}
