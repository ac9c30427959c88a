use webcam_recorder_lib::caps::{parse_caps, records_from_caps, CapsError, FieldValue, ParseOptions};
use webcam_recorder_lib::encoding::bitrate_for_height;

use gstreamer as gst;

const MIB: u32 = 1 << 20;

fn strict() -> ParseOptions {
    ParseOptions { strict: true }
}

#[test]
fn test_single_valued_structures_yield_one_row_each() {
    let caps = "video/x-raw, format=(string)YUY2, width=(int)640, height=(int)480, framerate=(fraction)30/1; \
                video/x-raw, format=(string)YUY2, width=(int)320, height=(int)240, framerate=(fraction)15/1";
    let rows = parse_caps(caps).unwrap();
    assert_eq!(rows.len(), 2);

    // Sorted by framerate first
    assert_eq!(rows[0].int("width"), Some(320));
    assert_eq!(rows[0].fraction("framerate"), Some(gst::Fraction::new(15, 1)));
    assert_eq!(rows[1].string("format"), Some("YUY2"));
    assert_eq!(rows[1].get("height"), Some(&FieldValue::Int(480)));
}

#[test]
fn test_multi_valued_field_expands() {
    let caps = "video/x-raw, format=(string){ I420, YUY2, NV12 }, width=(int)1280, height=(int)720, framerate=(fraction)30/1";
    let records = records_from_caps("cam", caps, strict()).unwrap();
    assert_eq!(records.len(), 3);

    let mut formats: Vec<_> = records.iter().map(|r| r.format.as_str()).collect();
    formats.sort();
    assert_eq!(formats, vec!["I420", "NV12", "YUY2"]);
    for record in &records {
        assert_eq!((record.width, record.height), (1280, 720));
        assert_eq!(record.framerate, gst::Fraction::new(30, 1));
    }
}

#[test]
fn test_parsing_is_deterministic() {
    let caps = "video/x-raw, format=(string)I420, width=(int){ 1920, 640, 1280 }, height=(int)480, \
                framerate=(fraction){ 30/1, 15/2, 60/1 }";
    let first = records_from_caps("cam", caps, strict()).unwrap();
    let second = records_from_caps("cam", caps, strict()).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 9);

    assert_eq!(first[0].framerate, gst::Fraction::new(15, 2));
    assert_eq!(first[0].width, 640);
    assert_eq!(first[8].framerate, gst::Fraction::new(60, 1));
    assert_eq!(first[8].width, 1920);
}

#[test]
fn test_bitrate_floor_behavior() {
    assert_eq!(bitrate_for_height(1080).unwrap(), 8 * MIB);
    assert_eq!(bitrate_for_height(1081).unwrap(), 8 * MIB);
    assert_eq!(bitrate_for_height(2000).unwrap(), 16 * MIB);
    assert_eq!(bitrate_for_height(2160).unwrap(), 35 * MIB);
    assert_eq!(bitrate_for_height(100).unwrap(), MIB);
}

#[test]
fn test_caps_string_round_trip() {
    let caps = "video/x-raw, format=(string)I420, width=(int)1280, height=(int)720, \
                pixel-aspect-ratio=(fraction)1/1, framerate=(fraction)30000/1001";
    let record = records_from_caps("cam", caps, strict()).unwrap().remove(0);

    let reparsed = records_from_caps("cam", &record.caps_string(), strict())
        .unwrap()
        .remove(0);
    assert_eq!(reparsed.width, record.width);
    assert_eq!(reparsed.height, record.height);
    assert_eq!(reparsed.format, record.format);
    assert_eq!(reparsed.framerate, gst::Fraction::new(30000, 1001));
}

#[test]
fn test_unknown_type_tag_is_fatal() {
    let result = parse_caps("video/x-raw, interlaced=(boolean)true");
    assert!(matches!(result, Err(CapsError::TypeTranslation(_))));
}

#[test]
fn test_empty_input() {
    assert!(parse_caps("").unwrap().is_empty());
    assert!(records_from_caps("cam", "", strict()).unwrap().is_empty());
}
