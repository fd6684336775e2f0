//! Integration tests of the V4L2 node map using the vivid virtual camera.
//!
//! These tests require:
//! - The `integration` feature flag: `cargo test --features integration`
//! - The vivid kernel module loaded (`modprobe vivid`)
//! - Access to /dev/video* devices (may require sudo or video group membership)
//!
//! Tests will fail if vivid is not available.

#![cfg(feature = "integration")]

use serial_test::serial;
use std::fs;
use std::path::Path;
use trigger_capture::traits::nodes;
use trigger_capture::{CameraError, NodeMap, PixelFormat, V4l2NodeMap};

/// Find all available vivid virtual camera devices.
///
/// Uses sysfs to check device driver name before opening, avoiding
/// unnecessary device opens on real cameras.
fn find_vivid_devices() -> Vec<usize> {
    let video4linux = Path::new("/sys/class/video4linux");
    if !video4linux.exists() {
        return Vec::new();
    }

    let mut devices = Vec::new();
    for index in 0..10 {
        let name_path = video4linux.join(format!("video{index}")).join("name");
        let Ok(name) = fs::read_to_string(&name_path) else {
            continue;
        };

        if !name.to_lowercase().contains("vivid") {
            continue;
        }

        // Verify we can actually open it
        if V4l2NodeMap::open(index).is_ok() {
            devices.push(index);
        }
    }
    devices
}

/// Integration tests MUST have vivid loaded - they should fail, not silently skip.
macro_rules! require_vivid {
    () => {
        match find_vivid_devices().first().copied() {
            Some(idx) => idx,
            None => {
                panic!(
                    "vivid virtual camera not available.\n\
                     Load vivid with: sudo modprobe vivid\n\
                     Or run unit tests only: cargo test --lib"
                );
            }
        }
    };
}

#[test]
#[serial]
fn test_vivid_open() {
    let index = require_vivid!();
    let node_map = V4l2NodeMap::open(index).expect("Failed to open vivid device");

    assert!(node_map.info().interface.contains("vivid"), "Expected vivid driver");
    let names = node_map.node_names();
    assert!(names.iter().any(|name| name == "TestPattern"), "nodes: {names:?}");
}

#[test]
#[serial]
fn test_vivid_geometry_nodes() {
    let index = require_vivid!();
    let node_map = V4l2NodeMap::open(index).expect("Failed to open vivid device");

    let width = node_map.get(nodes::WIDTH).expect("width");
    let height = node_map.get(nodes::HEIGHT).expect("height");
    let payload = node_map.get(nodes::PAYLOAD_SIZE).expect("payload size");

    assert!(width > 0 && height > 0);
    assert!(payload >= width * height, "payload {payload} too small");
}

#[test]
#[serial]
fn test_vivid_pixel_format_entry() {
    let index = require_vivid!();
    let mut node_map = V4l2NodeMap::open(index).expect("Failed to open vivid device");

    let entries = node_map
        .list_entries(nodes::PIXEL_FORMAT)
        .expect("pixel formats");
    assert!(
        entries.iter().any(|entry| entry.symbolic == PixelFormat::Yuv422.name()),
        "vivid should offer YUYV"
    );

    node_map
        .select_entry(nodes::PIXEL_FORMAT, PixelFormat::Yuv422.name())
        .expect("select YUV422_8");
    assert_eq!(
        node_map.current_entry(nodes::PIXEL_FORMAT).expect("current"),
        "YUV422_8"
    );
}

#[test]
#[serial]
fn test_vivid_menu_control_round_trip() {
    let index = require_vivid!();
    let mut node_map = V4l2NodeMap::open(index).expect("Failed to open vivid device");

    let original = node_map.current_entry("TestPattern").expect("current pattern");
    let entries = node_map.list_entries("TestPattern").expect("pattern entries");
    assert!(entries.len() > 1);

    let other = entries
        .iter()
        .find(|entry| entry.symbolic != original)
        .expect("a second pattern");
    node_map
        .select_entry("TestPattern", &other.symbolic)
        .expect("select pattern");
    assert_eq!(
        node_map.current_entry("TestPattern").expect("current"),
        other.symbolic
    );

    node_map
        .select_entry("TestPattern", &original)
        .expect("restore pattern");
}

#[test]
#[serial]
fn test_vivid_lock_rejects_geometry_changes() {
    let index = require_vivid!();
    let mut node_map = V4l2NodeMap::open(index).expect("Failed to open vivid device");

    node_map.set(nodes::TL_PARAMS_LOCKED, 1).expect("lock");
    assert!(matches!(
        node_map.set(nodes::WIDTH, 320),
        Err(CameraError::NodeAccess { .. })
    ));
    node_map.set(nodes::TL_PARAMS_LOCKED, 0).expect("unlock");
    node_map.set(nodes::WIDTH, 640).expect("width while unlocked");
}

#[test]
#[serial]
fn test_vivid_unknown_node() {
    let index = require_vivid!();
    let mut node_map = V4l2NodeMap::open(index).expect("Failed to open vivid device");

    assert!(matches!(
        node_map.execute(nodes::TRIGGER_SOFTWARE),
        Err(CameraError::NodeNotFound(_))
    ));
}
