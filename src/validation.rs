//! Frame validation utilities for test pattern verification.
//!
//! This module provides functions to validate that captured frames contain
//! expected test patterns. Useful for integration testing with the simulated
//! device and with virtual V4L2 cameras.

use crate::error::{CameraError, Result};
use crate::sim::COLOR_BARS;
use crate::traits::CapturedFrame;

/// Tolerance for RGB color matching (accounts for YUV->RGB conversion errors).
const COLOR_TOLERANCE: u32 = 15;

/// Validates that a frame contains the eight-bar colour pattern.
///
/// Checks 8 vertical stripes at their center positions, verifying that each
/// stripe contains the expected color within [`COLOR_TOLERANCE`].
///
/// # Errors
///
/// Returns `Validation` if a pixel cannot be read (unsupported format) or any
/// bar doesn't match the expected color.
pub fn validate_color_bars(frame: &CapturedFrame) -> Result<()> {
    let bar_width = frame.width / 8;
    let center_y = frame.height / 2;

    for (bar_idx, expected_rgb) in (0u32..).zip(COLOR_BARS.iter()) {
        // Sample the center of each bar
        let sample_x = bar_idx * bar_width + bar_width / 2;

        let actual_rgb = frame.pixel_at(sample_x, center_y).ok_or_else(|| {
            CameraError::Validation(format!(
                "failed to get pixel at ({sample_x}, {center_y})"
            ))
        })?;

        if !colors_match(actual_rgb, *expected_rgb, COLOR_TOLERANCE) {
            return Err(CameraError::Validation(format!(
                "color bar {bar_idx} mismatch at ({sample_x}, {center_y}): \
                 expected RGB{expected_rgb:?}, got RGB{actual_rgb:?}"
            )));
        }
    }

    Ok(())
}

/// Validates that a frame contains a horizontal gradient pattern.
///
/// Samples the center row every 10 pixels and verifies that luminance does not
/// decrease from left to right, and that it changes by at least 50 overall.
pub fn validate_gradient(frame: &CapturedFrame) -> Result<()> {
    let center_y = frame.height / 2;

    let mut first_luminance: Option<f32> = None;
    let mut prev_luminance: Option<f32> = None;

    for x in (0..frame.width).step_by(10) {
        let (r, g, b) = frame.pixel_at(x, center_y).ok_or_else(|| {
            CameraError::Validation(format!("failed to get pixel at ({x}, {center_y})"))
        })?;

        // Y' in Rec. 601
        let luminance = 0.114f32.mul_add(
            f32::from(b),
            0.587f32.mul_add(f32::from(g), 0.299 * f32::from(r)),
        );

        first_luminance.get_or_insert(luminance);
        if let Some(prev) = prev_luminance {
            // Allow small decreases due to rounding
            if luminance < prev - 1.0 {
                return Err(CameraError::Validation(format!(
                    "gradient not monotonically increasing at x={x}: \
                     luminance {luminance} < previous {prev}"
                )));
            }
        }
        prev_luminance = Some(luminance);
    }

    if let (Some(first), Some(last)) = (first_luminance, prev_luminance) {
        let luminance_change = last - first;
        if luminance_change < 50.0 {
            return Err(CameraError::Validation(format!(
                "insufficient luminance change for gradient: {luminance_change} \
                 (expected at least 50.0)"
            )));
        }
    }

    Ok(())
}

/// Validates that frame ids increment by exactly 1.
pub fn validate_frame_sequence(frames: &[CapturedFrame]) -> Result<()> {
    if frames.is_empty() {
        return Err(CameraError::Validation(
            "cannot validate empty frame sequence".to_owned(),
        ));
    }

    for (index, pair) in frames.windows(2).enumerate() {
        if let [prev, curr] = pair {
            if curr.frame_id != prev.frame_id + 1 {
                return Err(CameraError::Validation(format!(
                    "frame sequence gap at index {}: expected {}, got {}",
                    index + 1,
                    prev.frame_id + 1,
                    curr.frame_id
                )));
            }
        }
    }

    Ok(())
}

/// Whether all three channels are within `tolerance` of each other.
pub fn colors_match(actual: (u8, u8, u8), expected: (u8, u8, u8), tolerance: u32) -> bool {
    let (ar, ag, ab) = actual;
    let (er, eg, eb) = expected;

    u32::from(ar.abs_diff(er)) <= tolerance
        && u32::from(ag.abs_diff(eg)) <= tolerance
        && u32::from(ab.abs_diff(eb)) <= tolerance
}
