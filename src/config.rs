//! Controller configuration, loadable from TOML.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::traits::PixelFormat;

/// One output-routing parameter applied before acquisition starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingStep {
    /// Enumeration node name.
    pub node: String,
    /// Symbolic entry to select.
    pub entry: String,
}

impl RoutingStep {
    /// Create a routing step.
    #[must_use]
    pub fn new(node: &str, entry: &str) -> Self {
        Self {
            node: node.to_owned(),
            entry: entry.to_owned(),
        }
    }
}

/// Camera controller configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Format every captured frame is converted into.
    pub target_pixel_format: PixelFormat,
    /// User set loaded when a device is bound. `None` keeps the device state.
    pub user_set: Option<String>,
    /// Trigger selector entry used when the device offers it.
    pub preferred_trigger: String,
    /// How long the capture pipeline waits for a filled buffer.
    pub buffer_timeout_ms: u64,
    /// Signal loop sleep between checks of the capture request.
    pub poll_interval_ms: u64,
    /// Flash/line routing, applied in order before each start.
    pub output_routing: Vec<RoutingStep>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            target_pixel_format: PixelFormat::Bgra8,
            user_set: Some("Default".to_owned()),
            preferred_trigger: "ExposureStart".to_owned(),
            buffer_timeout_ms: 1000,
            poll_interval_ms: 5,
            output_routing: vec![
                RoutingStep::new("FlashReference", "ExposureActive"),
                RoutingStep::new("LineSelector", "Line2"),
                RoutingStep::new("LineSource", "FlashActive"),
            ],
        }
    }
}

impl CameraConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Buffer wait timeout.
    pub const fn buffer_timeout(&self) -> Duration {
        Duration::from_millis(self.buffer_timeout_ms)
    }

    /// Signal loop poll interval.
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
