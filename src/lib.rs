//! Trigger-Capture: a software-triggered frame-grabber controller
//!
//! This library drives a single camera through buffer allocation, acquisition
//! start/stop and software-triggered captures, delivering converted frames to a
//! [`CaptureInterface`]. The device layer sits behind traits, so the same
//! controller runs against the simulated device and real hardware.

pub mod acquisition;
pub mod buffer;
pub mod camera;
pub mod config;
pub mod convert;
pub mod error;
pub mod interface;
pub mod signal;
pub mod sim;
pub mod traits;
pub mod trigger;
pub mod v4l2;
pub mod validation;

pub use acquisition::{AcquisitionSession, AcquisitionState};
pub use buffer::BufferPool;
pub use camera::Camera;
pub use config::{CameraConfig, RoutingStep};
pub use convert::ImageConverter;
pub use error::{CameraError, ErrorKind, Result};
pub use interface::{CaptureEvent, CaptureInterface, ChannelInterface};
pub use signal::{CaptureRequest, SignalLoop, SignalLoopHandle};
pub use traits::{
    BufferHandle, BufferView, CapturedFrame, DataStream, DeviceHandle, DeviceInfo,
    DeviceProvider, NodeMap, PixelFormat, SelectionPolicy,
};
pub use v4l2::V4l2NodeMap;
