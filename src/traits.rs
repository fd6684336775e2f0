//! Core traits and types for the device layer.
//!
//! The controller never talks to hardware directly. It consumes three narrow
//! seams: a [`NodeMap`] for named parameters, a [`DataStream`] for the
//! acquisition buffers, and a [`DeviceProvider`] that enumerates and opens
//! devices.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CameraError, Result};

/// Names of the parameter nodes the controller relies on.
pub mod nodes {
    /// Frame width in pixels.
    pub const WIDTH: &str = "Width";
    /// Frame height in pixels.
    pub const HEIGHT: &str = "Height";
    /// Current pixel format (enumeration).
    pub const PIXEL_FORMAT: &str = "PixelFormat";
    /// Bytes needed for one frame at the current geometry and format.
    pub const PAYLOAD_SIZE: &str = "PayloadSize";
    /// Transport-layer parameter lock (0 or 1).
    pub const TL_PARAMS_LOCKED: &str = "TLParamsLocked";
    /// Selects which trigger the other trigger nodes configure.
    pub const TRIGGER_SELECTOR: &str = "TriggerSelector";
    /// Trigger on/off.
    pub const TRIGGER_MODE: &str = "TriggerMode";
    /// Trigger signal source.
    pub const TRIGGER_SOURCE: &str = "TriggerSource";
    /// Software trigger command.
    pub const TRIGGER_SOFTWARE: &str = "TriggerSoftware";
    /// Acquisition start command.
    pub const ACQUISITION_START: &str = "AcquisitionStart";
    /// Acquisition stop command.
    pub const ACQUISITION_STOP: &str = "AcquisitionStop";
    /// Selects the user set to load.
    pub const USER_SET_SELECTOR: &str = "UserSetSelector";
    /// Loads the selected user set.
    pub const USER_SET_LOAD: &str = "UserSetLoad";
}

/// Pixel format, named the way camera node maps name it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit monochrome.
    Mono8,
    /// 10-bit monochrome in 16-bit little-endian words.
    Mono10,
    /// 12-bit monochrome in 16-bit little-endian words.
    Mono12,
    /// 12-bit monochrome, two pixels packed into three bytes.
    Mono12p,
    /// 8-bit Bayer mosaic, RGGB order.
    BayerRG8,
    /// 24-bit RGB.
    #[serde(rename = "RGB8")]
    Rgb8,
    /// 24-bit BGR.
    #[serde(rename = "BGR8")]
    Bgr8,
    /// 32-bit RGB with alpha.
    #[serde(rename = "RGBa8")]
    Rgba8,
    /// 32-bit BGR with alpha.
    #[serde(rename = "BGRa8")]
    Bgra8,
    /// YUV 4:2:2 packed as `Y0 U Y1 V`.
    #[serde(rename = "YUV422_8")]
    Yuv422,
}

impl PixelFormat {
    /// Every known format.
    pub const ALL: [Self; 10] = [
        Self::Mono8,
        Self::Mono10,
        Self::Mono12,
        Self::Mono12p,
        Self::BayerRG8,
        Self::Rgb8,
        Self::Bgr8,
        Self::Rgba8,
        Self::Bgra8,
        Self::Yuv422,
    ];

    /// Symbolic node-map name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Mono8 => "Mono8",
            Self::Mono10 => "Mono10",
            Self::Mono12 => "Mono12",
            Self::Mono12p => "Mono12p",
            Self::BayerRG8 => "BayerRG8",
            Self::Rgb8 => "RGB8",
            Self::Bgr8 => "BGR8",
            Self::Rgba8 => "RGBa8",
            Self::Bgra8 => "BGRa8",
            Self::Yuv422 => "YUV422_8",
        }
    }

    /// Bytes needed for one `width` x `height` frame.
    pub const fn payload_size(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            Self::Mono8 | Self::BayerRG8 => pixels,
            Self::Mono10 | Self::Mono12 | Self::Yuv422 => pixels * 2,
            Self::Mono12p => (pixels * 3).div_ceil(2),
            Self::Rgb8 | Self::Bgr8 => pixels * 3,
            Self::Rgba8 | Self::Bgra8 => pixels * 4,
        }
    }

    /// Whether this is a single-channel format.
    pub const fn is_mono(self) -> bool {
        matches!(self, Self::Mono8 | Self::Mono10 | Self::Mono12 | Self::Mono12p)
    }

    /// Whether this is one of the 32-bit colour-with-alpha formats.
    pub const fn is_rgba_family(self) -> bool {
        matches!(self, Self::Rgba8 | Self::Bgra8)
    }

    /// V4L2 fourcc for this format.
    pub const fn fourcc(self) -> [u8; 4] {
        match self {
            Self::Mono8 => *b"GREY",
            Self::Mono10 => *b"Y10 ",
            Self::Mono12 => *b"Y12 ",
            Self::Mono12p => *b"Y12P",
            Self::BayerRG8 => *b"RGGB",
            Self::Rgb8 => *b"RGB3",
            Self::Bgr8 => *b"BGR3",
            Self::Rgba8 => *b"AB24",
            Self::Bgra8 => *b"AR24",
            Self::Yuv422 => *b"YUYV",
        }
    }

    /// Look up a format by V4L2 fourcc.
    pub fn from_fourcc(fourcc: [u8; 4]) -> Option<Self> {
        Self::ALL.into_iter().find(|format| format.fourcc() == fourcc)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PixelFormat {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|format| format.name() == s)
            .ok_or_else(|| CameraError::UnknownPixelFormat(s.to_owned()))
    }
}

/// Access status of a node or enumeration entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessStatus {
    /// Readable and writable.
    ReadWrite,
    /// Readable only.
    ReadOnly,
    /// Writable only.
    WriteOnly,
    /// Implemented but currently unavailable.
    NotAvailable,
    /// Not implemented by this device.
    NotImplemented,
}

impl AccessStatus {
    /// Whether the entry can be selected at all.
    pub const fn is_available(self) -> bool {
        !matches!(self, Self::NotAvailable | Self::NotImplemented)
    }
}

/// One entry of an enumeration node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    /// Symbolic value, e.g. `ExposureStart`.
    pub symbolic: String,
    /// Integer value of the entry.
    pub value: i64,
    /// Current access status.
    pub access: AccessStatus,
}

impl EntryInfo {
    /// Create an available entry.
    #[must_use]
    pub fn new(symbolic: &str, value: i64) -> Self {
        Self {
            symbolic: symbolic.to_owned(),
            value,
            access: AccessStatus::ReadWrite,
        }
    }

    /// Override the access status.
    #[must_use]
    pub fn with_access(mut self, access: AccessStatus) -> Self {
        self.access = access;
        self
    }
}

/// Named-parameter access to a device.
///
/// Integer nodes carry booleans as 0/1.
pub trait NodeMap {
    /// Read an integer node.
    fn get(&self, name: &str) -> Result<i64>;

    /// Write an integer node.
    fn set(&mut self, name: &str, value: i64) -> Result<()>;

    /// Select an enumeration entry by symbolic value.
    fn select_entry(&mut self, name: &str, symbolic: &str) -> Result<()>;

    /// Symbolic value of the current enumeration entry.
    fn current_entry(&self, name: &str) -> Result<String>;

    /// All entries of an enumeration node, in device order.
    fn list_entries(&self, name: &str) -> Result<Vec<EntryInfo>>;

    /// Execute a command node.
    fn execute(&mut self, name: &str) -> Result<()>;

    /// Block until a previously executed command has completed.
    fn wait_until_done(&mut self, name: &str) -> Result<()>;
}

/// Device-assigned identity of an announced buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u64);

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How the data stream stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopMode {
    /// Let the transfer in progress finish.
    #[default]
    Default,
    /// Abort immediately.
    Kill,
}

/// What a flush does with buffers held by the acquisition engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Drop all queued and filled buffers back into the announced pool.
    DiscardAll,
    /// Move filled buffers back to the input queue.
    AllToInput,
}

/// Borrowed view of a filled buffer.
#[derive(Debug, Clone, Copy)]
pub struct BufferView<'a> {
    /// Filled bytes.
    pub data: &'a [u8],
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format of `data`.
    pub pixel_format: PixelFormat,
    /// Device frame counter.
    pub frame_id: u64,
    /// Device timestamp.
    pub timestamp: Duration,
}

/// Buffer transport between the device and host memory.
pub trait DataStream {
    /// Minimum number of buffers the device needs announced.
    fn min_announced_buffers(&self) -> Result<usize>;

    /// Allocate a buffer of `size` bytes and register it with the device.
    fn announce_buffer(&mut self, size: usize) -> Result<BufferHandle>;

    /// Deregister a buffer and free it.
    fn revoke_buffer(&mut self, handle: BufferHandle) -> Result<()>;

    /// Every buffer the device currently considers announced.
    fn announced_buffers(&self) -> Result<Vec<BufferHandle>>;

    /// Hand a buffer to the device to be filled.
    fn queue_buffer(&mut self, handle: BufferHandle) -> Result<()>;

    /// Wait up to `timeout` for the next filled buffer.
    fn wait_for_filled_buffer(&mut self, timeout: Duration) -> Result<BufferHandle>;

    /// Read-only view of a filled buffer.
    fn buffer_view(&self, handle: BufferHandle) -> Result<BufferView<'_>>;

    /// Start the acquisition engine.
    fn start_streaming(&mut self) -> Result<()>;

    /// Stop the acquisition engine.
    fn stop_streaming(&mut self, mode: StopMode) -> Result<()>;

    /// Remove buffers from the acquisition engine.
    fn flush(&mut self, mode: FlushMode) -> Result<()>;
}

/// Identification of an enumerable device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Model name.
    pub model_name: String,
    /// Serial number.
    pub serial_number: String,
    /// Display name of the interface the device hangs off.
    pub interface: String,
}

/// An opened device.
pub trait DeviceHandle {
    /// Node map type.
    type Nodes: NodeMap;
    /// Data stream type.
    type Stream: DataStream;

    /// Device identification.
    fn info(&self) -> &DeviceInfo;

    /// Parameter nodes.
    fn nodes(&self) -> &Self::Nodes;

    /// Parameter nodes, mutably.
    fn nodes_mut(&mut self) -> &mut Self::Nodes;

    /// Open the device's first data stream.
    fn open_data_stream(&mut self) -> Result<Self::Stream>;
}

/// Enumerates and opens devices.
pub trait DeviceProvider {
    /// Device type produced by `open`.
    type Device: DeviceHandle;

    /// Refresh the device list.
    fn update(&mut self) -> Result<()>;

    /// Devices found by the last update.
    fn devices(&self) -> Vec<DeviceInfo>;

    /// Open the device at `index` for control.
    fn open(&mut self, index: usize) -> Result<Self::Device>;
}

/// How to pick a device from an enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SelectionPolicy {
    /// The first device listed.
    #[default]
    First,
    /// The device at this index.
    Index(usize),
    /// The first device with this model name.
    Model(String),
    /// The device with this serial number.
    Serial(String),
}

impl SelectionPolicy {
    /// Pick an index from `devices`.
    pub fn choose(&self, devices: &[DeviceInfo]) -> Result<usize> {
        if devices.is_empty() {
            return Err(CameraError::NoDevice);
        }
        let found = match self {
            Self::First => Some(0),
            Self::Index(index) => Some(*index).filter(|index| *index < devices.len()),
            Self::Model(model) => devices.iter().position(|info| &info.model_name == model),
            Self::Serial(serial) => devices
                .iter()
                .position(|info| &info.serial_number == serial),
        };
        found.ok_or(match self {
            Self::Index(index) => CameraError::InvalidDeviceIndex {
                index: *index,
                count: devices.len(),
            },
            _ => CameraError::NoDevice,
        })
    }
}

/// A converted frame, owned independently of the buffer it came from.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Pixel data in `pixel_format`.
    pub data: Vec<u8>,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format of `data`.
    pub pixel_format: PixelFormat,
    /// Device frame counter.
    pub frame_id: u64,
    /// Device timestamp.
    pub timestamp: Duration,
}

impl CapturedFrame {
    /// Get RGB values for a pixel.
    ///
    /// Returns `None` for out-of-range coordinates or formats other than
    /// `Mono8` and the 8-bit RGB/BGR families.
    #[must_use]
    pub fn pixel_at(&self, x: u32, y: u32) -> Option<(u8, u8, u8)> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let index = y as usize * self.width as usize + x as usize;
        let px = |bpp: usize| self.data.get(index * bpp..index * bpp + bpp);

        match self.pixel_format {
            PixelFormat::Mono8 => px(1).and_then(|p| p.first()).map(|&v| (v, v, v)),
            PixelFormat::Rgb8 => match *px(3)? {
                [r, g, b] => Some((r, g, b)),
                _ => None,
            },
            PixelFormat::Bgr8 => match *px(3)? {
                [b, g, r] => Some((r, g, b)),
                _ => None,
            },
            PixelFormat::Rgba8 => match *px(4)? {
                [r, g, b, _] => Some((r, g, b)),
                _ => None,
            },
            PixelFormat::Bgra8 => match *px(4)? {
                [b, g, r, _] => Some((r, g, b)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Expand the frame to tightly packed RGBA.
    pub fn to_rgba8(&self) -> Option<Vec<u8>> {
        let mut out = Vec::with_capacity(self.width as usize * self.height as usize * 4);
        for y in 0..self.height {
            for x in 0..self.width {
                let (r, g, b) = self.pixel_at(x, y)?;
                out.extend_from_slice(&[r, g, b, 255]);
            }
        }
        Some(out)
    }
}
