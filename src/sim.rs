//! Simulated device for running the controller without hardware.
//!
//! The simulated camera behaves like a buffer-pool based industrial camera:
//! a software trigger queues an exposure, and the exposure lands in the
//! oldest queued buffer when the host waits for a filled buffer. Faults can be
//! injected through [`SimControl`] to exercise error paths.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::convert::rgb_to_yuv;
use crate::error::{CameraError, Result};
use crate::traits::{
    nodes, BufferHandle, BufferView, DataStream, DeviceHandle, DeviceInfo, DeviceProvider,
    EntryInfo, FlushMode, NodeMap, PixelFormat, StopMode,
};

type Shared = Arc<Mutex<SimState>>;

const COMMANDS: [&str; 4] = [
    nodes::USER_SET_LOAD,
    nodes::ACQUISITION_START,
    nodes::ACQUISITION_STOP,
    nodes::TRIGGER_SOFTWARE,
];

/// Test pattern types for simulated frame generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPattern {
    /// Eight vertical colour bars.
    ColorBars,
    /// Horizontal grey gradient from dark to light.
    Gradient,
    /// Solid RGB colour.
    Solid(u8, u8, u8),
}

/// RGB values of the eight colour bars.
///
/// Colors in order: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
pub const COLOR_BARS: [(u8, u8, u8); 8] = [
    (235, 235, 235),
    (235, 235, 16),
    (16, 235, 235),
    (16, 235, 16),
    (235, 16, 235),
    (235, 16, 16),
    (16, 16, 235),
    (16, 16, 16),
];

impl TestPattern {
    /// Colour of the pixel at `x` in a frame `width` pixels wide.
    #[must_use]
    pub fn rgb_at(self, x: u32, width: u32) -> (u8, u8, u8) {
        match self {
            Self::ColorBars => {
                let bar_width = (width / 8).max(1);
                let bar_idx = (x / bar_width).min(7) as usize;
                COLOR_BARS.get(bar_idx).copied().unwrap_or((0, 0, 0))
            }
            Self::Gradient => {
                let v = u8::try_from(u64::from(x) * 255 / u64::from(width.max(1)))
                    .unwrap_or(u8::MAX);
                (v, v, v)
            }
            Self::Solid(r, g, b) => (r, g, b),
        }
    }
}

#[derive(Debug, Clone)]
struct EnumNode {
    entries: Vec<EntryInfo>,
    current: usize,
    writable: bool,
}

impl EnumNode {
    fn new(names: &[&str]) -> Self {
        let entries = names
            .iter()
            .zip(0..)
            .map(|(name, value)| EntryInfo::new(name, value))
            .collect();
        Self {
            entries,
            current: 0,
            writable: true,
        }
    }

    fn current(&self) -> Option<&EntryInfo> {
        self.entries.get(self.current)
    }
}

#[derive(Debug, Clone, Copy)]
struct Exposure {
    frame_id: u64,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    pattern: TestPattern,
    short: bool,
}

#[derive(Debug, Default)]
struct Faults {
    trigger_failures: u32,
    dropped_frames: u32,
    short_frames: u32,
    announce_failures: u32,
    revoke_failures: u32,
    failing_nodes: BTreeSet<String>,
}

#[derive(Debug)]
struct SimState {
    width: u32,
    height: u32,
    params_locked: bool,
    streaming: bool,
    acquiring: bool,
    stream_open: bool,
    enums: BTreeMap<String, EnumNode>,
    executed: HashMap<String, u64>,
    min_buffers: usize,
    pattern: TestPattern,
    frame_counter: u64,
    pending: VecDeque<Exposure>,
    lost_frames: u64,
    faults: Faults,
}

impl SimState {
    fn pixel_format(&self) -> PixelFormat {
        self.enums
            .get(nodes::PIXEL_FORMAT)
            .and_then(EnumNode::current)
            .and_then(|entry| entry.symbolic.parse().ok())
            .unwrap_or(PixelFormat::Mono8)
    }

    fn enum_node(&self, name: &str) -> Result<&EnumNode> {
        self.enums
            .get(name)
            .ok_or_else(|| CameraError::NodeNotFound(name.to_owned()))
    }

    fn check_fault(&self, name: &str) -> Result<()> {
        if self.faults.failing_nodes.contains(name) {
            return Err(CameraError::Device(format!("access to '{name}' failed")));
        }
        Ok(())
    }

    fn check_unlocked(&self, name: &str) -> Result<()> {
        if self.params_locked {
            return Err(CameraError::NodeAccess {
                node: name.to_owned(),
                reason: "parameters are locked".to_owned(),
            });
        }
        Ok(())
    }

    fn node_value(&self, name: &str) -> Result<i64> {
        self.check_fault(name)?;
        match name {
            nodes::WIDTH => Ok(i64::from(self.width)),
            nodes::HEIGHT => Ok(i64::from(self.height)),
            nodes::TL_PARAMS_LOCKED => Ok(i64::from(self.params_locked)),
            nodes::PAYLOAD_SIZE => {
                let size = self.pixel_format().payload_size(self.width, self.height);
                i64::try_from(size).map_err(|err| CameraError::Device(err.to_string()))
            }
            _ => self
                .enum_node(name)?
                .current()
                .map(|entry| entry.value)
                .ok_or_else(|| CameraError::NodeNotFound(name.to_owned())),
        }
    }

    fn set_node(&mut self, name: &str, value: i64) -> Result<()> {
        self.check_fault(name)?;
        match name {
            nodes::WIDTH | nodes::HEIGHT => {
                self.check_unlocked(name)?;
                let value = u32::try_from(value)
                    .ok()
                    .filter(|v| *v > 0)
                    .ok_or_else(|| CameraError::NodeAccess {
                        node: name.to_owned(),
                        reason: format!("{value} is out of range"),
                    })?;
                if name == nodes::WIDTH {
                    self.width = value;
                } else {
                    self.height = value;
                }
                Ok(())
            }
            nodes::TL_PARAMS_LOCKED => {
                self.params_locked = value != 0;
                Ok(())
            }
            nodes::PAYLOAD_SIZE => Err(CameraError::NodeAccess {
                node: name.to_owned(),
                reason: "read-only".to_owned(),
            }),
            _ => Err(CameraError::NodeNotFound(name.to_owned())),
        }
    }

    fn select_entry(&mut self, name: &str, symbolic: &str) -> Result<()> {
        self.check_fault(name)?;
        if name == nodes::PIXEL_FORMAT {
            self.check_unlocked(name)?;
        }
        let node = self
            .enums
            .get_mut(name)
            .ok_or_else(|| CameraError::NodeNotFound(name.to_owned()))?;
        if !node.writable {
            return Err(CameraError::NodeAccess {
                node: name.to_owned(),
                reason: "read-only".to_owned(),
            });
        }
        let index = node
            .entries
            .iter()
            .position(|entry| entry.symbolic == symbolic)
            .ok_or_else(|| CameraError::EntryNotFound {
                node: name.to_owned(),
                entry: symbolic.to_owned(),
            })?;
        if node
            .entries
            .get(index)
            .is_some_and(|entry| !entry.access.is_available())
        {
            return Err(CameraError::NodeAccess {
                node: name.to_owned(),
                reason: format!("entry '{symbolic}' is not available"),
            });
        }
        node.current = index;
        Ok(())
    }

    fn current_entry(&self, name: &str) -> Result<String> {
        self.check_fault(name)?;
        self.enum_node(name)?
            .current()
            .map(|entry| entry.symbolic.clone())
            .ok_or_else(|| CameraError::NodeNotFound(name.to_owned()))
    }

    fn list_entries(&self, name: &str) -> Result<Vec<EntryInfo>> {
        self.check_fault(name)?;
        Ok(self.enum_node(name)?.entries.clone())
    }

    fn execute(&mut self, name: &str) -> Result<()> {
        self.check_fault(name)?;
        match name {
            nodes::USER_SET_LOAD => self.load_user_set(),
            nodes::ACQUISITION_START => {
                if !self.streaming {
                    return Err(CameraError::NodeAccess {
                        node: name.to_owned(),
                        reason: "data stream is not started".to_owned(),
                    });
                }
                self.acquiring = true;
            }
            nodes::ACQUISITION_STOP => self.acquiring = false,
            nodes::TRIGGER_SOFTWARE => self.trigger()?,
            _ => return Err(CameraError::NodeNotFound(name.to_owned())),
        }
        *self.executed.entry(name.to_owned()).or_insert(0) += 1;
        Ok(())
    }

    fn open_stream(&mut self) -> Result<()> {
        if self.stream_open {
            return Err(CameraError::Device("data stream already open".to_owned()));
        }
        self.stream_open = true;
        Ok(())
    }

    fn announce(&mut self) -> Result<()> {
        if self.faults.announce_failures > 0 {
            self.faults.announce_failures -= 1;
            return Err(CameraError::Device("buffer announcement failed".to_owned()));
        }
        Ok(())
    }

    fn revoke(&mut self) -> Result<()> {
        if self.faults.revoke_failures > 0 {
            self.faults.revoke_failures -= 1;
            return Err(CameraError::Device("buffer revocation failed".to_owned()));
        }
        Ok(())
    }

    fn stop_streaming(&mut self) {
        self.streaming = false;
        self.pending.clear();
    }

    fn close_stream(&mut self) {
        self.stream_open = false;
        self.streaming = false;
    }

    fn trigger(&mut self) -> Result<()> {
        if self.faults.trigger_failures > 0 {
            self.faults.trigger_failures -= 1;
            return Err(CameraError::Device("trigger execution failed".to_owned()));
        }
        if !self.acquiring {
            return Err(CameraError::NodeAccess {
                node: nodes::TRIGGER_SOFTWARE.to_owned(),
                reason: "acquisition is not running".to_owned(),
            });
        }
        let mode = self
            .enum_node(nodes::TRIGGER_MODE)?
            .current()
            .map(|entry| entry.symbolic.as_str());
        if mode != Some("On") {
            return Err(CameraError::NodeAccess {
                node: nodes::TRIGGER_SOFTWARE.to_owned(),
                reason: "trigger mode is off".to_owned(),
            });
        }

        let frame_id = self.frame_counter;
        self.frame_counter += 1;
        if self.faults.dropped_frames > 0 {
            self.faults.dropped_frames -= 1;
            debug!(frame_id, "simulated frame dropped");
            return Ok(());
        }
        let short = self.faults.short_frames > 0;
        if short {
            self.faults.short_frames -= 1;
        }
        self.pending.push_back(Exposure {
            frame_id,
            width: self.width,
            height: self.height,
            pixel_format: self.pixel_format(),
            pattern: self.pattern,
            short,
        });
        Ok(())
    }

    fn load_user_set(&mut self) {
        for name in [nodes::TRIGGER_MODE, nodes::TRIGGER_SOURCE] {
            if let Some(node) = self.enums.get_mut(name) {
                node.current = 0;
            }
        }
    }
}

/// Builder for [`SimDevice`].
#[derive(Debug, Clone)]
pub struct SimBuilder {
    info: DeviceInfo,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    pixel_formats: Vec<PixelFormat>,
    trigger_entries: Vec<EntryInfo>,
    min_buffers: usize,
    pattern: TestPattern,
}

impl Default for SimBuilder {
    fn default() -> Self {
        Self {
            info: DeviceInfo {
                model_name: "SIM-1280".to_owned(),
                serial_number: "SIM0001".to_owned(),
                interface: "Simulated Interface".to_owned(),
            },
            width: 640,
            height: 480,
            pixel_format: PixelFormat::Mono8,
            pixel_formats: PixelFormat::ALL.to_vec(),
            trigger_entries: vec![
                EntryInfo::new("ExposureStart", 0),
                EntryInfo::new("ExposureEnd", 1),
            ],
            min_buffers: 3,
            pattern: TestPattern::ColorBars,
        }
    }
}

impl SimBuilder {
    /// Set model name and serial number.
    #[must_use]
    pub fn model(mut self, model_name: &str, serial_number: &str) -> Self {
        model_name.clone_into(&mut self.info.model_name);
        serial_number.clone_into(&mut self.info.serial_number);
        self
    }

    /// Set the initial frame geometry.
    #[must_use]
    pub const fn resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the initial pixel format.
    #[must_use]
    pub const fn pixel_format(mut self, pixel_format: PixelFormat) -> Self {
        self.pixel_format = pixel_format;
        self
    }

    /// Set the pixel formats the device offers.
    #[must_use]
    pub fn pixel_formats(mut self, formats: &[PixelFormat]) -> Self {
        self.pixel_formats = formats.to_vec();
        self
    }

    /// Set the trigger selector entries, all available.
    #[must_use]
    pub fn trigger_entries(mut self, names: &[&str]) -> Self {
        self.trigger_entries = EnumNode::new(names).entries;
        self
    }

    /// Set the trigger selector entries with explicit access status.
    #[must_use]
    pub fn trigger_entry_list(mut self, entries: Vec<EntryInfo>) -> Self {
        self.trigger_entries = entries;
        self
    }

    /// Set the minimum number of buffers the stream asks for.
    #[must_use]
    pub const fn min_buffers(mut self, count: usize) -> Self {
        self.min_buffers = count;
        self
    }

    /// Set the test pattern.
    #[must_use]
    pub const fn pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Build the device.
    #[must_use]
    pub fn build(self) -> SimDevice {
        let mut enums = BTreeMap::new();

        let names: Vec<&str> = self.pixel_formats.iter().map(|f| f.name()).collect();
        let mut pixel_format = EnumNode::new(&names);
        pixel_format.current = self
            .pixel_formats
            .iter()
            .position(|f| *f == self.pixel_format)
            .unwrap_or(0);
        enums.insert(nodes::PIXEL_FORMAT.to_owned(), pixel_format);

        let trigger_selector = EnumNode {
            entries: self.trigger_entries,
            current: 0,
            writable: true,
        };
        enums.insert(nodes::TRIGGER_SELECTOR.to_owned(), trigger_selector);
        enums.insert(nodes::TRIGGER_MODE.to_owned(), EnumNode::new(&["Off", "On"]));
        enums.insert(
            nodes::TRIGGER_SOURCE.to_owned(),
            EnumNode::new(&["Line0", "Line2", "Line3", "Software"]),
        );
        enums.insert(
            nodes::USER_SET_SELECTOR.to_owned(),
            EnumNode::new(&["Default", "UserSet0", "UserSet1"]),
        );
        enums.insert(
            "FlashReference".to_owned(),
            EnumNode::new(&["Off", "ExposureActive", "ReadoutActive"]),
        );
        enums.insert(
            "LineSelector".to_owned(),
            EnumNode::new(&["Line0", "Line1", "Line2", "Line3"]),
        );
        let mut line_mode = EnumNode::new(&["Input", "Output"]);
        line_mode.current = 1;
        line_mode.writable = false;
        enums.insert("LineMode".to_owned(), line_mode);
        enums.insert(
            "LineSource".to_owned(),
            EnumNode::new(&["Off", "ExposureActive", "FlashActive", "UserOutput0"]),
        );

        let state = SimState {
            width: self.width,
            height: self.height,
            params_locked: false,
            streaming: false,
            acquiring: false,
            stream_open: false,
            enums,
            executed: HashMap::new(),
            min_buffers: self.min_buffers,
            pattern: self.pattern,
            frame_counter: 0,
            pending: VecDeque::new(),
            lost_frames: 0,
            faults: Faults::default(),
        };
        let state = Arc::new(Mutex::new(state));

        SimDevice {
            info: self.info,
            nodes: SimNodeMap {
                state: Arc::clone(&state),
            },
            state,
        }
    }
}

/// Simulated camera.
#[derive(Debug)]
pub struct SimDevice {
    info: DeviceInfo,
    nodes: SimNodeMap,
    state: Shared,
}

impl SimDevice {
    /// Start building a simulated device.
    #[must_use]
    pub fn builder() -> SimBuilder {
        SimBuilder::default()
    }

    /// Handle for fault injection and inspection.
    #[must_use]
    pub fn control(&self) -> SimControl {
        SimControl {
            state: Arc::clone(&self.state),
        }
    }
}

impl DeviceHandle for SimDevice {
    type Nodes = SimNodeMap;
    type Stream = SimStream;

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn nodes(&self) -> &SimNodeMap {
        &self.nodes
    }

    fn nodes_mut(&mut self) -> &mut SimNodeMap {
        &mut self.nodes
    }

    fn open_data_stream(&mut self) -> Result<SimStream> {
        self.state.lock().open_stream()?;
        Ok(SimStream {
            state: Arc::clone(&self.state),
            buffers: BTreeMap::new(),
            input: VecDeque::new(),
            output: VecDeque::new(),
            next_handle: 1,
        })
    }
}

/// Node map of a [`SimDevice`].
#[derive(Debug)]
pub struct SimNodeMap {
    state: Shared,
}

impl NodeMap for SimNodeMap {
    fn get(&self, name: &str) -> Result<i64> {
        self.state.lock().node_value(name)
    }

    fn set(&mut self, name: &str, value: i64) -> Result<()> {
        self.state.lock().set_node(name, value)
    }

    fn select_entry(&mut self, name: &str, symbolic: &str) -> Result<()> {
        self.state.lock().select_entry(name, symbolic)
    }

    fn current_entry(&self, name: &str) -> Result<String> {
        self.state.lock().current_entry(name)
    }

    fn list_entries(&self, name: &str) -> Result<Vec<EntryInfo>> {
        self.state.lock().list_entries(name)
    }

    fn execute(&mut self, name: &str) -> Result<()> {
        self.state.lock().execute(name)
    }

    fn wait_until_done(&mut self, name: &str) -> Result<()> {
        if COMMANDS.contains(&name) {
            Ok(())
        } else {
            Err(CameraError::NodeNotFound(name.to_owned()))
        }
    }
}

#[derive(Debug)]
struct SimBuffer {
    data: Vec<u8>,
    filled: usize,
    exposure: Option<Exposure>,
}

/// Data stream of a [`SimDevice`].
#[derive(Debug)]
pub struct SimStream {
    state: Shared,
    buffers: BTreeMap<BufferHandle, SimBuffer>,
    input: VecDeque<BufferHandle>,
    output: VecDeque<BufferHandle>,
    next_handle: u64,
}

impl SimStream {
    /// Buffers queued to the device or filled and not yet handed out.
    pub fn in_flight(&self) -> usize {
        self.input.len() + self.output.len()
    }

    /// Whether `handle` is queued to the device or waiting to be handed out.
    pub fn is_in_flight(&self, handle: BufferHandle) -> bool {
        self.input.contains(&handle) || self.output.contains(&handle)
    }

    /// Move pending exposures into queued buffers.
    fn deliver_pending(&mut self) {
        let pending: Vec<Exposure> = self.state.lock().pending.drain(..).collect();
        for exposure in pending {
            let Some(handle) = self.input.pop_front() else {
                self.state.lock().lost_frames += 1;
                debug!(frame_id = exposure.frame_id, "no buffer queued, frame lost");
                continue;
            };
            if let Some(buffer) = self.buffers.get_mut(&handle) {
                let image = render(
                    exposure.pattern,
                    exposure.pixel_format,
                    exposure.width,
                    exposure.height,
                );
                let mut filled = image.len().min(buffer.data.len());
                if exposure.short {
                    filled /= 2;
                }
                if let (Some(dst), Some(src)) = (buffer.data.get_mut(..filled), image.get(..filled))
                {
                    dst.copy_from_slice(src);
                }
                buffer.filled = filled;
                buffer.exposure = Some(exposure);
                self.output.push_back(handle);
            }
        }
    }
}

impl Drop for SimStream {
    fn drop(&mut self) {
        self.state.lock().close_stream();
    }
}

impl DataStream for SimStream {
    fn min_announced_buffers(&self) -> Result<usize> {
        Ok(self.state.lock().min_buffers)
    }

    fn announce_buffer(&mut self, size: usize) -> Result<BufferHandle> {
        self.state.lock().announce()?;
        let handle = BufferHandle(self.next_handle);
        self.next_handle += 1;
        self.buffers.insert(
            handle,
            SimBuffer {
                data: vec![0; size],
                filled: 0,
                exposure: None,
            },
        );
        Ok(handle)
    }

    fn revoke_buffer(&mut self, handle: BufferHandle) -> Result<()> {
        if !self.buffers.contains_key(&handle) {
            return Err(CameraError::UnknownBuffer(handle));
        }
        self.state.lock().revoke()?;
        if self.is_in_flight(handle) {
            return Err(CameraError::BufferInUse(handle));
        }
        self.buffers.remove(&handle);
        Ok(())
    }

    fn announced_buffers(&self) -> Result<Vec<BufferHandle>> {
        Ok(self.buffers.keys().copied().collect())
    }

    fn queue_buffer(&mut self, handle: BufferHandle) -> Result<()> {
        if !self.buffers.contains_key(&handle) {
            return Err(CameraError::UnknownBuffer(handle));
        }
        if self.is_in_flight(handle) {
            return Err(CameraError::BufferAlreadyQueued(handle));
        }
        self.input.push_back(handle);
        Ok(())
    }

    fn wait_for_filled_buffer(&mut self, timeout: Duration) -> Result<BufferHandle> {
        if self.state.lock().streaming {
            self.deliver_pending();
        }
        self.output.pop_front().ok_or(CameraError::NoFrame(timeout))
    }

    fn buffer_view(&self, handle: BufferHandle) -> Result<BufferView<'_>> {
        let buffer = self
            .buffers
            .get(&handle)
            .ok_or(CameraError::UnknownBuffer(handle))?;
        let exposure = buffer.exposure.ok_or_else(|| {
            CameraError::Device(format!("buffer {handle} has not been filled"))
        })?;
        let data = buffer.data.get(..buffer.filled).unwrap_or_default();
        Ok(BufferView {
            data,
            width: exposure.width,
            height: exposure.height,
            pixel_format: exposure.pixel_format,
            frame_id: exposure.frame_id,
            timestamp: Duration::from_millis(exposure.frame_id * 33),
        })
    }

    fn start_streaming(&mut self) -> Result<()> {
        self.state.lock().streaming = true;
        Ok(())
    }

    fn stop_streaming(&mut self, _mode: StopMode) -> Result<()> {
        self.state.lock().stop_streaming();
        Ok(())
    }

    fn flush(&mut self, mode: FlushMode) -> Result<()> {
        match mode {
            FlushMode::DiscardAll => {
                self.input.clear();
                self.output.clear();
                self.state.lock().pending.clear();
            }
            FlushMode::AllToInput => {
                while let Some(handle) = self.output.pop_front() {
                    self.input.push_back(handle);
                }
            }
        }
        Ok(())
    }
}

/// Fault injection and inspection for a [`SimDevice`].
#[derive(Debug, Clone)]
pub struct SimControl {
    state: Shared,
}

impl SimControl {
    /// Change the minimum buffer count reported by the stream.
    pub fn set_min_buffers(&self, count: usize) {
        self.state.lock().min_buffers = count;
    }

    /// Change the test pattern of subsequent frames.
    pub fn set_pattern(&self, pattern: TestPattern) {
        self.state.lock().pattern = pattern;
    }

    /// Make the next `count` software triggers fail.
    pub fn fail_next_triggers(&self, count: u32) {
        self.state.lock().faults.trigger_failures = count;
    }

    /// Make the next `count` triggers produce no frame.
    pub fn drop_next_frames(&self, count: u32) {
        self.state.lock().faults.dropped_frames = count;
    }

    /// Make the next `count` frames arrive truncated.
    pub fn short_next_frames(&self, count: u32) {
        self.state.lock().faults.short_frames = count;
    }

    /// Make the next `count` buffer announcements fail.
    pub fn fail_next_announcements(&self, count: u32) {
        self.state.lock().faults.announce_failures = count;
    }

    /// Make the next `count` buffer revocations fail.
    pub fn fail_next_revocations(&self, count: u32) {
        self.state.lock().faults.revoke_failures = count;
    }

    /// Make every access to `node` fail.
    pub fn fail_node(&self, node: &str) {
        self.state.lock().faults.failing_nodes.insert(node.to_owned());
    }

    /// Let accesses to `node` succeed again.
    pub fn heal_node(&self, node: &str) {
        self.state.lock().faults.failing_nodes.remove(node);
    }

    /// How often a command node has been executed successfully.
    pub fn executed(&self, command: &str) -> u64 {
        self.state.lock().executed.get(command).copied().unwrap_or(0)
    }

    /// Device-side parameter lock.
    pub fn params_locked(&self) -> bool {
        self.state.lock().params_locked
    }

    /// Whether `AcquisitionStart` is in effect.
    pub fn acquiring(&self) -> bool {
        self.state.lock().acquiring
    }

    /// Whether the data stream is started.
    pub fn streaming(&self) -> bool {
        self.state.lock().streaming
    }

    /// Frames triggered while no buffer was queued.
    pub fn lost_frames(&self) -> u64 {
        self.state.lock().lost_frames
    }

    /// Current entry of an enumeration node.
    pub fn entry(&self, node: &str) -> Option<String> {
        self.state
            .lock()
            .enums
            .get(node)
            .and_then(EnumNode::current)
            .map(|entry| entry.symbolic.clone())
    }
}

/// Provider enumerating a fixed set of simulated devices.
#[derive(Debug, Default)]
pub struct SimProvider {
    builders: Vec<SimBuilder>,
    listed: Vec<DeviceInfo>,
}

impl SimProvider {
    /// Provider for the given devices.
    #[must_use]
    pub const fn new(builders: Vec<SimBuilder>) -> Self {
        Self {
            builders,
            listed: Vec::new(),
        }
    }
}

impl DeviceProvider for SimProvider {
    type Device = SimDevice;

    fn update(&mut self) -> Result<()> {
        self.listed = self.builders.iter().map(|b| b.info.clone()).collect();
        Ok(())
    }

    fn devices(&self) -> Vec<DeviceInfo> {
        self.listed.clone()
    }

    fn open(&mut self, index: usize) -> Result<SimDevice> {
        let count = self.listed.len();
        if index >= count {
            return Err(CameraError::InvalidDeviceIndex { index, count });
        }
        self.builders
            .get(index)
            .cloned()
            .map(SimBuilder::build)
            .ok_or(CameraError::InvalidDeviceIndex { index, count })
    }
}

/// Render a test pattern in `format`.
fn render(pattern: TestPattern, format: PixelFormat, width: u32, height: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(format.payload_size(width, height));
    let luma = |(r, g, b): (u8, u8, u8)| -> u8 {
        let y = (299 * u32::from(r) + 587 * u32::from(g) + 114 * u32::from(b) + 500) / 1000;
        u8::try_from(y).unwrap_or(u8::MAX)
    };

    for y in 0..height {
        match format {
            PixelFormat::Mono12p => {
                let mut x = 0;
                while x < width {
                    let p0 = u16::from(luma(pattern.rgb_at(x, width))) << 4;
                    let p1 = if x + 1 < width {
                        u16::from(luma(pattern.rgb_at(x + 1, width))) << 4
                    } else {
                        0
                    };
                    let [p0_lo, p0_hi] = p0.to_le_bytes();
                    let [p1_lo, _] = p1.to_le_bytes();
                    let [p1_mid, _] = (p1 >> 4).to_le_bytes();
                    data.push(p0_lo);
                    data.push((p0_hi & 0x0F) | ((p1_lo & 0x0F) << 4));
                    data.push(p1_mid);
                    x += 2;
                }
            }
            PixelFormat::Yuv422 => {
                for x in (0..width).step_by(2) {
                    let (y0, u, v) = {
                        let (r, g, b) = pattern.rgb_at(x, width);
                        rgb_to_yuv(r, g, b)
                    };
                    let (r, g, b) = pattern.rgb_at((x + 1).min(width - 1), width);
                    let (y1, _, _) = rgb_to_yuv(r, g, b);
                    data.extend_from_slice(&[y0, u, y1, v]);
                }
            }
            _ => {
                for x in 0..width {
                    let rgb @ (r, g, b) = pattern.rgb_at(x, width);
                    match format {
                        PixelFormat::Mono8 => data.push(luma(rgb)),
                        PixelFormat::Mono10 => {
                            data.extend_from_slice(&(u16::from(luma(rgb)) << 2).to_le_bytes());
                        }
                        PixelFormat::Mono12 => {
                            data.extend_from_slice(&(u16::from(luma(rgb)) << 4).to_le_bytes());
                        }
                        PixelFormat::BayerRG8 => data.push(match (y % 2, x % 2) {
                            (0, 0) => r,
                            (1, 1) => b,
                            _ => g,
                        }),
                        PixelFormat::Rgb8 => data.extend_from_slice(&[r, g, b]),
                        PixelFormat::Bgr8 => data.extend_from_slice(&[b, g, r]),
                        PixelFormat::Rgba8 => data.extend_from_slice(&[r, g, b, 255]),
                        PixelFormat::Bgra8 => data.extend_from_slice(&[b, g, r, 255]),
                        PixelFormat::Mono12p | PixelFormat::Yuv422 => {}
                    }
                }
            }
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::AccessStatus;

    #[test]
    fn test_sim_device_creation() {
        let device = SimDevice::builder().model("SIM-2000", "X42").build();
        assert_eq!(device.info().model_name, "SIM-2000");
        assert_eq!(device.info().serial_number, "X42");
        assert_eq!(device.nodes().get(nodes::WIDTH).expect("width"), 640);
        assert_eq!(
            device.nodes().current_entry(nodes::PIXEL_FORMAT).expect("format"),
            "Mono8"
        );
    }

    #[test]
    fn test_payload_follows_format() {
        let mut device = SimDevice::builder().resolution(64, 48).build();
        device
            .nodes_mut()
            .select_entry(nodes::PIXEL_FORMAT, "RGB8")
            .expect("select RGB8");
        assert_eq!(device.nodes().get(nodes::PAYLOAD_SIZE).expect("payload"), 64 * 48 * 3);
    }

    #[test]
    fn test_locked_parameters_reject_changes() {
        let mut device = SimDevice::builder().build();
        let nodes_map = device.nodes_mut();
        nodes_map.set(nodes::TL_PARAMS_LOCKED, 1).expect("lock");

        assert!(matches!(
            nodes_map.set(nodes::WIDTH, 320),
            Err(CameraError::NodeAccess { .. })
        ));
        assert!(matches!(
            nodes_map.select_entry(nodes::PIXEL_FORMAT, "RGB8"),
            Err(CameraError::NodeAccess { .. })
        ));
    }

    #[test]
    fn test_unavailable_entry_cannot_be_selected() {
        let mut device = SimDevice::builder()
            .trigger_entry_list(vec![
                EntryInfo::new("ExposureStart", 0).with_access(AccessStatus::NotAvailable),
                EntryInfo::new("FrameStart", 1),
            ])
            .build();
        assert!(device
            .nodes_mut()
            .select_entry(nodes::TRIGGER_SELECTOR, "ExposureStart")
            .is_err());
        device
            .nodes_mut()
            .select_entry(nodes::TRIGGER_SELECTOR, "FrameStart")
            .expect("FrameStart is available");
    }

    #[test]
    fn test_trigger_fills_oldest_queued_buffer() {
        let mut device = SimDevice::builder().resolution(16, 8).build();
        let mut stream = device.open_data_stream().expect("open stream");
        let first = stream.announce_buffer(16 * 8).expect("announce");
        let second = stream.announce_buffer(16 * 8).expect("announce");
        stream.queue_buffer(first).expect("queue");
        stream.queue_buffer(second).expect("queue");
        stream.start_streaming().expect("start");

        let nodes_map = device.nodes_mut();
        nodes_map.select_entry(nodes::TRIGGER_MODE, "On").expect("mode");
        nodes_map.execute(nodes::ACQUISITION_START).expect("acquisition start");
        nodes_map.execute(nodes::TRIGGER_SOFTWARE).expect("trigger");

        let filled = stream
            .wait_for_filled_buffer(Duration::from_millis(10))
            .expect("filled buffer");
        assert_eq!(filled, first);
        assert_eq!(stream.in_flight(), 1);

        let view = stream.buffer_view(filled).expect("view");
        assert_eq!(view.frame_id, 0);
        assert_eq!(view.data.len(), 16 * 8);
        // First bar is white
        assert_eq!(view.data[0], 235);
    }

    #[test]
    fn test_double_queue_rejected() {
        let mut device = SimDevice::builder().build();
        let mut stream = device.open_data_stream().expect("open stream");
        let handle = stream.announce_buffer(8).expect("announce");
        stream.queue_buffer(handle).expect("queue");
        assert!(matches!(
            stream.queue_buffer(handle),
            Err(CameraError::BufferAlreadyQueued(h)) if h == handle
        ));
    }

    #[test]
    fn test_trigger_without_queued_buffer_loses_frame() {
        let mut device = SimDevice::builder().build();
        let control = device.control();
        let mut stream = device.open_data_stream().expect("open stream");
        stream.start_streaming().expect("start");
        let nodes_map = device.nodes_mut();
        nodes_map.select_entry(nodes::TRIGGER_MODE, "On").expect("mode");
        nodes_map.execute(nodes::ACQUISITION_START).expect("acquisition start");
        nodes_map.execute(nodes::TRIGGER_SOFTWARE).expect("trigger");

        assert!(matches!(
            stream.wait_for_filled_buffer(Duration::from_millis(1)),
            Err(CameraError::NoFrame(_))
        ));
        assert_eq!(control.lost_frames(), 1);
    }

    #[test]
    fn test_second_stream_rejected_until_dropped() {
        let mut device = SimDevice::builder().build();
        let stream = device.open_data_stream().expect("open stream");
        assert!(device.open_data_stream().is_err());
        drop(stream);
        assert!(device.open_data_stream().is_ok());
    }

    #[test]
    fn test_render_sizes_match_payload() {
        for format in PixelFormat::ALL {
            let data = render(TestPattern::Gradient, format, 10, 4);
            assert_eq!(data.len(), format.payload_size(10, 4), "{format}");
        }
    }

    #[test]
    fn test_gradient_pattern() {
        let data = render(TestPattern::Gradient, PixelFormat::Mono8, 640, 2);
        // Left edge should be dark, right edge bright
        assert!(data[0] < 10);
        assert!(data[639] > 200);
    }

    #[test]
    fn test_solid_pattern() {
        let data = render(TestPattern::Solid(10, 20, 30), PixelFormat::Bgr8, 4, 4);
        assert_eq!(&data[..3], &[30, 20, 10]);
    }

    #[test]
    fn test_provider_lists_and_opens() {
        let mut provider = SimProvider::new(vec![
            SimDevice::builder().model("A", "1"),
            SimDevice::builder().model("B", "2"),
        ]);
        assert!(provider.devices().is_empty());
        provider.update().expect("update");
        assert_eq!(provider.devices().len(), 2);

        let device = provider.open(1).expect("open");
        assert_eq!(device.info().model_name, "B");
        assert!(matches!(
            provider.open(2),
            Err(CameraError::InvalidDeviceIndex { index: 2, count: 2 })
        ));
    }
}
