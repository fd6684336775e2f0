//! Acquisition state machine.
//!
//! `Idle` → `Streaming` on [`Camera::start`], back to `Idle` on
//! [`Camera::stop`]. The transport-layer parameter lock is held for exactly as
//! long as the session is streaming.

use tracing::{debug, info};

use crate::camera::Camera;
use crate::convert::ImageConverter;
use crate::error::{CameraError, Result};
use crate::traits::{nodes, DataStream, DeviceHandle, FlushMode, NodeMap, PixelFormat, StopMode};

/// Acquisition state of a [`Camera`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    /// Not acquiring.
    Idle,
    /// Buffers are queued and the device accepts triggers.
    Streaming,
}

/// An active acquisition. At most one exists per camera.
///
/// The camera holds `Option<AcquisitionSession>`: `Some` means running, so
/// only the parameter lock needs its own field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionSession {
    /// Whether `TLParamsLocked` was set by this session.
    pub parameters_locked: bool,
}

impl<D: DeviceHandle> Camera<D> {
    /// Start acquisition.
    ///
    /// Starting an already streaming camera does nothing. On failure the
    /// camera stays idle with every queued buffer flushed and the parameter
    /// lock released.
    pub fn start(&mut self) -> Result<()> {
        if self.is_streaming() {
            return Ok(());
        }
        if self.device.is_none() {
            let err = CameraError::NotBound;
            self.report("cannot start acquisition", &err);
            return Err(err);
        }

        self.apply_output_routing();

        match self.start_sequence() {
            Ok(()) => {
                self.session = Some(AcquisitionSession {
                    parameters_locked: true,
                });
                info!(buffers = self.pool.len(), "acquisition started");
                Ok(())
            }
            Err(err) => {
                self.report("failed to start acquisition", &err);
                self.roll_back_start();
                Err(err)
            }
        }
    }

    fn start_sequence(&mut self) -> Result<()> {
        let device = self.device.as_mut().ok_or(CameraError::NotBound)?;

        if self.stream.is_none() {
            self.stream = Some(device.open_data_stream()?);
        }
        let stream = self.stream.as_mut().ok_or(CameraError::NotBound)?;
        if self.pool.is_stale(device.nodes())? {
            self.pool.allocate(device.nodes(), stream)?;
        }

        let node_map = device.nodes_mut();
        let input: PixelFormat = node_map.current_entry(nodes::PIXEL_FORMAT)?.parse()?;
        let target = self.config.target_pixel_format;
        if !ImageConverter::supports(input, target) {
            return Err(CameraError::ConversionUnsupported { input, target });
        }

        self.pool.queue_all(stream)?;
        node_map.set(nodes::TL_PARAMS_LOCKED, 1)?;

        let width = dimension(&*node_map, nodes::WIDTH)?;
        let height = dimension(&*node_map, nodes::HEIGHT)?;
        self.converter = ImageConverter::new();
        self.converter.pre_allocate(input, target, width, height)?;

        stream.start_streaming()?;
        node_map.execute(nodes::ACQUISITION_START)?;
        node_map.wait_until_done(nodes::ACQUISITION_START)
    }

    fn roll_back_start(&mut self) {
        let mut failures = Vec::new();
        if let Some(stream) = self.stream.as_mut() {
            if let Err(err) = stream.stop_streaming(StopMode::Kill) {
                failures.push(err);
            }
            if let Err(err) = stream.flush(FlushMode::DiscardAll) {
                failures.push(err);
            }
        }
        if let Some(device) = self.device.as_mut() {
            if let Err(err) = device.nodes_mut().set(nodes::TL_PARAMS_LOCKED, 0) {
                failures.push(err);
            }
        }
        for err in &failures {
            self.report("failed to roll back acquisition start", err);
        }
    }

    /// Select the configured flash and line routing.
    ///
    /// Every step is attempted; failures are warnings.
    fn apply_output_routing(&mut self) {
        let routing = self.config.output_routing.clone();
        for step in &routing {
            let result = self.nodes_mut().and_then(|node_map| {
                node_map.select_entry(&step.node, &step.entry)?;
                node_map.current_entry(&step.node)
            });
            match result {
                Ok(current) => debug!(node = %step.node, %current, "output routing applied"),
                Err(err) => {
                    self.report(&format!("failed to set {} to {}", step.node, step.entry), &err);
                }
            }
        }
    }

    /// Stop acquisition.
    ///
    /// Every step is attempted even if an earlier one fails. The camera always
    /// ends up idle with the parameter lock released; the first failure is
    /// returned.
    pub fn stop(&mut self) -> Result<()> {
        if !self.is_streaming() {
            return Ok(());
        }
        self.session = None;

        let mut failures = Vec::new();
        if let Some(device) = self.device.as_mut() {
            let node_map = device.nodes_mut();
            if let Err(err) = node_map
                .execute(nodes::ACQUISITION_STOP)
                .and_then(|()| node_map.wait_until_done(nodes::ACQUISITION_STOP))
            {
                failures.push(("failed to stop acquisition", err));
            }
        }
        if let Some(stream) = self.stream.as_mut() {
            if let Err(err) = stream.stop_streaming(StopMode::Default) {
                failures.push(("failed to stop data stream", err));
            }
            if let Err(err) = stream.flush(FlushMode::DiscardAll) {
                failures.push(("failed to flush buffers", err));
            }
        }
        if let Some(device) = self.device.as_mut() {
            if let Err(err) = device.nodes_mut().set(nodes::TL_PARAMS_LOCKED, 0) {
                failures.push(("failed to unlock parameters", err));
            }
        }

        for (context, err) in &failures {
            self.report(context, err);
        }
        info!("acquisition stopped");
        failures.into_iter().next().map_or(Ok(()), |(_, err)| Err(err))
    }

    /// Change the device pixel format.
    ///
    /// Rejected while streaming. With a data stream open, the buffer pool is
    /// reallocated for the new payload size.
    pub fn change_pixel_format(&mut self, format: PixelFormat) -> Result<()> {
        self.apply_pixel_format(format)
            .inspect_err(|err| self.report("failed to change pixel format", err))
    }

    fn apply_pixel_format(&mut self, format: PixelFormat) -> Result<()> {
        if self.is_streaming() {
            return Err(CameraError::StreamingActive);
        }
        let device = self.device.as_mut().ok_or(CameraError::NotBound)?;
        device
            .nodes_mut()
            .select_entry(nodes::PIXEL_FORMAT, format.name())?;
        if let Some(stream) = self.stream.as_mut() {
            self.pool.allocate(device.nodes(), stream)?;
        }
        debug!(%format, "pixel format changed");
        Ok(())
    }
}

fn dimension<N: NodeMap + ?Sized>(node_map: &N, name: &str) -> Result<u32> {
    let value = node_map.get(name)?;
    u32::try_from(value).map_err(|_| CameraError::NodeAccess {
        node: name.to_owned(),
        reason: format!("{value} is not a valid dimension"),
    })
}
