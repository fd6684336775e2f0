//! Camera controller: owns the bound device and every acquisition component.

use tracing::{debug, info, warn};

use crate::acquisition::{AcquisitionSession, AcquisitionState};
use crate::buffer::BufferPool;
use crate::config::CameraConfig;
use crate::convert::ImageConverter;
use crate::error::{CameraError, Result};
use crate::interface::CaptureInterface;
use crate::traits::{
    nodes, DeviceHandle, DeviceInfo, DeviceProvider, NodeMap, PixelFormat, SelectionPolicy,
};

/// Controller for a single camera.
///
/// Device operations fail with [`CameraError::NotBound`] when no device is
/// bound. Every failure is also reported through the capture interface.
pub struct Camera<D: DeviceHandle> {
    pub(crate) device: Option<D>,
    pub(crate) stream: Option<D::Stream>,
    pub(crate) pool: BufferPool,
    pub(crate) converter: ImageConverter,
    pub(crate) session: Option<AcquisitionSession>,
    pub(crate) config: CameraConfig,
    pub(crate) interface: Box<dyn CaptureInterface>,
}

impl<D: DeviceHandle> Camera<D> {
    /// Enumerate devices, pick one by `policy` and bind it.
    pub fn open<P>(
        provider: &mut P,
        policy: &SelectionPolicy,
        interface: Box<dyn CaptureInterface>,
        config: CameraConfig,
    ) -> Result<Self>
    where
        P: DeviceProvider<Device = D>,
    {
        provider.update()?;
        let devices = provider.devices();
        let index = policy.choose(&devices)?;
        let device = provider.open(index)?;
        info!(
            model = %device.info().model_name,
            serial = %device.info().serial_number,
            "opened device"
        );
        Ok(Self::with_device(device, interface, config))
    }

    /// Bind an opened device and load the configured user set.
    ///
    /// A user set that cannot be loaded is reported as a warning; the device
    /// stays bound.
    pub fn with_device(
        device: D,
        interface: Box<dyn CaptureInterface>,
        config: CameraConfig,
    ) -> Self {
        let mut camera = Self::unbound(interface, config);
        camera.device = Some(device);
        if let Err(err) = camera.load_user_set() {
            camera.report("failed to load user set", &err);
        }
        camera
    }

    /// Controller with no device bound.
    #[must_use]
    pub fn unbound(interface: Box<dyn CaptureInterface>, config: CameraConfig) -> Self {
        Self {
            device: None,
            stream: None,
            pool: BufferPool::new(),
            converter: ImageConverter::new(),
            session: None,
            config,
            interface,
        }
    }

    fn load_user_set(&mut self) -> Result<()> {
        let Some(user_set) = self.config.user_set.as_deref() else {
            return Ok(());
        };
        let node_map = self
            .device
            .as_mut()
            .map(DeviceHandle::nodes_mut)
            .ok_or(CameraError::NotBound)?;
        node_map.select_entry(nodes::USER_SET_SELECTOR, user_set)?;
        node_map.execute(nodes::USER_SET_LOAD)?;
        node_map.wait_until_done(nodes::USER_SET_LOAD)?;
        debug!(user_set, "loaded user set");
        Ok(())
    }

    /// Stop acquisition, revoke every buffer and close the data stream.
    ///
    /// Calling this more than once is harmless.
    pub fn close(&mut self) {
        if self.is_streaming() {
            // stop() reports its own failures
            let _ = self.stop();
        }
        if let Some(mut stream) = self.stream.take() {
            if let Err(err) = self.pool.release_all(&mut stream) {
                self.report("failed to revoke buffers", &err);
            }
            debug!("data stream closed");
        }
    }

    /// Current acquisition state.
    pub fn state(&self) -> AcquisitionState {
        match self.session {
            Some(_) => AcquisitionState::Streaming,
            None => AcquisitionState::Idle,
        }
    }

    /// Whether an acquisition session is active.
    pub const fn is_streaming(&self) -> bool {
        self.session.is_some()
    }

    /// Whether the controller holds the transport-layer parameter lock.
    pub fn parameters_locked(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.parameters_locked)
    }

    /// Whether a device is bound.
    pub const fn is_bound(&self) -> bool {
        self.device.is_some()
    }

    /// The buffer pool.
    pub const fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// The bound device's node map.
    pub fn nodes(&self) -> Result<&D::Nodes> {
        self.device
            .as_ref()
            .map(DeviceHandle::nodes)
            .ok_or(CameraError::NotBound)
    }

    /// The bound device's node map, mutably.
    pub fn nodes_mut(&mut self) -> Result<&mut D::Nodes> {
        self.device
            .as_mut()
            .map(DeviceHandle::nodes_mut)
            .ok_or(CameraError::NotBound)
    }

    /// The data stream, once acquisition has been started.
    pub const fn stream(&self) -> Option<&D::Stream> {
        self.stream.as_ref()
    }

    /// Controller configuration.
    pub const fn config(&self) -> &CameraConfig {
        &self.config
    }

    /// Identification of the bound device.
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.device.as_ref().map(DeviceHandle::info)
    }

    /// Whether the current input format converts into `target`.
    pub fn conversion_supported(&self, target: PixelFormat) -> Result<bool> {
        let input: PixelFormat = self.nodes()?.current_entry(nodes::PIXEL_FORMAT)?.parse()?;
        Ok(ImageConverter::supports(input, target))
    }

    /// Fail unless the current input format converts into the target format.
    pub fn enable_conversion_check(&mut self) -> Result<()> {
        self.check_conversion()
            .inspect_err(|err| self.report("conversion check failed", err))
    }

    pub(crate) fn check_conversion(&self) -> Result<()> {
        let target = self.config.target_pixel_format;
        let input: PixelFormat = self.nodes()?.current_entry(nodes::PIXEL_FORMAT)?.parse()?;
        if ImageConverter::supports(input, target) {
            Ok(())
        } else {
            Err(CameraError::ConversionUnsupported { input, target })
        }
    }

    /// Log a warning and forward it to the capture interface.
    pub(crate) fn report(&mut self, context: &str, err: &CameraError) {
        warn!(kind = ?err.kind(), error = %err, "{context}");
        self.interface.on_warning(&format!("{context}: {err}"));
    }
}

impl<D: DeviceHandle> Drop for Camera<D> {
    fn drop(&mut self) {
        self.close();
    }
}
