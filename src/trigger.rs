//! Software trigger configuration and the capture pipeline.

use std::time::Duration;

use tracing::{debug, trace};

use crate::camera::Camera;
use crate::error::{CameraError, Result};
use crate::traits::{nodes, CapturedFrame, DataStream, DeviceHandle, NodeMap};

impl<D: DeviceHandle> Camera<D> {
    /// Put the device into software-trigger mode.
    ///
    /// Uses the configured preferred trigger selector when the device offers
    /// it, otherwise the first available one. Returns the selector chosen.
    pub fn enable_software_trigger(&mut self) -> Result<String> {
        self.configure_software_trigger()
            .inspect_err(|err| self.report("failed to enable software trigger", err))
    }

    fn configure_software_trigger(&mut self) -> Result<String> {
        let preferred = self.config.preferred_trigger.clone();
        let node_map = self.nodes_mut()?;

        let available: Vec<String> = node_map
            .list_entries(nodes::TRIGGER_SELECTOR)?
            .into_iter()
            .filter(|entry| entry.access.is_available())
            .map(|entry| entry.symbolic)
            .collect();

        let selector = if available.contains(&preferred) {
            preferred
        } else {
            available
                .into_iter()
                .next()
                .ok_or(CameraError::TriggerUnsupported)?
        };

        node_map.select_entry(nodes::TRIGGER_SELECTOR, &selector)?;
        node_map.select_entry(nodes::TRIGGER_MODE, "On")?;
        node_map.select_entry(nodes::TRIGGER_SOURCE, "Software")?;

        let mode = node_map.current_entry(nodes::TRIGGER_MODE)?;
        let source = node_map.current_entry(nodes::TRIGGER_SOURCE)?;
        debug!(%selector, %mode, %source, "software trigger enabled");
        Ok(selector)
    }

    /// Execute the software trigger and wait for the command to complete.
    pub fn software_trigger(&mut self) -> Result<()> {
        self.execute_trigger()
            .inspect_err(|err| self.report("software trigger failed", err))
    }

    fn execute_trigger(&mut self) -> Result<()> {
        let node_map = self.nodes_mut()?;
        node_map.execute(nodes::TRIGGER_SOFTWARE)?;
        node_map.wait_until_done(nodes::TRIGGER_SOFTWARE)
    }

    /// Trigger one exposure and deliver the converted frame.
    ///
    /// The filled buffer is requeued whether or not conversion succeeds. A
    /// failed requeue after a successful conversion is reported and the frame
    /// is still delivered.
    pub fn fire_and_capture(&mut self, timeout: Duration) -> Result<()> {
        if !self.is_streaming() {
            let err = CameraError::NotStreaming;
            self.report("cannot capture", &err);
            return Err(err);
        }

        match self.capture_frame(timeout) {
            Ok(frame) => {
                trace!(frame_id = frame.frame_id, "delivering frame");
                self.interface.on_frame(frame);
                Ok(())
            }
            Err(err) => {
                self.report("capture failed", &err);
                Err(err)
            }
        }
    }

    fn capture_frame(&mut self, timeout: Duration) -> Result<CapturedFrame> {
        self.execute_trigger()?;

        let target = self.config.target_pixel_format;
        let stream = self.stream.as_mut().ok_or(CameraError::NotStreaming)?;
        let handle = stream.wait_for_filled_buffer(timeout)?;

        let converted = stream
            .buffer_view(handle)
            .and_then(|view| self.converter.convert(&view, target));
        let requeued = stream.queue_buffer(handle);

        match (converted, requeued) {
            (Ok(frame), Ok(())) => Ok(frame),
            (Ok(frame), Err(err)) => {
                self.report(&format!("failed to requeue buffer {handle}"), &err);
                Ok(frame)
            }
            (Err(err), requeued) => {
                if let Err(requeue_err) = requeued {
                    self.report(&format!("failed to requeue buffer {handle}"), &requeue_err);
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraConfig;
    use crate::interface::{CaptureEvent, ChannelInterface};
    use crate::sim::{SimControl, SimDevice, SimStream};
    use crate::traits::{AccessStatus, EntryInfo, PixelFormat};
    use std::sync::mpsc::Receiver;

    const TIMEOUT: Duration = Duration::from_millis(50);

    fn camera(device: SimDevice) -> (Camera<SimDevice>, SimControl, Receiver<CaptureEvent>) {
        let control = device.control();
        let (interface, events) = ChannelInterface::new();
        let camera = Camera::with_device(device, Box::new(interface), CameraConfig::default());
        (camera, control, events)
    }

    fn streaming_camera() -> (Camera<SimDevice>, SimControl, Receiver<CaptureEvent>) {
        let (mut camera, control, events) = camera(SimDevice::builder().resolution(64, 48).build());
        camera.enable_software_trigger().expect("enable trigger");
        camera.start().expect("start");
        (camera, control, events)
    }

    fn frames(events: &Receiver<CaptureEvent>) -> Vec<CapturedFrame> {
        events
            .try_iter()
            .filter_map(|event| match event {
                CaptureEvent::Frame(frame) => Some(frame),
                CaptureEvent::Warning(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_enable_prefers_configured_selector() {
        let (mut camera, control, _events) = camera(
            SimDevice::builder()
                .trigger_entries(&["FrameStart", "ExposureStart"])
                .build(),
        );
        let selector = camera.enable_software_trigger().expect("enable");

        assert_eq!(selector, "ExposureStart");
        assert_eq!(control.entry(nodes::TRIGGER_MODE).as_deref(), Some("On"));
        assert_eq!(control.entry(nodes::TRIGGER_SOURCE).as_deref(), Some("Software"));
    }

    #[test]
    fn test_enable_falls_back_to_first_available() {
        let (mut camera, control, _events) = camera(
            SimDevice::builder()
                .trigger_entry_list(vec![
                    EntryInfo::new("ExposureStart", 0).with_access(AccessStatus::NotImplemented),
                    EntryInfo::new("FrameStart", 1),
                ])
                .build(),
        );
        assert_eq!(camera.enable_software_trigger().expect("enable"), "FrameStart");
        assert_eq!(control.entry(nodes::TRIGGER_SELECTOR).as_deref(), Some("FrameStart"));
    }

    #[test]
    fn test_enable_without_available_selector() {
        let (mut camera, _control, events) = camera(
            SimDevice::builder()
                .trigger_entry_list(vec![
                    EntryInfo::new("ExposureStart", 0).with_access(AccessStatus::NotAvailable)
                ])
                .build(),
        );
        assert!(matches!(
            camera.enable_software_trigger(),
            Err(CameraError::TriggerUnsupported)
        ));
        assert!(matches!(events.try_recv(), Ok(CaptureEvent::Warning(_))));
    }

    #[test]
    fn test_capture_requires_streaming() {
        let (mut camera, control, _events) = camera(SimDevice::builder().build());
        assert!(matches!(
            camera.fire_and_capture(TIMEOUT),
            Err(CameraError::NotStreaming)
        ));
        assert_eq!(control.executed(nodes::TRIGGER_SOFTWARE), 0);
    }

    #[test]
    fn test_capture_delivers_converted_frame() {
        let (mut camera, _control, events) = streaming_camera();
        camera.fire_and_capture(TIMEOUT).expect("capture");
        camera.fire_and_capture(TIMEOUT).expect("capture");

        let frames = frames(&events);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].pixel_format, PixelFormat::Bgra8);
        assert_eq!((frames[0].width, frames[0].height), (64, 48));
        assert_eq!(frames[1].frame_id, frames[0].frame_id + 1);
    }

    #[test]
    fn test_buffer_requeued_after_capture() {
        let (mut camera, _control, _events) = streaming_camera();
        let pool_len = camera.pool().len();
        for _ in 0..pool_len * 2 {
            camera.fire_and_capture(TIMEOUT).expect("capture");
        }
        assert_eq!(camera.stream().map(SimStream::in_flight), Some(pool_len));
    }

    #[test]
    fn test_buffer_requeued_when_conversion_fails() {
        let (mut camera, control, events) = streaming_camera();
        control.short_next_frames(1);

        assert!(matches!(
            camera.fire_and_capture(TIMEOUT),
            Err(CameraError::Conversion(_))
        ));
        assert_eq!(camera.stream().map(SimStream::in_flight), Some(camera.pool().len()));
        assert!(frames(&events).is_empty());

        camera.fire_and_capture(TIMEOUT).expect("next capture succeeds");
    }

    #[test]
    fn test_dropped_frame_times_out() {
        let (mut camera, control, _events) = streaming_camera();
        control.drop_next_frames(1);

        let err = camera.fire_and_capture(TIMEOUT).expect_err("no frame");
        assert!(matches!(err, CameraError::NoFrame(_)));
        assert!(err.is_transient());
        assert_eq!(camera.stream().map(SimStream::in_flight), Some(camera.pool().len()));
    }

    #[test]
    fn test_trigger_failure_is_reported() {
        let (mut camera, control, events) = streaming_camera();
        control.fail_next_triggers(1);

        assert!(camera.fire_and_capture(TIMEOUT).is_err());
        assert!(matches!(events.try_recv(), Ok(CaptureEvent::Warning(msg)) if msg.contains("capture failed")));
        camera.fire_and_capture(TIMEOUT).expect("recovered");
    }
}
