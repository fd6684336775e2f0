//! Background loop that services capture requests.
//!
//! A foreground actor raises a [`CaptureRequest`]; the loop takes it with a
//! compare-and-swap at the top of an iteration and runs one
//! [`Camera::fire_and_capture`]. A request raised while a capture is in
//! progress stays pending for the next iteration.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::camera::Camera;
use crate::error::Result;
use crate::traits::DeviceHandle;

/// Pending-capture flag shared between the requester and the loop.
#[derive(Debug, Default)]
pub struct CaptureRequest {
    pending: AtomicBool,
    serviced: AtomicU64,
}

impl CaptureRequest {
    /// Create a request flag with nothing pending.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            serviced: AtomicU64::new(0),
        }
    }

    /// Ask for a capture. Returns `false` if one was already pending.
    pub fn request(&self) -> bool {
        !self.pending.swap(true, Ordering::AcqRel)
    }

    /// Whether a capture is pending.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Clear the flag if set, returning whether it was.
    pub fn take(&self) -> bool {
        self.pending
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Number of requests the loop has serviced.
    pub fn serviced(&self) -> u64 {
        self.serviced.load(Ordering::Acquire)
    }

    fn mark_serviced(&self) {
        self.serviced.fetch_add(1, Ordering::AcqRel);
    }
}

/// Services capture requests against a shared camera.
pub struct SignalLoop<D: DeviceHandle> {
    camera: Arc<Mutex<Camera<D>>>,
    request: Arc<CaptureRequest>,
    stop: Arc<AtomicBool>,
    timeout: Duration,
    poll_interval: Duration,
}

impl<D: DeviceHandle> SignalLoop<D> {
    /// Create a loop using the camera's configured timeout and poll interval.
    pub fn new(camera: Arc<Mutex<Camera<D>>>) -> Self {
        let (timeout, poll_interval) = {
            let guard = camera.lock();
            (guard.config().buffer_timeout(), guard.config().poll_interval())
        };
        Self {
            camera,
            request: Arc::new(CaptureRequest::new()),
            stop: Arc::new(AtomicBool::new(false)),
            timeout,
            poll_interval,
        }
    }

    /// The request flag this loop services.
    pub fn request(&self) -> Arc<CaptureRequest> {
        Arc::clone(&self.request)
    }

    /// Run one iteration without sleeping. Returns whether a request was
    /// serviced.
    pub fn run_once(&self) -> bool {
        if !self.request.take() {
            return false;
        }
        // fire_and_capture reports its own failures
        let result = self.camera.lock().fire_and_capture(self.timeout);
        self.request.mark_serviced();
        debug!(ok = result.is_ok(), "capture request serviced");
        true
    }

    /// Loop until the stop flag is raised.
    pub fn run(&self) {
        while !self.stop.load(Ordering::Acquire) {
            if !self.run_once() {
                thread::sleep(self.poll_interval);
            }
        }
    }
}

impl<D> SignalLoop<D>
where
    D: DeviceHandle + Send + 'static,
    D::Stream: Send,
{
    /// Run the loop on a background thread.
    pub fn spawn(self) -> Result<SignalLoopHandle> {
        let request = Arc::clone(&self.request);
        let stop = Arc::clone(&self.stop);
        let thread = thread::Builder::new()
            .name("signal-loop".to_owned())
            .spawn(move || {
                info!("signal loop started");
                self.run();
                info!("signal loop stopped");
            })?;
        Ok(SignalLoopHandle {
            request,
            stop,
            thread: Some(thread),
        })
    }
}

/// Handle to a running [`SignalLoop`]. Stops the loop when dropped.
#[derive(Debug)]
pub struct SignalLoopHandle {
    request: Arc<CaptureRequest>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SignalLoopHandle {
    /// Ask the loop for a capture.
    pub fn request_capture(&self) -> bool {
        self.request.request()
    }

    /// Number of requests serviced so far.
    pub fn serviced(&self) -> u64 {
        self.request.serviced()
    }

    /// The request flag serviced by the loop.
    pub fn request(&self) -> Arc<CaptureRequest> {
        Arc::clone(&self.request)
    }

    /// Stop the loop and wait for the thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("signal loop thread panicked, captures are no longer serviced");
            }
        }
    }
}

impl Drop for SignalLoopHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraConfig;
    use crate::interface::{CaptureEvent, CaptureInterface, ChannelInterface};
    use crate::sim::{SimDevice, SimStream};
    use crate::traits::CapturedFrame;
    use std::sync::mpsc::Receiver;
    use std::time::Instant;

    fn shared_camera(
        interface: Box<dyn CaptureInterface>,
    ) -> Arc<Mutex<Camera<SimDevice>>> {
        let device = SimDevice::builder().resolution(32, 24).build();
        let config = CameraConfig {
            buffer_timeout_ms: 20,
            poll_interval_ms: 1,
            ..CameraConfig::default()
        };
        let mut camera = Camera::with_device(device, interface, config);
        camera.enable_software_trigger().expect("enable trigger");
        camera.start().expect("start");
        Arc::new(Mutex::new(camera))
    }

    fn frame_count(events: &Receiver<CaptureEvent>) -> usize {
        events
            .try_iter()
            .filter(|event| matches!(event, CaptureEvent::Frame(_)))
            .count()
    }

    /// Raises a new request from inside the delivery of the current one.
    struct Rerequest {
        request: Arc<Mutex<Option<Arc<CaptureRequest>>>>,
        frames: Arc<AtomicU64>,
    }

    impl CaptureInterface for Rerequest {
        fn on_frame(&mut self, _frame: CapturedFrame) {
            if self.frames.fetch_add(1, Ordering::AcqRel) == 0 {
                if let Some(request) = self.request.lock().as_ref() {
                    request.request();
                }
            }
        }

        fn on_warning(&mut self, _message: &str) {}
    }

    /// Frame sink that brings the loop thread down.
    struct Exploding {
        entered: Arc<AtomicBool>,
    }

    impl CaptureInterface for Exploding {
        #[allow(clippy::panic)]
        fn on_frame(&mut self, _frame: CapturedFrame) {
            self.entered.store(true, Ordering::Release);
            panic!("frame sink failed");
        }

        fn on_warning(&mut self, _message: &str) {}
    }

    #[test]
    fn test_request_flag() {
        let request = CaptureRequest::new();
        assert!(!request.take());
        assert!(request.request());
        assert!(!request.request());
        assert!(request.is_pending());
        assert!(request.take());
        assert!(!request.take());
    }

    #[test]
    fn test_run_once_services_single_request() {
        let (interface, events) = ChannelInterface::new();
        let signal_loop = SignalLoop::new(shared_camera(Box::new(interface)));
        let request = signal_loop.request();

        assert!(!signal_loop.run_once());
        request.request();
        assert!(signal_loop.run_once());
        assert!(!signal_loop.run_once());

        assert_eq!(request.serviced(), 1);
        assert_eq!(frame_count(&events), 1);
    }

    #[test]
    fn test_request_during_capture_is_not_lost() {
        let slot = Arc::new(Mutex::new(None));
        let frames = Arc::new(AtomicU64::new(0));
        let interface = Rerequest {
            request: Arc::clone(&slot),
            frames: Arc::clone(&frames),
        };
        let signal_loop = SignalLoop::new(shared_camera(Box::new(interface)));
        *slot.lock() = Some(signal_loop.request());

        signal_loop.request().request();
        assert!(signal_loop.run_once());
        assert!(signal_loop.request().is_pending());
        assert!(signal_loop.run_once());
        assert!(!signal_loop.run_once());
        assert_eq!(frames.load(Ordering::Acquire), 2);
    }

    #[test]
    fn test_failed_capture_does_not_end_loop() {
        let device = SimDevice::builder().build();
        let (interface, _events) = ChannelInterface::new();
        // Never started, so every capture fails with NotStreaming
        let camera = Camera::with_device(device, Box::new(interface), CameraConfig::default());
        let signal_loop = SignalLoop::new(Arc::new(Mutex::new(camera)));
        let request = signal_loop.request();

        request.request();
        assert!(signal_loop.run_once());
        request.request();
        assert!(signal_loop.run_once());
        assert_eq!(request.serviced(), 2);
    }

    #[test]
    fn test_spawned_loop_services_each_request_once() {
        let (interface, events) = ChannelInterface::new();
        let camera = shared_camera(Box::new(interface));
        let handle = SignalLoop::new(Arc::clone(&camera))
            .spawn()
            .expect("spawn signal loop");

        for expected in 1..=3 {
            assert!(handle.request_capture());
            let deadline = Instant::now() + Duration::from_secs(5);
            while handle.serviced() < expected && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            assert_eq!(handle.serviced(), expected);
        }

        thread::sleep(Duration::from_millis(20));
        handle.stop();

        assert_eq!(frame_count(&events), 3);
        assert!(camera.lock().is_streaming());
    }

    #[test]
    fn test_stop_after_thread_panicked() {
        let entered = Arc::new(AtomicBool::new(false));
        let camera = shared_camera(Box::new(Exploding {
            entered: Arc::clone(&entered),
        }));
        let handle = SignalLoop::new(Arc::clone(&camera))
            .spawn()
            .expect("spawn signal loop");

        handle.request_capture();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !entered.load(Ordering::Acquire) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(entered.load(Ordering::Acquire));

        handle.stop();
        let guard = camera.lock();
        assert!(guard.is_streaming());
        assert_eq!(guard.stream().map(SimStream::in_flight), Some(guard.pool().len()));
    }
}
