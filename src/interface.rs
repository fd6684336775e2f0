//! Outward delivery of frames and warnings.

use std::sync::mpsc::{self, Receiver, Sender};

use tracing::debug;

use crate::traits::CapturedFrame;

/// Receives what the controller produces.
pub trait CaptureInterface: Send {
    /// A frame was captured and converted.
    fn on_frame(&mut self, frame: CapturedFrame);

    /// A recoverable problem was encountered.
    fn on_warning(&mut self, message: &str);
}

/// Event forwarded by [`ChannelInterface`].
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// A delivered frame.
    Frame(CapturedFrame),
    /// A reported warning.
    Warning(String),
}

/// Forwards every callback over an mpsc channel.
///
/// A dropped receiver is not an error; events are discarded.
#[derive(Debug)]
pub struct ChannelInterface {
    sender: Sender<CaptureEvent>,
}

impl ChannelInterface {
    /// Create the interface and the receiving end of its channel.
    #[must_use]
    pub fn new() -> (Self, Receiver<CaptureEvent>) {
        let (sender, receiver) = mpsc::channel();
        (Self { sender }, receiver)
    }

    fn send(&self, event: CaptureEvent) {
        if self.sender.send(event).is_err() {
            debug!("capture event receiver dropped");
        }
    }
}

impl CaptureInterface for ChannelInterface {
    fn on_frame(&mut self, frame: CapturedFrame) {
        self.send(CaptureEvent::Frame(frame));
    }

    fn on_warning(&mut self, message: &str) {
        self.send(CaptureEvent::Warning(message.to_owned()));
    }
}
