//! Error type for camera control operations.
//!
//! Every public operation of the controller returns [`Result`]; the variant's
//! [`ErrorKind`] tells the caller whether the failure is a configuration
//! problem, a transient I/O hiccup, a buffer lifecycle problem, or fatal.

use std::time::Duration;

use thiserror::Error;

use crate::traits::{BufferHandle, PixelFormat};

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// Broad classification of a [`CameraError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The requested setup cannot work with this device; surfaced before streaming.
    Configuration,
    /// A single capture or parameter access failed; retrying may succeed.
    Transient,
    /// Announcing, revoking or queueing a buffer failed.
    ResourceLifecycle,
    /// No device to talk to, or a required node does not exist.
    Fatal,
}

/// Error type for camera operations.
#[derive(Error, Debug)]
pub enum CameraError {
    /// The device provider reported no devices.
    #[error("no camera device found")]
    NoDevice,

    /// The selection policy pointed past the device list.
    #[error("device index {index} out of range ({count} devices available)")]
    InvalidDeviceIndex {
        /// Requested index.
        index: usize,
        /// Number of devices enumerated.
        count: usize,
    },

    /// No device is bound to the controller.
    #[error("no device bound")]
    NotBound,

    /// A capture was requested while acquisition is not running.
    #[error("acquisition is not running")]
    NotStreaming,

    /// The node map has no node with this name.
    #[error("node '{0}' not found")]
    NodeNotFound(String),

    /// An enumeration node has no entry with this symbolic value.
    #[error("node '{node}' has no entry '{entry}'")]
    EntryNotFound {
        /// Node name.
        node: String,
        /// Requested symbolic value.
        entry: String,
    },

    /// The node exists but cannot be accessed this way right now.
    #[error("node '{node}' is not accessible: {reason}")]
    NodeAccess {
        /// Node name.
        node: String,
        /// Why the access was refused.
        reason: String,
    },

    /// The device offers no usable trigger selector entry.
    #[error("software trigger not supported")]
    TriggerUnsupported,

    /// The converter has no path from the input format to the target format.
    #[error("conversion from {input} to {target} is not supported")]
    ConversionUnsupported {
        /// Device pixel format.
        input: PixelFormat,
        /// Requested output format.
        target: PixelFormat,
    },

    /// A symbolic pixel format name could not be parsed.
    #[error("unknown pixel format '{0}'")]
    UnknownPixelFormat(String),

    /// The operation is not allowed while acquisition is running.
    #[error("cannot change streaming parameters while acquisition is running")]
    StreamingActive,

    /// No filled buffer arrived within the timeout.
    #[error("no frame received within {0:?}")]
    NoFrame(Duration),

    /// Pixel data could not be converted.
    #[error("conversion failed: {0}")]
    Conversion(String),

    /// A captured frame does not show the expected test pattern.
    #[error("frame validation failed: {0}")]
    Validation(String),

    /// The handle is not in the announced pool.
    #[error("buffer {0} is not announced")]
    UnknownBuffer(BufferHandle),

    /// The buffer is already queued to the device.
    #[error("buffer {0} is already queued")]
    BufferAlreadyQueued(BufferHandle),

    /// The buffer is in flight and cannot be revoked.
    #[error("buffer {0} is in use by the device")]
    BufferInUse(BufferHandle),

    /// The device layer reported an error.
    #[error("device error: {0}")]
    Device(String),

    /// The configuration could not be loaded or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CameraError {
    /// Classify this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::TriggerUnsupported
            | Self::ConversionUnsupported { .. }
            | Self::UnknownPixelFormat(_)
            | Self::StreamingActive
            | Self::Config(_) => ErrorKind::Configuration,
            Self::NotStreaming
            | Self::NodeAccess { .. }
            | Self::NoFrame(_)
            | Self::Conversion(_)
            | Self::Validation(_)
            | Self::Device(_) => ErrorKind::Transient,
            Self::UnknownBuffer(_)
            | Self::BufferAlreadyQueued(_)
            | Self::BufferInUse(_)
            | Self::Io(_) => ErrorKind::ResourceLifecycle,
            Self::NoDevice
            | Self::InvalidDeviceIndex { .. }
            | Self::NotBound
            | Self::NodeNotFound(_)
            | Self::EntryNotFound { .. } => ErrorKind::Fatal,
        }
    }

    /// Whether a capture loop may simply try again.
    pub const fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }
}

impl From<toml::de::Error> for CameraError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(CameraError::NotBound.kind(), ErrorKind::Fatal);
        assert_eq!(CameraError::TriggerUnsupported.kind(), ErrorKind::Configuration);
        assert_eq!(
            CameraError::NoFrame(Duration::from_millis(5)).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            CameraError::BufferAlreadyQueued(BufferHandle(3)).kind(),
            ErrorKind::ResourceLifecycle
        );
    }

    #[test]
    fn test_display_messages() {
        let err = CameraError::ConversionUnsupported {
            input: PixelFormat::Mono12p,
            target: PixelFormat::Bgra8,
        };
        assert_eq!(
            err.to_string(),
            "conversion from Mono12p to BGRa8 is not supported"
        );
        assert_eq!(
            CameraError::UnknownBuffer(BufferHandle(7)).to_string(),
            "buffer #7 is not announced"
        );
    }
}
