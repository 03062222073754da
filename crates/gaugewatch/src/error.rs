//! Error types for the acquisition grid.

use thiserror::Error;

/// Grid-level failures from the permission/enumeration handshake.
///
/// Each variant is terminal for one `discover()` call; recovery is a
/// user-initiated refresh.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnumerationError {
    /// The platform refused camera access
    #[error("Camera access denied. Please grant permission and refresh.")]
    PermissionDenied,

    /// Permission was granted but no video input is attached
    #[error(
        "No cameras found. Please ensure your cameras are connected and not in use by another application."
    )]
    NoDevicesFound,

    /// The host has no media-capture capability at all
    #[error("Media devices API not supported in this environment.")]
    UnsupportedEnvironment,

    /// Anything else raised while probing or listing devices
    #[error("Could not access cameras: {0}")]
    AcquisitionFailed(String),
}

/// Failures local to a single feed. They never reach sibling feeds or the grid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// Opening the device stream failed (hardware, bandwidth, revoked permission)
    #[error("Camera failed to start: {0}")]
    StreamAcquisitionFailed(String),

    /// The recognition collaborator could not be reached or answered badly
    #[error("Failed to get OCR result: {0}")]
    RecognitionRequestFailed(String),

    /// Capture operations require a live stream
    #[error("Video feed not ready.")]
    NotActive,

    /// The captured frame could not be turned into a still image
    #[error("Could not encode frame: {0}")]
    Encode(String),

    /// The controller task has already been torn down
    #[error("Feed controller is no longer running")]
    ControllerGone,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}
