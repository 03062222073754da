//! Clean layer boundary between the grid and the capture backend.
//!
//! Enumeration and feed controllers call [`MediaPlatform`] instead of a
//! concrete backend, which keeps the orchestration testable against
//! [`SimulatedMedia`].

mod sim;

pub use sim::{SimulatedDevice, SimulatedMedia};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Result type for platform operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Error names the platform uses when the user (or policy) refuses access.
const PERMISSION_DENIED_NAMES: &[&str] = &["NotAllowedError", "PermissionDeniedError"];

/// Errors reported by the media-capture platform.
///
/// Platform failures carry a reason `name` so callers can classify them
/// without parsing messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("media capture is not supported in this environment")]
    Unsupported,
    #[error("{name}: {message}")]
    Platform { name: String, message: String },
}

impl MediaError {
    pub fn platform(name: impl Into<String>, message: impl Into<String>) -> Self {
        MediaError::Platform {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Reason name reported by the platform, if any.
    pub fn name(&self) -> Option<&str> {
        match self {
            MediaError::Unsupported => None,
            MediaError::Platform { name, .. } => Some(name),
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        self.name()
            .is_some_and(|name| PERMISSION_DENIED_NAMES.contains(&name))
    }

    /// The stream this error came from is gone and must be released.
    pub fn ends_stream(&self) -> bool {
        self.is_permission_denied()
            || matches!(self.name(), Some("InvalidStateError") | Some("NotFoundError"))
    }
}

/// Kind of device reported by enumeration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    #[default]
    VideoInput,
    AudioInput,
    AudioOutput,
}

/// Raw enumeration entry, before filtering and truncation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDeviceInfo {
    pub device_id: String,
    /// Empty until permission has been granted on most platforms
    pub label: String,
    pub kind: DeviceKind,
}

/// Resolution and frame-rate ceiling requested for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamProfile {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

impl StreamProfile {
    /// Smallest possible stream, used only to trigger the permission prompt.
    pub const PROBE: StreamProfile = StreamProfile {
        width: 1,
        height: 1,
        frame_rate: 1,
    };

    /// Upper bound for any feed stream: many small feeds on one shared hub.
    pub const CEILING: StreamProfile = StreamProfile {
        width: 320,
        height: 240,
        frame_rate: 15,
    };

    pub fn within_ceiling(&self) -> bool {
        self.width <= Self::CEILING.width
            && self.height <= Self::CEILING.height
            && self.frame_rate <= Self::CEILING.frame_rate
    }

    /// Each dimension limited to `CEILING`, and at least 1.
    pub fn clamped(self) -> Self {
        Self {
            width: self.width.clamp(1, Self::CEILING.width),
            height: self.height.clamp(1, Self::CEILING.height),
            frame_rate: self.frame_rate.clamp(1, Self::CEILING.frame_rate),
        }
    }
}

impl Default for StreamProfile {
    fn default() -> Self {
        Self::CEILING
    }
}

/// What to open: the permission probe or a specific device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    /// `None` lets the platform pick any camera (probe only)
    pub device_id: Option<String>,
    pub profile: StreamProfile,
    pub audio: bool,
}

impl StreamRequest {
    pub fn probe() -> Self {
        Self {
            device_id: None,
            profile: StreamProfile::PROBE,
            audio: false,
        }
    }

    /// Dedicated stream for one device, never above [`StreamProfile::CEILING`].
    pub fn device(device_id: impl Into<String>, profile: StreamProfile) -> Self {
        Self {
            device_id: Some(device_id.into()),
            profile: profile.clamped(),
            audio: false,
        }
    }

    pub fn is_probe(&self) -> bool {
        self.device_id.is_none()
    }
}

/// A live capture stream. Deliberately not `Clone`: exactly one owner.
#[derive(Debug, PartialEq, Eq)]
pub struct StreamHandle {
    id: u64,
    device_id: Option<String>,
    profile: StreamProfile,
}

impl StreamHandle {
    pub fn new(id: u64, device_id: Option<String>, profile: StreamProfile) -> Self {
        Self {
            id,
            device_id,
            profile,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn profile(&self) -> StreamProfile {
        self.profile
    }
}

/// One RGBA frame grabbed from a live stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA8, `width * height * 4` bytes
    pub data: Vec<u8>,
}

/// Abstraction over the host media-capture capability.
///
/// `release` is synchronous so that [`StreamLease`] can call it from `Drop`.
pub trait MediaPlatform: Send + Sync + 'static {
    /// Whether media capture exists at all on this host.
    fn is_supported(&self) -> bool;

    fn open(
        &self,
        request: StreamRequest,
    ) -> impl std::future::Future<Output = MediaResult<StreamHandle>> + Send;

    fn enumerate(
        &self,
    ) -> impl std::future::Future<Output = MediaResult<Vec<MediaDeviceInfo>>> + Send;

    fn release(&self, handle: StreamHandle);

    /// Grab the current frame of a live stream.
    fn snapshot(&self, handle: &StreamHandle) -> MediaResult<Frame>;

    /// Resolves once the platform ends stream `stream_id` on its own
    /// (permission revoked, device unplugged). The handle still has to be
    /// released afterwards.
    fn ended(&self, stream_id: u64) -> impl std::future::Future<Output = MediaError> + Send;
}

/// Scoped owner of a [`StreamHandle`].
///
/// The handle goes back to the platform either through [`StreamLease::release`]
/// or, on every other exit path (early return, task abort, cancelled future),
/// when the lease is dropped.
pub struct StreamLease<P: MediaPlatform> {
    platform: Arc<P>,
    handle: Option<StreamHandle>,
}

impl<P: MediaPlatform> StreamLease<P> {
    pub fn new(platform: Arc<P>, handle: StreamHandle) -> Self {
        Self {
            platform,
            handle: Some(handle),
        }
    }

    pub fn stream_id(&self) -> Option<u64> {
        self.handle.as_ref().map(StreamHandle::id)
    }

    pub fn snapshot(&self) -> MediaResult<Frame> {
        match &self.handle {
            Some(handle) => self.platform.snapshot(handle),
            None => Err(MediaError::platform(
                "InvalidStateError",
                "stream already released",
            )),
        }
    }

    /// Give the handle back to the platform now.
    pub fn release(mut self) {
        self.give_back();
    }

    fn give_back(&mut self) {
        if let Some(handle) = self.handle.take() {
            log::debug!("Releasing stream {}", handle.id());
            self.platform.release(handle);
        }
    }
}

impl<P: MediaPlatform> Drop for StreamLease<P> {
    fn drop(&mut self) {
        self.give_back();
    }
}

impl<P: MediaPlatform> std::fmt::Debug for StreamLease<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamLease")
            .field("handle", &self.handle)
            .finish()
    }
}
