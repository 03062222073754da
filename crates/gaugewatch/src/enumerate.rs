//! Two-phase device discovery.
//!
//! Opening a full-resolution stream just to get past the permission prompt
//! can saturate a shared USB hub before the remaining cameras are even
//! listed, so discovery opens a 1x1 probe, enumerates while holding it, and
//! always gives the probe back before returning.

use crate::error::EnumerationError;
use crate::media::{DeviceKind, MediaDeviceInfo, MediaError, MediaPlatform, StreamLease, StreamRequest};
use std::collections::HashSet;
use std::sync::Arc;

/// A discovered camera. Identity is `id`; discovery order is display order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceDescriptor {
    pub id: String,
    pub label: String,
}

pub type EnumerationResult = Result<Vec<DeviceDescriptor>, EnumerationError>;

/// Run the permission/enumeration handshake once.
///
/// Exactly one probe stream is opened and it is released on every path.
/// Errors are terminal for this call; callers retry by calling again.
pub async fn discover<P: MediaPlatform>(platform: &Arc<P>, max_feeds: usize) -> EnumerationResult {
    if !platform.is_supported() {
        log::warn!("[enumerate] media capture unavailable");
        return Err(EnumerationError::UnsupportedEnvironment);
    }

    let probe = platform
        .open(StreamRequest::probe())
        .await
        .map_err(classify)?;
    let probe = StreamLease::new(Arc::clone(platform), probe);

    let listed = platform.enumerate().await;
    probe.release();

    let descriptors = select_video_inputs(listed.map_err(classify)?, max_feeds);
    if descriptors.is_empty() {
        log::warn!("[enumerate] no video inputs found");
        return Err(EnumerationError::NoDevicesFound);
    }

    log::info!(
        "[enumerate] found {} camera(s): {}",
        descriptors.len(),
        descriptors
            .iter()
            .map(|d| d.label.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(descriptors)
}

/// Keep video inputs only, drop repeated ids, truncate to `max_feeds`.
///
/// Devices without a label are named `Camera N` after their 1-based position.
pub fn select_video_inputs(devices: Vec<MediaDeviceInfo>, max_feeds: usize) -> Vec<DeviceDescriptor> {
    let mut seen = HashSet::new();
    devices
        .into_iter()
        .filter(|d| d.kind == DeviceKind::VideoInput)
        .filter(|d| seen.insert(d.device_id.clone()))
        .take(max_feeds)
        .enumerate()
        .map(|(index, d)| DeviceDescriptor {
            label: if d.label.trim().is_empty() {
                format!("Camera {}", index + 1)
            } else {
                d.label
            },
            id: d.device_id,
        })
        .collect()
}

fn classify(err: MediaError) -> EnumerationError {
    log::error!("[enumerate] error accessing media devices: {}", err);
    match err {
        MediaError::Unsupported => EnumerationError::UnsupportedEnvironment,
        e if e.is_permission_denied() => EnumerationError::PermissionDenied,
        // The probe itself finds nothing to open when no camera is attached
        e if e.name() == Some("NotFoundError") => EnumerationError::NoDevicesFound,
        e => EnumerationError::AcquisitionFailed(e.to_string()),
    }
}
