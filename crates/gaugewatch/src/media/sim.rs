//! In-process media platform with scripted devices.
//!
//! Backs the `gaugewatch` binary (the dashboard's process is simulated too)
//! and every test. It keeps enough bookkeeping to check the resource
//! invariants from the outside: live handles, acquisition attempts and the
//! peak number of concurrent acquisitions per device.

use super::{
    DeviceKind, Frame, MediaDeviceInfo, MediaError, MediaPlatform, MediaResult, StreamHandle,
    StreamRequest,
};
use crate::config::SimulationConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

/// A scripted device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedDevice {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub kind: DeviceKind,
    /// Error name every acquisition of this device fails with, e.g. `NotReadableError`
    #[serde(default)]
    pub fail_with: Option<String>,
}

impl SimulatedDevice {
    pub fn camera(id: &str, label: &str) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            kind: DeviceKind::VideoInput,
            fail_with: None,
        }
    }

    pub fn microphone(id: &str, label: &str) -> Self {
        Self {
            kind: DeviceKind::AudioInput,
            ..Self::camera(id, label)
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    next_id: u64,
    /// handle id -> device id (`None` for probes)
    live: HashMap<u64, Option<String>>,
    /// Live handles the platform has ended, still waiting for release
    ended: HashMap<u64, MediaError>,
    requests: Vec<StreamRequest>,
    releases: usize,
    attempts: HashMap<String, usize>,
    in_flight: HashMap<String, usize>,
    max_in_flight: HashMap<String, usize>,
}

/// Simulated media-capture platform.
#[derive(Debug)]
pub struct SimulatedMedia {
    devices: Vec<SimulatedDevice>,
    supported: bool,
    deny_permission: bool,
    enumerate_failure: Option<MediaError>,
    acquire_latency: Duration,
    state: Mutex<SimState>,
    ended_notify: Notify,
}

impl SimulatedMedia {
    pub fn new(devices: Vec<SimulatedDevice>) -> Self {
        Self {
            devices,
            supported: true,
            deny_permission: false,
            enumerate_failure: None,
            acquire_latency: Duration::ZERO,
            state: Mutex::new(SimState::default()),
            ended_notify: Notify::new(),
        }
    }

    pub fn from_config(config: &SimulationConfig) -> Self {
        let mut media = Self::new(config.devices.clone())
            .with_acquire_latency(Duration::from_millis(config.acquire_latency_ms));
        media.supported = !config.unsupported;
        media.deny_permission = config.deny_permission;
        media
    }

    /// Every device acquisition takes this long before it settles.
    pub fn with_acquire_latency(mut self, latency: Duration) -> Self {
        self.acquire_latency = latency;
        self
    }

    /// Every open (probe included) is refused with `NotAllowedError`.
    pub fn denying_permission(mut self) -> Self {
        self.deny_permission = true;
        self
    }

    pub fn unsupported(mut self) -> Self {
        self.supported = false;
        self
    }

    pub fn with_enumerate_failure(mut self, error: MediaError) -> Self {
        self.enumerate_failure = Some(error);
        self
    }

    /// Make acquisitions of `device_id` fail with the given error name.
    pub fn failing(mut self, device_id: &str, error_name: &str) -> Self {
        if let Some(device) = self.devices.iter_mut().find(|d| d.id == device_id) {
            device.fail_with = Some(error_name.to_string());
        }
        self
    }

    /// End every live stream of `device_id` as if access had been revoked.
    /// Returns how many streams were ended.
    pub fn revoke(&self, device_id: &str) -> usize {
        let revoked = {
            let mut state = self.state();
            let ids: Vec<u64> = state
                .live
                .iter()
                .filter(|(id, d)| {
                    d.as_deref() == Some(device_id) && !state.ended.contains_key(*id)
                })
                .map(|(id, _)| *id)
                .collect();
            for id in &ids {
                state.ended.insert(
                    *id,
                    MediaError::platform("NotAllowedError", "Permission revoked"),
                );
            }
            ids.len()
        };
        if revoked > 0 {
            log::info!("Revoked {} stream(s) of {}", revoked, device_id);
            self.ended_notify.notify_waiters();
        }
        revoked
    }

    pub fn live_handles(&self) -> usize {
        self.state().live.len()
    }

    pub fn live_handles_for(&self, device_id: &str) -> usize {
        self.state()
            .live
            .values()
            .filter(|d| d.as_deref() == Some(device_id))
            .count()
    }

    pub fn probe_count(&self) -> usize {
        self.state().requests.iter().filter(|r| r.is_probe()).count()
    }

    pub fn release_count(&self) -> usize {
        self.state().releases
    }

    /// Acquisition attempts that reached the platform for `device_id`.
    pub fn attempts(&self, device_id: &str) -> usize {
        self.state().attempts.get(device_id).copied().unwrap_or(0)
    }

    /// Peak number of simultaneous in-flight acquisitions for `device_id`.
    pub fn max_in_flight(&self, device_id: &str) -> usize {
        self.state().max_in_flight.get(device_id).copied().unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<StreamRequest> {
        self.state().requests.clone()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, request: &StreamRequest) -> StreamHandle {
        let mut state = self.state();
        state.next_id += 1;
        let id = state.next_id;
        state.live.insert(id, request.device_id.clone());
        StreamHandle::new(id, request.device_id.clone(), request.profile.clamped())
    }

    fn begin_acquisition(&self, device_id: &str) -> InFlight<'_> {
        let mut state = self.state();
        *state.attempts.entry(device_id.to_string()).or_default() += 1;
        let current = {
            let count = state.in_flight.entry(device_id.to_string()).or_default();
            *count += 1;
            *count
        };
        let peak = state.max_in_flight.entry(device_id.to_string()).or_default();
        *peak = (*peak).max(current);
        InFlight {
            media: self,
            device_id: device_id.to_string(),
        }
    }

    async fn open_device(&self, request: &StreamRequest, device_id: &str) -> MediaResult<StreamHandle> {
        let _in_flight = self.begin_acquisition(device_id);
        if !self.acquire_latency.is_zero() {
            tokio::time::sleep(self.acquire_latency).await;
        }

        if self.deny_permission {
            return Err(MediaError::platform("NotAllowedError", "Permission denied"));
        }
        let device = self
            .devices
            .iter()
            .find(|d| d.id == device_id && d.kind == DeviceKind::VideoInput)
            .ok_or_else(|| MediaError::platform("NotFoundError", "Requested device not found"))?;
        if let Some(name) = &device.fail_with {
            return Err(MediaError::platform(
                name.clone(),
                "Could not start video source",
            ));
        }
        Ok(self.register(request))
    }
}

impl MediaPlatform for SimulatedMedia {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn open(&self, request: StreamRequest) -> MediaResult<StreamHandle> {
        if !self.supported {
            return Err(MediaError::Unsupported);
        }
        self.state().requests.push(request.clone());

        match request.device_id.clone() {
            Some(device_id) => self.open_device(&request, &device_id).await,
            None if self.deny_permission => {
                Err(MediaError::platform("NotAllowedError", "Permission denied"))
            }
            None if !self.devices.iter().any(|d| d.kind == DeviceKind::VideoInput) => Err(
                MediaError::platform("NotFoundError", "Requested device not found"),
            ),
            None => Ok(self.register(&request)),
        }
    }

    async fn enumerate(&self) -> MediaResult<Vec<MediaDeviceInfo>> {
        if !self.supported {
            return Err(MediaError::Unsupported);
        }
        if let Some(error) = &self.enumerate_failure {
            return Err(error.clone());
        }
        Ok(self
            .devices
            .iter()
            .map(|d| MediaDeviceInfo {
                device_id: d.id.clone(),
                label: d.label.clone(),
                kind: d.kind,
            })
            .collect())
    }

    fn release(&self, handle: StreamHandle) {
        let mut state = self.state();
        if state.live.remove(&handle.id()).is_some() {
            state.ended.remove(&handle.id());
            state.releases += 1;
        } else {
            log::warn!("Release of unknown stream {}", handle.id());
        }
    }

    fn snapshot(&self, handle: &StreamHandle) -> MediaResult<Frame> {
        {
            let state = self.state();
            if !state.live.contains_key(&handle.id()) {
                return Err(MediaError::platform(
                    "InvalidStateError",
                    "stream is not live",
                ));
            }
            if let Some(error) = state.ended.get(&handle.id()) {
                return Err(error.clone());
            }
        }
        Ok(synthetic_frame(handle))
    }

    async fn ended(&self, stream_id: u64) -> MediaError {
        loop {
            // Registered before the check so a revoke in between is not missed
            let notified = self.ended_notify.notified();
            {
                let state = self.state();
                if let Some(error) = state.ended.get(&stream_id) {
                    return error.clone();
                }
                if !state.live.contains_key(&stream_id) {
                    return MediaError::platform("InvalidStateError", "stream is not live");
                }
            }
            notified.await;
        }
    }
}

/// Decrements the in-flight counter even when the acquisition future is dropped.
struct InFlight<'a> {
    media: &'a SimulatedMedia,
    device_id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(count) = self.media.state().in_flight.get_mut(&self.device_id) {
            *count = count.saturating_sub(1);
        }
    }
}

/// Diagonal gradient tinted per device, so exports are distinguishable.
fn synthetic_frame(handle: &StreamHandle) -> Frame {
    let profile = handle.profile();
    let width = profile.width.max(1);
    let height = profile.height.max(1);
    let tint = handle
        .device_id()
        .map(|id| id.bytes().fold(0u8, |acc, b| acc.wrapping_add(b)))
        .unwrap_or(0);

    let pixels = (width as usize).saturating_mul(height as usize);
    let mut data = Vec::with_capacity(pixels.saturating_mul(4));
    for y in 0..height {
        for x in 0..width {
            data.push((u64::from(x) * 255 / u64::from(width)) as u8);
            data.push((u64::from(y) * 255 / u64::from(height)) as u8);
            data.push(tint);
            data.push(0xff);
        }
    }
    Frame {
        width,
        height,
        data,
    }
}
