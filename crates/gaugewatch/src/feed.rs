//! Per-feed lifecycle controller.
//!
//! Every bound slot gets one actor task that exclusively owns the feed's
//! stream lease. The outside world talks to it through [`FeedController`]:
//! commands go in over an unbounded channel, state comes out over a `watch`
//! channel. Within one feed everything is sequential, so a new acquisition
//! never starts while the previous one is still settling.

use crate::capture::{encode_base64_png, encode_png, export_name};
use crate::enumerate::DeviceDescriptor;
use crate::error::FeedError;
use crate::export::ExportSink;
use crate::media::{MediaError, MediaPlatform, MediaResult, StreamLease, StreamProfile, StreamRequest};
use crate::recognition::{RecognitionRequest, Recognizer};
use crate::stagger::ReadinessSet;
use futures::future::{BoxFuture, OptionFuture};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lifecycle of one feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Bound, waiting for admission or for the first acquisition to settle
    Initializing,
    /// Holding a live stream
    Active,
    /// Switched off by the operator
    Off,
    /// Acquisition failed; only an explicit power-on retries
    ErrorStopped,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Initializing => "initializing",
            Lifecycle::Active => "active",
            Lifecycle::Off => "off",
            Lifecycle::ErrorStopped => "error",
        }
    }
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state of one feed, published after every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedState {
    pub lifecycle: Lifecycle,
    /// The controller currently owns a live stream
    pub holds_stream: bool,
    /// An acquisition is in flight
    pub acquiring: bool,
    /// What the operator last asked for
    pub desired_on: bool,
    /// The device has passed the stagger gate
    pub admitted: bool,
    /// A recognition request is in flight
    pub busy: bool,
    pub last_error: Option<String>,
    pub last_captured_text: Option<String>,
}

impl FeedState {
    fn initial() -> Self {
        Self {
            lifecycle: Lifecycle::Initializing,
            holds_stream: false,
            acquiring: false,
            desired_on: true,
            admitted: false,
            busy: false,
            last_error: None,
            last_captured_text: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle == Lifecycle::Active
    }

    /// Short overlay text for the feed tile.
    pub fn status_line(&self) -> String {
        match self.lifecycle {
            Lifecycle::Initializing if !self.admitted => "Waiting for USB bandwidth...".to_string(),
            Lifecycle::Initializing => "Initializing...".to_string(),
            Lifecycle::Active if self.busy => "Analyzing...".to_string(),
            Lifecycle::Active => match (&self.last_error, &self.last_captured_text) {
                (Some(error), _) => error.clone(),
                (None, Some(text)) => format!("Reading: {}", text),
                (None, None) => "Live".to_string(),
            },
            Lifecycle::Off if self.acquiring => "Camera Off (settling)".to_string(),
            Lifecycle::Off => "Camera Off".to_string(),
            Lifecycle::ErrorStopped => self
                .last_error
                .clone()
                .unwrap_or_else(|| "Camera failed to start".to_string()),
        }
    }
}

/// Collaborators shared by every feed of one grid.
pub struct FeedContext<P: MediaPlatform> {
    pub platform: Arc<P>,
    pub recognizer: Arc<dyn Recognizer>,
    pub sink: Arc<dyn ExportSink>,
    /// Ceiling requested for every device stream
    pub profile: StreamProfile,
}

impl<P: MediaPlatform> Clone for FeedContext<P> {
    fn clone(&self) -> Self {
        Self {
            platform: Arc::clone(&self.platform),
            recognizer: Arc::clone(&self.recognizer),
            sink: Arc::clone(&self.sink),
            profile: self.profile,
        }
    }
}

enum Command {
    SetPower(bool),
    Toggle,
    Inspect,
    Export(oneshot::Sender<Result<String, FeedError>>),
}

/// Handle to a running feed actor.
///
/// Dropping the handle cancels the actor, which releases its stream.
#[derive(Debug)]
pub struct FeedController {
    device: DeviceDescriptor,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<FeedState>,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl FeedController {
    /// Spawn the actor for `device`. It stays `Initializing` until the
    /// device shows up in `readiness`.
    pub fn spawn<P: MediaPlatform>(
        device: DeviceDescriptor,
        ctx: FeedContext<P>,
        readiness: watch::Receiver<ReadinessSet>,
        token: CancellationToken,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(FeedState::initial());

        let actor = FeedActor {
            name: device.label.clone(),
            device: device.clone(),
            ctx,
            state: state_tx,
            lease: None,
            acquiring: None,
            inspecting: None,
            lifecycle: Lifecycle::Initializing,
            desired_on: true,
            admitted: false,
            last_error: None,
            last_captured_text: None,
        };
        let task = tokio::spawn(actor.run(command_rx, readiness, token.clone()));

        Self {
            device,
            commands,
            state,
            token,
            task: Some(task),
        }
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    /// Latest published state.
    pub fn state(&self) -> FeedState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedState> {
        self.state.clone()
    }

    /// Wait until the published state satisfies `predicate`.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&FeedState) -> bool,
    ) -> Result<FeedState, FeedError> {
        let mut rx = self.state.clone();
        let state = rx
            .wait_for(predicate)
            .await
            .map_err(|_| FeedError::ControllerGone)?;
        Ok(state.clone())
    }

    /// Set the desired power state. Idempotent.
    pub fn set_power(&self, on: bool) -> Result<(), FeedError> {
        self.send(Command::SetPower(on))
    }

    pub fn toggle(&self) -> Result<(), FeedError> {
        self.send(Command::Toggle)
    }

    /// Submit the current frame for recognition. The outcome lands in the state.
    pub fn inspect(&self) -> Result<(), FeedError> {
        self.send(Command::Inspect)
    }

    /// Offer the current frame to the export sink. Returns the artifact name.
    pub async fn export(&self) -> Result<String, FeedError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Export(reply))?;
        response.await.map_err(|_| FeedError::ControllerGone)?
    }

    /// Cancel the actor and wait until it has released everything.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::error!("[feed {}] task error: {}", self.device.label, e);
            }
        }
    }

    fn send(&self, command: Command) -> Result<(), FeedError> {
        self.commands
            .send(command)
            .map_err(|_| FeedError::ControllerGone)
    }
}

impl Drop for FeedController {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

// ── Actor ───────────────────────────────────────────────────────────

type Acquisition<P> = BoxFuture<'static, MediaResult<StreamLease<P>>>;
type Inspection = BoxFuture<'static, Result<String, FeedError>>;

enum Event<P: MediaPlatform> {
    Acquired(MediaResult<StreamLease<P>>),
    StreamEnded(MediaError),
    Command(Command),
    Readiness { open: bool },
    Inspected(Result<String, FeedError>),
}

struct FeedActor<P: MediaPlatform> {
    name: String,
    device: DeviceDescriptor,
    ctx: FeedContext<P>,
    state: watch::Sender<FeedState>,
    lease: Option<StreamLease<P>>,
    acquiring: Option<Acquisition<P>>,
    inspecting: Option<Inspection>,
    lifecycle: Lifecycle,
    desired_on: bool,
    admitted: bool,
    last_error: Option<String>,
    last_captured_text: Option<String>,
}

impl<P: MediaPlatform> FeedActor<P> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut readiness: watch::Receiver<ReadinessSet>,
        token: CancellationToken,
    ) {
        let mut readiness_open = true;
        self.admitted = readiness.borrow_and_update().contains(&self.device.id);
        self.reconcile();
        self.publish();

        loop {
            let event = tokio::select! {
                biased;

                _ = token.cancelled() => break,

                Some(result) = OptionFuture::from(self.acquiring.as_mut()) => Event::Acquired(result),

                Some(error) = OptionFuture::from(
                    self.lease
                        .as_ref()
                        .and_then(StreamLease::stream_id)
                        .map(|id| self.ctx.platform.ended(id)),
                ) => Event::StreamEnded(error),

                command = commands.recv() => match command {
                    Some(command) => Event::Command(command),
                    None => break,
                },

                changed = readiness.changed(), if readiness_open && !self.admitted => {
                    Event::Readiness { open: changed.is_ok() }
                }

                Some(result) = OptionFuture::from(self.inspecting.as_mut()) => Event::Inspected(result),
            };

            match event {
                Event::Acquired(result) => {
                    self.acquiring = None;
                    self.settle_acquisition(result);
                }
                Event::StreamEnded(error) => self.stream_lost(&error),
                Event::Command(command) => self.handle_command(command),
                Event::Readiness { open: true } => {
                    self.admitted = readiness.borrow_and_update().contains(&self.device.id);
                    if self.admitted {
                        log::debug!("[feed {}] admitted", self.name);
                    }
                }
                Event::Readiness { open: false } => readiness_open = false,
                Event::Inspected(result) => {
                    self.inspecting = None;
                    self.settle_inspection(result);
                }
            }

            self.reconcile();
            self.publish();
        }

        self.teardown();
    }

    /// Start or stop acquisition so the held resource matches the desired state.
    fn reconcile(&mut self) {
        if self.acquiring.is_some() || !self.admitted {
            return;
        }
        match (self.desired_on, self.lease.is_some()) {
            (true, false) => self.begin_acquisition(),
            (false, true) => {
                self.release_stream();
                self.lifecycle = Lifecycle::Off;
            }
            _ => {}
        }
    }

    fn begin_acquisition(&mut self) {
        let platform = Arc::clone(&self.ctx.platform);
        let request = StreamRequest::device(self.device.id.clone(), self.ctx.profile);
        log::info!(
            "[feed {}] acquiring {}x{}@{}",
            self.name,
            request.profile.width,
            request.profile.height,
            request.profile.frame_rate
        );

        self.acquiring = Some(Box::pin(async move {
            let handle = platform.open(request).await?;
            Ok(StreamLease::new(platform, handle))
        }));
    }

    fn settle_acquisition(&mut self, result: MediaResult<StreamLease<P>>) {
        match result {
            Ok(lease) if self.desired_on => {
                log::info!("[feed {}] stream {:?} live", self.name, lease.stream_id());
                self.lease = Some(lease);
                self.lifecycle = Lifecycle::Active;
                self.last_error = None;
            }
            Ok(lease) => {
                log::debug!("[feed {}] switched off while acquiring, releasing", self.name);
                lease.release();
                self.lifecycle = Lifecycle::Off;
            }
            Err(e) if self.desired_on => {
                log::error!("[feed {}] failed to start: {}", self.name, e);
                self.desired_on = false;
                self.lifecycle = Lifecycle::ErrorStopped;
                self.last_error = Some(FeedError::StreamAcquisitionFailed(describe(&e)).to_string());
            }
            Err(e) => {
                log::debug!("[feed {}] acquisition failed after power-off: {}", self.name, e);
                self.lifecycle = Lifecycle::Off;
            }
        }
    }

    /// The platform ended the live stream; only an explicit power-on retries.
    fn stream_lost(&mut self, error: &MediaError) {
        log::error!("[feed {}] stream ended: {}", self.name, error);
        self.inspecting = None;
        self.release_stream();
        self.desired_on = false;
        self.lifecycle = Lifecycle::ErrorStopped;
        self.last_captured_text = None;
        self.last_error = Some(FeedError::StreamAcquisitionFailed(describe(error)).to_string());
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::SetPower(on) => self.set_power(on),
            Command::Toggle => self.set_power(!self.desired_on),
            Command::Inspect => self.start_inspection(),
            Command::Export(reply) => {
                let result = self.export();
                if let Err(e) = &result {
                    log::warn!("[feed {}] export failed: {}", self.name, e);
                }
                let _ = reply.send(result);
            }
        }
    }

    fn set_power(&mut self, on: bool) {
        if !self.admitted {
            log::debug!("[feed {}] not admitted yet, ignoring power change", self.name);
            return;
        }
        if on == self.desired_on {
            return;
        }

        log::info!("[feed {}] power {}", self.name, if on { "on" } else { "off" });
        self.desired_on = on;
        // A retry keeps showing the failure until it settles
        if !on || self.lifecycle != Lifecycle::ErrorStopped {
            self.last_error = None;
        }
        self.last_captured_text = None;
        if !on {
            // Whatever the in-flight request returns must not be shown
            self.inspecting = None;
            self.release_stream();
            self.lifecycle = Lifecycle::Off;
        }
    }

    fn active_lease(&self) -> Option<&StreamLease<P>> {
        self.lease
            .as_ref()
            .filter(|_| self.lifecycle == Lifecycle::Active)
    }

    fn start_inspection(&mut self) {
        if self.inspecting.is_some() {
            log::debug!("[feed {}] inspection already in flight", self.name);
            return;
        }
        let frame = match self.active_lease().map(StreamLease::snapshot) {
            None => {
                if self.lifecycle != Lifecycle::ErrorStopped {
                    self.last_error = Some(FeedError::NotActive.to_string());
                }
                return;
            }
            Some(Err(e)) if e.ends_stream() => {
                self.stream_lost(&e);
                return;
            }
            Some(Err(e)) => {
                self.last_error = Some(FeedError::RecognitionRequestFailed(e.to_string()).to_string());
                self.last_captured_text = None;
                return;
            }
            Some(Ok(frame)) => frame,
        };

        log::info!("[feed {}] submitting frame for recognition", self.name);
        self.last_error = None;
        self.last_captured_text = None;

        let recognizer = Arc::clone(&self.ctx.recognizer);
        self.inspecting = Some(Box::pin(async move {
            let image = encode_base64_png(&frame)?;
            let response = recognizer
                .recognize(RecognitionRequest::gauge_reading(image))
                .await
                .map_err(|e| FeedError::RecognitionRequestFailed(e.to_string()))?;
            Ok(response.text.trim().to_string())
        }));
    }

    fn settle_inspection(&mut self, result: Result<String, FeedError>) {
        match result {
            Ok(text) => {
                log::info!("[feed {}] reading: {}", self.name, text);
                self.last_error = None;
                self.last_captured_text = Some(text);
            }
            Err(e) => {
                log::error!("[feed {}] {}", self.name, e);
                self.last_error = Some(e.to_string());
                self.last_captured_text = None;
            }
        }
    }

    fn export(&mut self) -> Result<String, FeedError> {
        let frame = match self.active_lease().ok_or(FeedError::NotActive)?.snapshot() {
            Ok(frame) => frame,
            Err(e) => {
                if e.ends_stream() {
                    self.stream_lost(&e);
                }
                return Err(FeedError::Encode(format!("snapshot failed: {}", e)));
            }
        };
        let png = encode_png(&frame)?;
        let name = export_name(&self.device.label);
        self.ctx.sink.offer(&name, png);
        Ok(name)
    }

    fn release_stream(&mut self) {
        if let Some(lease) = self.lease.take() {
            log::debug!("[feed {}] releasing stream {:?}", self.name, lease.stream_id());
            lease.release();
        }
    }

    fn teardown(&mut self) {
        // A pending acquisition that already produced a lease releases it on drop
        self.acquiring = None;
        self.inspecting = None;
        self.release_stream();
        if self.lifecycle == Lifecycle::Active {
            self.lifecycle = Lifecycle::Off;
        }
        self.publish();
        log::debug!("[feed {}] stopped", self.name);
    }

    fn publish(&self) {
        let next = FeedState {
            lifecycle: self.lifecycle,
            holds_stream: self.lease.is_some(),
            acquiring: self.acquiring.is_some(),
            desired_on: self.desired_on,
            admitted: self.admitted,
            busy: self.inspecting.is_some(),
            last_error: self.last_error.clone(),
            last_captured_text: self.last_captured_text.clone(),
        };

        let previous = self.state.borrow().lifecycle;
        if previous != next.lifecycle {
            log::info!("[feed {}] {} -> {}", self.name, previous, next.lifecycle);
        }
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

/// Operator-facing reason for a failed device acquisition.
fn describe(error: &MediaError) -> String {
    match error.name() {
        Some("NotReadableError") | Some("AbortError") | Some("TrackStartError") => {
            "possible hardware issue or insufficient USB bandwidth".to_string()
        }
        Some("OverconstrainedError") => "the requested resolution is not supported".to_string(),
        Some("NotFoundError") => "the device is no longer connected".to_string(),
        Some("InvalidStateError") => "the stream ended unexpectedly".to_string(),
        _ if error.is_permission_denied() => "camera permission was revoked".to_string(),
        _ => error.to_string(),
    }
}
