//! The camera grid: enumeration, slots, scheduler and feed controllers.

use crate::config::GridConfig;
use crate::enumerate::{discover, DeviceDescriptor};
use crate::error::EnumerationError;
use crate::feed::{FeedContext, FeedController, FeedState};
use crate::media::MediaPlatform;
use crate::stagger::{ReadinessSet, StaggerScheduler};
use std::collections::HashMap;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// One display position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedSlot {
    /// No device for this position; never becomes live without re-enumeration
    Empty,
    Bound(DeviceDescriptor),
}

/// Outcome of the last enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridStatus {
    Ready,
    Failed(EnumerationError),
}

/// What one grid position shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotView {
    Live {
        index: usize,
        device: DeviceDescriptor,
        state: FeedState,
    },
    Placeholder {
        index: usize,
    },
}

impl SlotView {
    pub fn index(&self) -> usize {
        match self {
            SlotView::Live { index, .. } | SlotView::Placeholder { index } => *index,
        }
    }

    pub fn title(&self) -> String {
        match self {
            SlotView::Live { device, .. } => device.label.clone(),
            SlotView::Placeholder { index } => format!("Camera {}", index + 1),
        }
    }

    pub fn status_line(&self) -> String {
        match self {
            SlotView::Live { state, .. } => state.status_line(),
            SlotView::Placeholder { .. } => "Offline".to_string(),
        }
    }
}

/// Owns everything derived from one device list.
///
/// Controllers are keyed by device id, never by position. Tearing the grid
/// down (refresh, shutdown or drop) stops the scheduler first and then every
/// controller, so no admission can race a controller that is going away.
pub struct FeedGrid<P: MediaPlatform> {
    ctx: FeedContext<P>,
    config: GridConfig,
    status: GridStatus,
    slots: Vec<FeedSlot>,
    controllers: HashMap<String, FeedController>,
    readiness: watch::Receiver<ReadinessSet>,
    scheduler: Option<StaggerScheduler>,
    root: CancellationToken,
    generation: CancellationToken,
}

impl<P: MediaPlatform> FeedGrid<P> {
    /// Enumerate devices and, on success, bring up one controller per device.
    pub async fn start(ctx: FeedContext<P>, config: GridConfig) -> Self {
        let root = CancellationToken::new();
        let generation = root.child_token();
        let (_, readiness) = watch::channel(ReadinessSet::default());

        let mut grid = Self {
            ctx,
            config,
            status: GridStatus::Ready,
            slots: Vec::new(),
            controllers: HashMap::new(),
            readiness,
            scheduler: None,
            root,
            generation,
        };
        grid.populate().await;
        grid
    }

    pub fn status(&self) -> &GridStatus {
        &self.status
    }

    /// All positions, bound first in discovery order. Empty after a failed enumeration.
    pub fn slots(&self) -> &[FeedSlot] {
        &self.slots
    }

    pub fn bound_count(&self) -> usize {
        self.controllers.len()
    }

    pub fn devices(&self) -> Vec<&DeviceDescriptor> {
        self.slots
            .iter()
            .filter_map(|slot| match slot {
                FeedSlot::Bound(device) => Some(device),
                FeedSlot::Empty => None,
            })
            .collect()
    }

    pub fn controller(&self, device_id: &str) -> Option<&FeedController> {
        self.controllers.get(device_id)
    }

    /// Controller shown at display position `index` (0-based).
    pub fn controller_at(&self, index: usize) -> Option<&FeedController> {
        match self.slots.get(index)? {
            FeedSlot::Bound(device) => self.controllers.get(&device.id),
            FeedSlot::Empty => None,
        }
    }

    /// Devices admitted so far for the current device list.
    pub fn readiness(&self) -> ReadinessSet {
        self.readiness.borrow().clone()
    }

    /// Drop a device's pending admission; it then stays `Initializing`.
    pub fn cancel_admission(&self, device_id: &str) -> bool {
        self.scheduler
            .as_ref()
            .is_some_and(|scheduler| scheduler.cancel(device_id))
    }

    pub fn views(&self) -> Vec<SlotView> {
        self.slots
            .iter()
            .enumerate()
            .map(|(index, slot)| match slot {
                FeedSlot::Bound(device) => match self.controllers.get(&device.id) {
                    Some(controller) => SlotView::Live {
                        index,
                        device: device.clone(),
                        state: controller.state(),
                    },
                    None => SlotView::Placeholder { index },
                },
                FeedSlot::Empty => SlotView::Placeholder { index },
            })
            .collect()
    }

    /// Tear everything down and enumerate again.
    pub async fn refresh(&mut self) {
        log::info!("[grid] refreshing device list");
        self.teardown().await;
        self.populate().await;
    }

    /// Tear everything down, waiting until every stream is released.
    pub async fn shutdown(mut self) {
        self.teardown().await;
        self.root.cancel();
        log::info!("[grid] stopped");
    }

    async fn populate(&mut self) {
        let devices = match discover(&self.ctx.platform, self.config.max_feeds).await {
            Ok(devices) => devices,
            Err(e) => {
                log::error!("[grid] {}", e);
                self.status = GridStatus::Failed(e);
                return;
            }
        };

        let generation = self.root.child_token();
        let (readiness_tx, readiness_rx) = watch::channel(ReadinessSet::default());

        let mut slots = Vec::with_capacity(self.config.max_feeds);
        for device in &devices {
            let controller = FeedController::spawn(
                device.clone(),
                self.ctx.clone(),
                readiness_rx.clone(),
                generation.child_token(),
            );
            self.controllers.insert(device.id.clone(), controller);
            slots.push(FeedSlot::Bound(device.clone()));
        }
        slots.resize(self.config.max_feeds.max(devices.len()), FeedSlot::Empty);

        let ids = devices.into_iter().map(|d| d.id).collect();
        self.scheduler = Some(StaggerScheduler::start(
            ids,
            self.config.stagger_delay(),
            readiness_tx,
            &generation,
        ));

        log::info!(
            "[grid] {} feed(s) bound, {} placeholder(s)",
            self.controllers.len(),
            slots.len() - self.controllers.len()
        );
        self.slots = slots;
        self.readiness = readiness_rx;
        self.generation = generation;
        self.status = GridStatus::Ready;
    }

    async fn teardown(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.shutdown().await;
        }
        self.generation.cancel();

        let controllers: Vec<FeedController> =
            self.controllers.drain().map(|(_, c)| c).collect();
        if !controllers.is_empty() {
            log::info!("[grid] stopping {} feed(s)", controllers.len());
        }
        futures::future::join_all(controllers.into_iter().map(FeedController::shutdown)).await;
        self.slots.clear();
        self.readiness = watch::channel(ReadinessSet::default()).1;
    }
}

impl<P: MediaPlatform> Drop for FeedGrid<P> {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
