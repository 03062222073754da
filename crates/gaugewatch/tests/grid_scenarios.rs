//! End-to-end grid scenarios against the simulated media platform.

use async_trait::async_trait;
use gaugewatch::{
    EnumerationError, ExportSink, FeedContext, FeedGrid, FeedState, GridConfig, GridStatus,
    Lifecycle, RecognitionError, RecognitionRequest, RecognitionResponse, Recognizer,
    SimulatedDevice, SimulatedMedia, SlotView, StreamProfile,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

struct FixedReading {
    text: &'static str,
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
}

impl FixedReading {
    fn new(text: &'static str) -> Self {
        Self {
            text,
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn gated(text: &'static str, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(text)
        }
    }
}

#[async_trait]
impl Recognizer for FixedReading {
    async fn recognize(
        &self,
        _request: RecognitionRequest,
    ) -> Result<RecognitionResponse, RecognitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(RecognitionResponse {
            text: self.text.to_string(),
        })
    }
}

struct NullSink;

impl ExportSink for NullSink {
    fn offer(&self, _name: &str, _bytes: Vec<u8>) {}
}

fn cameras(n: usize) -> SimulatedMedia {
    SimulatedMedia::new(
        (0..n)
            .map(|i| SimulatedDevice::camera(&format!("usb-{i}"), &format!("Gauge {}", i + 1)))
            .collect(),
    )
}

fn context(platform: &Arc<SimulatedMedia>, recognizer: Arc<dyn Recognizer>) -> FeedContext<SimulatedMedia> {
    FeedContext {
        platform: Arc::clone(platform),
        recognizer,
        sink: Arc::new(NullSink),
        profile: StreamProfile::default(),
    }
}

async fn start(platform: &Arc<SimulatedMedia>) -> FeedGrid<SimulatedMedia> {
    FeedGrid::start(
        context(platform, Arc::new(FixedReading::new("N/A"))),
        GridConfig::default(),
    )
    .await
}

async fn wait_active(grid: &FeedGrid<SimulatedMedia>, id: &str) -> FeedState {
    grid.controller(id)
        .unwrap()
        .wait_for(FeedState::is_active)
        .await
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn three_devices_fill_three_of_ten_slots_one_second_apart() {
    let platform = Arc::new(cameras(3));
    let grid = start(&platform).await;

    assert_eq!(grid.status(), &GridStatus::Ready);
    let views = grid.views();
    assert_eq!(views.len(), 10);
    let live = views
        .iter()
        .filter(|v| matches!(v, SlotView::Live { .. }))
        .count();
    assert_eq!(live, 3);
    assert!(views[3..]
        .iter()
        .all(|v| matches!(v, SlotView::Placeholder { .. })));

    for id in ["usb-0", "usb-1", "usb-2"] {
        wait_active(&grid, id).await;
    }
    let offsets: Vec<u128> = grid
        .readiness()
        .admissions()
        .iter()
        .map(|a| a.offset.as_millis())
        .collect();
    assert_eq!(offsets, vec![0, 1000, 2000]);
    assert_eq!(platform.live_handles(), 3);

    // Placeholders stay placeholders
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(grid.bound_count(), 3);
    assert!(grid.views()[3..]
        .iter()
        .all(|v| matches!(v, SlotView::Placeholder { .. })));

    grid.shutdown().await;
    assert_eq!(platform.live_handles(), 0);
}

#[tokio::test(start_paused = true)]
async fn extra_devices_beyond_the_grid_are_ignored() {
    let platform = Arc::new(cameras(12));
    let grid = start(&platform).await;
    assert_eq!(grid.bound_count(), 10);
    assert_eq!(grid.slots().len(), 10);
    assert!(grid.controller("usb-10").is_none());
    grid.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn no_cameras_means_no_controllers() {
    let platform = Arc::new(SimulatedMedia::new(vec![SimulatedDevice::microphone(
        "mic-0", "Headset",
    )]));
    let grid = start(&platform).await;

    assert_eq!(
        grid.status(),
        &GridStatus::Failed(EnumerationError::NoDevicesFound)
    );
    assert_eq!(grid.bound_count(), 0);
    assert!(grid.views().is_empty());
    assert_eq!(platform.live_handles(), 0);
    assert_eq!(platform.probe_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn hardware_failure_on_one_feed_leaves_the_others_running() {
    let platform = Arc::new(cameras(3).failing("usb-1", "NotReadableError"));
    let grid = start(&platform).await;

    let failed = grid
        .controller("usb-1")
        .unwrap()
        .wait_for(|s| s.lifecycle == Lifecycle::ErrorStopped)
        .await
        .unwrap();
    assert!(failed
        .last_error
        .as_deref()
        .unwrap()
        .contains("insufficient USB bandwidth"));

    let first = wait_active(&grid, "usb-0").await;
    let third = wait_active(&grid, "usb-2").await;
    assert!(first.last_error.is_none());
    assert!(third.last_error.is_none());
    assert_eq!(platform.live_handles(), 2);
    assert_eq!(platform.live_handles_for("usb-1"), 0);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(platform.attempts("usb-1"), 1);
    grid.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn revoked_camera_stops_alone_and_releases_its_stream() {
    let platform = Arc::new(cameras(2));
    let grid = start(&platform).await;
    wait_active(&grid, "usb-0").await;
    wait_active(&grid, "usb-1").await;

    assert_eq!(platform.revoke("usb-0"), 1);
    let stopped = grid
        .controller("usb-0")
        .unwrap()
        .wait_for(|s| s.lifecycle == Lifecycle::ErrorStopped)
        .await
        .unwrap();
    assert!(!stopped.holds_stream);
    assert_eq!(platform.live_handles_for("usb-0"), 0);
    assert!(grid.controller("usb-1").unwrap().state().is_active());
    assert_eq!(platform.live_handles(), 1);

    grid.shutdown().await;
    assert_eq!(platform.live_handles(), 0);
}

#[tokio::test(start_paused = true)]
async fn reading_is_stored_and_cleared_when_the_feed_is_switched_off() {
    let platform = Arc::new(cameras(1));
    let grid = FeedGrid::start(
        context(&platform, Arc::new(FixedReading::new("412.3 kPa"))),
        GridConfig::default(),
    )
    .await;
    let feed = grid.controller("usb-0").unwrap();
    feed.wait_for(FeedState::is_active).await.unwrap();

    feed.inspect().unwrap();
    let state = feed
        .wait_for(|s| s.last_captured_text.is_some())
        .await
        .unwrap();
    assert_eq!(state.last_captured_text.as_deref(), Some("412.3 kPa"));

    feed.toggle().unwrap();
    let state = feed
        .wait_for(|s| s.lifecycle == Lifecycle::Off)
        .await
        .unwrap();
    assert_eq!(state.last_captured_text, None);
    assert_eq!(platform.live_handles(), 0);
    grid.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn teardown_while_initializing_leaks_nothing() {
    let platform = Arc::new(cameras(3).with_acquire_latency(Duration::from_millis(300)));
    let grid = start(&platform).await;
    grid.controller("usb-0")
        .unwrap()
        .wait_for(|s| s.acquiring)
        .await
        .unwrap();

    grid.shutdown().await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(platform.live_handles(), 0);
    assert_eq!(platform.attempts("usb-1"), 0);
    assert_eq!(platform.attempts("usb-2"), 0);
}

#[tokio::test(start_paused = true)]
async fn teardown_while_active_leaks_nothing() {
    let platform = Arc::new(cameras(3));
    let grid = start(&platform).await;
    for id in ["usb-0", "usb-1", "usb-2"] {
        wait_active(&grid, id).await;
    }
    assert_eq!(platform.live_handles(), 3);

    grid.shutdown().await;
    assert_eq!(platform.live_handles(), 0);
}

#[tokio::test(start_paused = true)]
async fn teardown_during_inspection_leaks_nothing() {
    let platform = Arc::new(cameras(2));
    let gate = Arc::new(Notify::new());
    let recognizer = Arc::new(FixedReading::gated("7.5 bar", Arc::clone(&gate)));
    let grid = FeedGrid::start(
        context(&platform, recognizer.clone()),
        GridConfig::default(),
    )
    .await;

    let feed = grid.controller("usb-0").unwrap();
    feed.wait_for(FeedState::is_active).await.unwrap();
    feed.inspect().unwrap();
    feed.wait_for(|s| s.busy).await.unwrap();
    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 1);

    grid.shutdown().await;
    gate.notify_one();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(platform.live_handles(), 0);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_grid_releases_every_stream() {
    let platform = Arc::new(cameras(2));
    let grid = start(&platform).await;
    wait_active(&grid, "usb-0").await;
    wait_active(&grid, "usb-1").await;

    drop(grid);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(platform.live_handles(), 0);
}

#[tokio::test(start_paused = true)]
async fn rapid_toggling_settles_off_with_one_acquisition_at_a_time() {
    let platform = Arc::new(cameras(1).with_acquire_latency(Duration::from_millis(400)));
    let grid = start(&platform).await;
    let feed = grid.controller("usb-0").unwrap();
    feed.wait_for(FeedState::is_active).await.unwrap();

    feed.set_power(false).unwrap();
    feed.set_power(true).unwrap();
    feed.set_power(false).unwrap();
    feed.set_power(true).unwrap();
    feed.set_power(false).unwrap();

    let state = feed
        .wait_for(|s| s.lifecycle == Lifecycle::Off && !s.acquiring)
        .await
        .unwrap();
    assert!(!state.holds_stream);
    assert!(!state.desired_on);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(platform.live_handles(), 0);
    assert_eq!(platform.max_in_flight("usb-0"), 1);
    grid.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn active_exactly_when_holding_a_stream() {
    let platform = Arc::new(cameras(1).with_acquire_latency(Duration::from_millis(50)));
    let grid = start(&platform).await;
    let feed = grid.controller("usb-0").unwrap();

    let mut states = feed.subscribe();
    let watcher = tokio::spawn(async move {
        let mut seen = 0usize;
        loop {
            {
                let state = states.borrow_and_update();
                assert_eq!(state.is_active(), state.holds_stream, "{:?}", *state);
                seen += 1;
            }
            if states.changed().await.is_err() {
                return seen;
            }
        }
    });

    feed.wait_for(FeedState::is_active).await.unwrap();
    for round in 0..6 {
        feed.toggle().unwrap();
        if round % 2 == 1 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
    feed.wait_for(|s| s.is_active() && !s.acquiring).await.unwrap();

    grid.shutdown().await;
    let seen = watcher.await.unwrap();
    assert!(seen > 1);
    assert_eq!(platform.live_handles(), 0);
}

#[tokio::test(start_paused = true)]
async fn refresh_runs_the_handshake_again() {
    let platform = Arc::new(cameras(0));
    let mut grid = start(&platform).await;
    assert_eq!(
        grid.status(),
        &GridStatus::Failed(EnumerationError::NoDevicesFound)
    );

    grid.refresh().await;
    assert!(matches!(grid.status(), GridStatus::Failed(_)));
    assert_eq!(platform.probe_count(), 2);
    assert_eq!(platform.live_handles(), 0);
    grid.shutdown().await;
}
