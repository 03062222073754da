//! Staggered admission of devices into the readiness set.
//!
//! Starting many USB video streams at once saturates the shared bus, so
//! devices are released one at a time: index `i` is admitted `i * delay`
//! after the schedule starts. A single sequential task works through
//! absolute deadlines, so a late wake-up never pulls later admissions
//! forward and order always follows discovery order.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One device passing the stagger gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub device_id: String,
    /// Discovery index
    pub index: usize,
    /// Time since the schedule started
    pub offset: Duration,
}

/// Devices permitted to begin acquisition. Only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadinessSet {
    admitted: Vec<Admission>,
}

impl ReadinessSet {
    pub fn contains(&self, device_id: &str) -> bool {
        self.admitted.iter().any(|a| a.device_id == device_id)
    }

    /// Admissions in the order they happened.
    pub fn admissions(&self) -> &[Admission] {
        &self.admitted
    }

    pub fn len(&self) -> usize {
        self.admitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.admitted.is_empty()
    }

    /// Returns `false` if the device was already admitted.
    fn admit(&mut self, admission: Admission) -> bool {
        if self.contains(&admission.device_id) {
            return false;
        }
        self.admitted.push(admission);
        true
    }

    /// Admit `device_id` at the next index with a zero offset.
    #[cfg(test)]
    pub(crate) fn admit_now(&mut self, device_id: &str) -> bool {
        let index = self.admitted.len();
        self.admit(Admission {
            device_id: device_id.to_string(),
            index,
            offset: Duration::ZERO,
        })
    }
}

/// Owns the pending admissions of one device list.
///
/// Every pending admission has its own token (child of the scheduler token),
/// keyed by device id. Dropping or shutting down the scheduler cancels all
/// of them before anything else can happen.
#[derive(Debug)]
pub struct StaggerScheduler {
    token: CancellationToken,
    pending: HashMap<String, CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl StaggerScheduler {
    /// Start admitting `device_ids` in order, `delay` apart, first one immediately.
    pub fn start(
        device_ids: Vec<String>,
        delay: Duration,
        readiness: watch::Sender<ReadinessSet>,
        parent: &CancellationToken,
    ) -> Self {
        let token = parent.child_token();
        let schedule: Vec<(String, CancellationToken)> = device_ids
            .into_iter()
            .map(|id| {
                let admission = token.child_token();
                (id, admission)
            })
            .collect();
        let pending = schedule
            .iter()
            .map(|(id, admission)| (id.clone(), admission.clone()))
            .collect();

        log::info!(
            "[stagger] scheduling {} device(s), {} ms apart",
            schedule.len(),
            delay.as_millis()
        );
        let task = tokio::spawn(run_schedule(schedule, delay, readiness, token.clone()));

        Self {
            token,
            pending,
            task: Some(task),
        }
    }

    /// Drop the pending admission of one device. Returns `false` for unknown ids.
    pub fn cancel(&self, device_id: &str) -> bool {
        match self.pending.get(device_id) {
            Some(admission) => {
                admission.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel everything still pending and wait for the timer task to end.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::error!("[stagger] task error: {}", e);
            }
        }
    }
}

impl Drop for StaggerScheduler {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run_schedule(
    schedule: Vec<(String, CancellationToken)>,
    delay: Duration,
    readiness: watch::Sender<ReadinessSet>,
    token: CancellationToken,
) {
    let start = Instant::now();

    for (index, (device_id, admission)) in schedule.into_iter().enumerate() {
        let deadline = start + delay.saturating_mul(index as u32);

        tokio::select! {
            biased;

            _ = token.cancelled() => {
                log::debug!("[stagger] cancelled before admitting '{}'", device_id);
                return;
            }
            _ = admission.cancelled() => {
                log::debug!("[stagger] admission of '{}' cancelled", device_id);
                continue;
            }
            _ = tokio::time::sleep_until(deadline) => {}
        }

        let entry = Admission {
            device_id: device_id.clone(),
            index,
            offset: start.elapsed(),
        };
        let offset = entry.offset;
        let admitted = readiness.send_if_modified(|set| set.admit(entry));
        if admitted {
            log::info!(
                "[stagger] admitted '{}' at +{} ms",
                device_id,
                offset.as_millis()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("cam-{i}")).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn admits_in_order_exactly_one_delay_apart() {
        let (tx, mut rx) = watch::channel(ReadinessSet::default());
        let root = CancellationToken::new();
        let scheduler = StaggerScheduler::start(ids(3), Duration::from_millis(1000), tx, &root);

        rx.wait_for(|set| set.len() == 3).await.unwrap();
        let admissions = rx.borrow().admissions().to_vec();
        let offsets: Vec<u128> = admissions.iter().map(|a| a.offset.as_millis()).collect();
        assert_eq!(offsets, vec![0, 1000, 2000]);
        let order: Vec<&str> = admissions.iter().map(|a| a.device_id.as_str()).collect();
        assert_eq!(order, vec!["cam-0", "cam-1", "cam-2"]);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn first_device_is_admitted_immediately() {
        let (tx, mut rx) = watch::channel(ReadinessSet::default());
        let root = CancellationToken::new();
        let _scheduler = StaggerScheduler::start(ids(2), Duration::from_secs(5), tx, &root);

        rx.wait_for(|set| set.contains("cam-0")).await.unwrap();
        assert!(!rx.borrow().contains("cam-1"));
        assert_eq!(rx.borrow().admissions()[0].offset, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_admissions() {
        let (tx, rx) = watch::channel(ReadinessSet::default());
        let root = CancellationToken::new();
        let scheduler = StaggerScheduler::start(ids(3), Duration::from_millis(1000), tx, &root);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        scheduler.shutdown().await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(rx.borrow().len(), 2);
        assert!(!rx.borrow().contains("cam-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_scheduler_cancels_it() {
        let (tx, rx) = watch::channel(ReadinessSet::default());
        let root = CancellationToken::new();
        let scheduler = StaggerScheduler::start(ids(3), Duration::from_millis(1000), tx, &root);
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(scheduler);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(rx.borrow().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_one_device_keeps_the_others_on_schedule() {
        let (tx, mut rx) = watch::channel(ReadinessSet::default());
        let root = CancellationToken::new();
        let scheduler = StaggerScheduler::start(ids(3), Duration::from_millis(1000), tx, &root);
        assert!(scheduler.cancel("cam-1"));
        assert!(!scheduler.cancel("unknown"));

        rx.wait_for(|set| set.contains("cam-2")).await.unwrap();
        let set = rx.borrow().clone();
        assert!(!set.contains("cam-1"));
        assert_eq!(set.admissions()[1].offset, Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn parent_cancellation_stops_admissions() {
        let (tx, rx) = watch::channel(ReadinessSet::default());
        let root = CancellationToken::new();
        let _scheduler = StaggerScheduler::start(ids(2), Duration::from_millis(1000), tx, &root);
        tokio::time::sleep(Duration::from_millis(10)).await;
        root.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(rx.borrow().len(), 1);
    }

    #[test]
    fn readiness_set_admits_once() {
        let mut set = ReadinessSet::default();
        let admission = Admission {
            device_id: "a".into(),
            index: 0,
            offset: Duration::ZERO,
        };
        assert!(set.admit(admission.clone()));
        assert!(!set.admit(admission));
        assert_eq!(set.len(), 1);
    }
}
