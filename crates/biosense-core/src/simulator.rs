//! Synthetic sensor feed driven by a periodic tokio timer.
//!
//! A [`RunningSimulator`] owns its timer task. The task is aborted on
//! [`RunningSimulator::stop`] and on drop, so an abandoned session never leaves
//! a background tick behind.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, trace};

use crate::model::MetricSnapshot;

pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

const OXYGEN_RANGE: (f64, f64) = (92.0, 100.0);
const OXYGEN_JITTER: f64 = 1.5;
const WBC_FLOOR: f64 = 3000.0;
const WBC_DRIFT: (f64, f64) = (-320.0, 480.0);
const RBC_RANGE: (f64, f64) = (3.0, 6.5);
const RBC_JITTER: f64 = 0.15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatorConfig {
    pub tick: Duration,
    /// Fixed RNG seed; `None` draws from OS entropy.
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            seed: None,
        }
    }
}

/// Derive the next reading from the previous one. Each channel moves independently.
pub fn step<R: Rng + ?Sized>(prev: &MetricSnapshot, rng: &mut R) -> MetricSnapshot {
    let oxygen = (prev.oxygen + rng.gen_range(-OXYGEN_JITTER..=OXYGEN_JITTER))
        .clamp(OXYGEN_RANGE.0, OXYGEN_RANGE.1);
    let wbc = (prev.wbc + rng.gen_range(WBC_DRIFT.0..=WBC_DRIFT.1)).max(WBC_FLOOR);
    let rbc = (prev.rbc + rng.gen_range(-RBC_JITTER..=RBC_JITTER)).clamp(RBC_RANGE.0, RBC_RANGE.1);
    MetricSnapshot { oxygen, wbc, rbc }
}

#[derive(Debug, Clone, Default)]
pub struct MetricSimulator {
    config: SimulatorConfig,
}

impl MetricSimulator {
    pub fn new(config: SimulatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Begin ticking from the initial snapshot. Must be called inside a tokio runtime.
    pub fn start(&self) -> RunningSimulator {
        let initial = MetricSnapshot::default();
        let (tx, rx) = watch::channel(initial);
        let cell = Arc::new(Mutex::new(FeedCell {
            current: initial,
            ticks: 0,
            stopped: false,
        }));
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let period = self.config.tick;
        let task_cell = Arc::clone(&cell);

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let mut feed = lock(&task_cell);
                if feed.stopped {
                    break;
                }
                feed.current = step(&feed.current, &mut rng);
                feed.ticks += 1;
                trace!(tick = feed.ticks, snapshot = ?feed.current, "simulator tick");
                // Published under the lock so `stop` never misses a reading.
                let _ = tx.send(feed.current);
            }
        });
        debug!(tick_ms = period.as_millis() as u64, "metric simulator started");

        RunningSimulator {
            cell,
            rx,
            task: Some(task),
        }
    }
}

struct FeedCell {
    current: MetricSnapshot,
    ticks: u64,
    stopped: bool,
}

fn lock(cell: &Mutex<FeedCell>) -> MutexGuard<'_, FeedCell> {
    cell.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to a ticking simulator. Owns the timer task.
pub struct RunningSimulator {
    cell: Arc<Mutex<FeedCell>>,
    rx: watch::Receiver<MetricSnapshot>,
    task: Option<JoinHandle<()>>,
}

impl RunningSimulator {
    /// Live snapshot stream; the receiver always holds the latest emitted reading.
    pub fn subscribe(&self) -> watch::Receiver<MetricSnapshot> {
        self.rx.clone()
    }

    pub fn latest(&self) -> MetricSnapshot {
        lock(&self.cell).current
    }

    pub fn ticks(&self) -> u64 {
        lock(&self.cell).ticks
    }

    /// Cancel the timer and return the most recent snapshot.
    pub fn stop(mut self) -> MetricSnapshot {
        let (snapshot, ticks) = self.halt();
        debug!(ticks, "metric simulator stopped");
        snapshot
    }

    fn halt(&mut self) -> (MetricSnapshot, u64) {
        let (snapshot, ticks) = {
            let mut feed = lock(&self.cell);
            feed.stopped = true;
            (feed.current, feed.ticks)
        };
        if let Some(task) = self.task.take() {
            task.abort();
        }
        (snapshot, ticks)
    }
}

impl Drop for RunningSimulator {
    fn drop(&mut self) {
        if self.task.is_some() {
            let (_, ticks) = self.halt();
            debug!(ticks, "metric simulator released on teardown");
        }
    }
}

impl std::fmt::Debug for RunningSimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let feed = lock(&self.cell);
        f.debug_struct("RunningSimulator")
            .field("current", &feed.current)
            .field("ticks", &feed.ticks)
            .field("stopped", &feed.stopped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn seeded(seed: u64) -> MetricSimulator {
        MetricSimulator::new(SimulatorConfig {
            tick: Duration::from_secs(1),
            seed: Some(seed),
        })
    }

    proptest! {
        #[test]
        fn ticks_stay_within_channel_bounds(seed in any::<u64>(), ticks in 1usize..400) {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut snapshot = MetricSnapshot::default();
            for _ in 0..ticks {
                snapshot = step(&snapshot, &mut rng);
                prop_assert!((92.0..=100.0).contains(&snapshot.oxygen));
                prop_assert!((3.0..=6.5).contains(&snapshot.rbc));
                prop_assert!(snapshot.wbc >= 3000.0);
            }
        }
    }

    #[test]
    fn step_moves_each_channel_by_bounded_amount() {
        let mut rng = StdRng::seed_from_u64(7);
        let prev = MetricSnapshot::new(96.0, 8000.0, 4.5);
        for _ in 0..1000 {
            let next = step(&prev, &mut rng);
            assert!((next.oxygen - prev.oxygen).abs() <= 1.5 + 1e-9);
            assert!(next.wbc - prev.wbc >= -320.0 - 1e-9);
            assert!(next.wbc - prev.wbc <= 480.0 + 1e-9);
            assert!((next.rbc - prev.rbc).abs() <= 0.15 + 1e-9);
        }
    }

    #[test]
    fn wbc_is_floored_at_minimum() {
        let mut rng = StdRng::seed_from_u64(11);
        let prev = MetricSnapshot::new(98.0, 3000.0, 5.0);
        for _ in 0..200 {
            assert!(step(&prev, &mut rng).wbc >= 3000.0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_arrives_after_one_period() {
        let running = seeded(1).start();
        assert_eq!(running.latest(), MetricSnapshot::default());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(running.ticks(), 0);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(running.ticks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_returns_last_emitted_snapshot() {
        let running = seeded(42).start();
        let mut rx = running.subscribe();
        for _ in 0..3 {
            rx.changed().await.unwrap();
        }
        let emitted = *rx.borrow_and_update();
        assert_eq!(running.ticks(), 3);

        let stopped = running.stop();
        assert_eq!(stopped, emitted);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(*rx.borrow(), emitted, "no tick may run after stop");
    }

    #[tokio::test(start_paused = true)]
    async fn seeded_feed_matches_pure_steps() {
        let running = seeded(99).start();
        let mut rx = running.subscribe();
        rx.changed().await.unwrap();
        rx.changed().await.unwrap();
        let stopped = running.stop();

        let mut rng = StdRng::seed_from_u64(99);
        let expected = step(&step(&MetricSnapshot::default(), &mut rng), &mut rng);
        assert_eq!(stopped, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_releases_timer() {
        let running = seeded(3).start();
        let mut rx = running.subscribe();
        rx.changed().await.unwrap();
        drop(running);

        tokio::time::sleep(Duration::from_secs(3)).await;
        // Sender lives in the aborted task, so the channel closes.
        assert!(rx.changed().await.is_err());
    }
}
