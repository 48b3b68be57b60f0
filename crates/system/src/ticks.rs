use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use telemetry_config::TicksConfig;
use telemetry_core::state::{Horizon, TickMetrics, TickStats};
use telemetry_core::sync::{read, write};
use telemetry_core::{RollingWindow, TickListener};

pub const NANOS_PER_SECOND: u64 = 1_000_000_000;
pub const NANOS_PER_MILLI: f64 = 1_000_000.0;
pub const DEFAULT_TPS: u32 = 20;

#[derive(Debug)]
struct HorizonWindow {
    horizon: Horizon,
    window:  RollingWindow<u64>,
}

/// Turns per-tick durations into TPS and MSPT over several trailing horizons.
///
/// Each horizon owns a window sized `horizon_secs × expected_tps` and seeded
/// with the ideal tick duration. Every tick is written to all windows under
/// one write lock, so a reader never sees horizons disagree about which
/// ticks have arrived.
///
/// TPS is derived from the mean tick duration (`1e9 / mean_ns`) rather than
/// by counting ticks per sampling period; the mean stays stable when the
/// host's scheduling is irregular.
#[derive(Debug)]
pub struct TickRateTracker {
    expected_tps: u32,
    windows:      RwLock<Vec<HorizonWindow>>,
    ticks_seen:   AtomicU64,
}

impl TickRateTracker {
    /// Track the given horizons for a host aiming at `expected_tps` (min 1).
    pub fn new(horizons: &[Horizon], expected_tps: u32) -> Self {
        let expected_tps = expected_tps.max(1);
        let ideal = NANOS_PER_SECOND / u64::from(expected_tps);

        let windows = horizons
            .iter()
            .map(|&horizon| HorizonWindow {
                horizon,
                window: RollingWindow::new(
                    (horizon.secs() as usize).saturating_mul(expected_tps as usize),
                    ideal,
                ),
            })
            .collect();

        Self {
            expected_tps,
            windows: RwLock::new(windows),
            ticks_seen: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &TicksConfig) -> Self {
        Self::new(&config.horizons(), config.expected_tps)
    }

    pub fn expected_tps(&self) -> u32 {
        self.expected_tps
    }

    /// Duration of a tick at exactly the expected rate.
    pub fn ideal_tick_nanos(&self) -> u64 {
        NANOS_PER_SECOND / u64::from(self.expected_tps)
    }

    /// Record one completed tick in every horizon.
    pub fn submit(&self, duration_nanos: u64) {
        let mut windows = write(&self.windows);
        for entry in windows.iter_mut() {
            entry.window.submit(duration_nanos);
        }
        self.ticks_seen.fetch_add(1, Ordering::Relaxed);
    }

    /// `false` until the first tick arrives; values are the seeded ideal
    /// until then.
    pub fn is_active(&self) -> bool {
        self.ticks_seen() > 0
    }

    pub fn ticks_seen(&self) -> u64 {
        self.ticks_seen.load(Ordering::Relaxed)
    }

    pub fn horizons(&self) -> Vec<Horizon> {
        read(&self.windows).iter().map(|e| e.horizon).collect()
    }

    /// Number of samples currently held for `horizon`.
    pub fn window_len(&self, horizon: Horizon) -> Option<usize> {
        read(&self.windows)
            .iter()
            .find(|e| e.horizon == horizon)
            .map(|e| e.window.len())
    }

    /// Stats for one horizon, or `None` if it isn't tracked.
    pub fn stats(&self, horizon: Horizon) -> Option<TickStats> {
        read(&self.windows)
            .iter()
            .find(|e| e.horizon == horizon)
            .map(|e| stats_from_mean(e.horizon, e.window.mean()))
    }

    pub fn tps(&self, horizon: Horizon) -> Option<f64> {
        self.stats(horizon).map(|s| s.tps)
    }

    pub fn mspt(&self, horizon: Horizon) -> Option<f64> {
        self.stats(horizon).map(|s| s.mspt)
    }

    /// Stats for every horizon, taken under a single read lock.
    pub fn metrics(&self) -> TickMetrics {
        let horizons = read(&self.windows)
            .iter()
            .map(|e| stats_from_mean(e.horizon, e.window.mean()))
            .collect();
        TickMetrics { horizons }
    }
}

impl Default for TickRateTracker {
    fn default() -> Self {
        Self::new(&Horizon::DEFAULTS, DEFAULT_TPS)
    }
}

impl TickListener for TickRateTracker {
    fn on_tick_completed(&self, duration_nanos: u64) {
        self.submit(duration_nanos);
    }
}

fn stats_from_mean(horizon: Horizon, mean_nanos: f64) -> TickStats {
    // A window of zero-length ticks would divide by zero; one nanosecond
    // keeps the rate finite.
    let mean_nanos = mean_nanos.max(1.0);
    TickStats {
        horizon,
        tps:  NANOS_PER_SECOND as f64 / mean_nanos,
        mspt: mean_nanos / NANOS_PER_MILLI,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn seeded_values_before_first_tick() {
        let tracker = TickRateTracker::default();
        assert!(!tracker.is_active());
        for horizon in Horizon::DEFAULTS {
            assert!(approx(tracker.tps(horizon).unwrap(), 20.0));
            assert!(approx(tracker.mspt(horizon).unwrap(), 50.0));
        }
    }

    #[test]
    fn five_second_window_at_fifty_millis() {
        let tracker = TickRateTracker::new(&[Horizon::FIVE_SECONDS], 20);
        for _ in 0..100 {
            tracker.submit(50_000_000);
        }
        assert!(tracker.is_active());
        assert_eq!(tracker.window_len(Horizon::FIVE_SECONDS), Some(100));
        assert!(approx(tracker.tps(Horizon::FIVE_SECONDS).unwrap(), 20.0));
        assert!(approx(tracker.mspt(Horizon::FIVE_SECONDS).unwrap(), 50.0));
    }

    #[test]
    fn constant_duration_fills_window() {
        let tracker = TickRateTracker::new(&[Horizon::from_secs(2)], 20);
        let v = 80_000_000;
        for _ in 0..40 {
            tracker.submit(v);
        }
        let stats = tracker.stats(Horizon::from_secs(2)).unwrap();
        assert!(approx(stats.mspt, 80.0));
        assert!(approx(stats.tps, 12.5));
    }

    #[test]
    fn every_horizon_sees_every_tick() {
        let tracker = TickRateTracker::default();
        tracker.submit(100_000_000);
        for horizon in Horizon::DEFAULTS {
            assert_eq!(tracker.window_len(horizon), Some(2));
        }

        // The 5s window has fully turned over; longer ones still average in the seed.
        for _ in 0..100 {
            tracker.submit(100_000_000);
        }
        let metrics = tracker.metrics();
        assert!(approx(metrics.get(Horizon::FIVE_SECONDS).unwrap().mspt, 100.0));
        assert!(metrics.get(Horizon::ONE_MINUTE).unwrap().mspt < 100.0);
        assert_eq!(metrics.horizons.len(), 5);
    }

    #[test]
    fn untracked_horizon_is_none() {
        let tracker = TickRateTracker::new(&[Horizon::FIVE_SECONDS], 20);
        assert_eq!(tracker.tps(Horizon::FIFTEEN_MINUTES), None);
    }

    #[test]
    fn zero_duration_ticks_stay_finite() {
        let tracker = TickRateTracker::new(&[Horizon::from_secs(1)], 1);
        tracker.submit(0);
        let stats = tracker.stats(Horizon::from_secs(1)).unwrap();
        assert!(stats.tps.is_finite());
    }

    #[test]
    fn listener_callback_feeds_tracker() {
        let tracker = TickRateTracker::default();
        let listener: &dyn TickListener = &tracker;
        listener.on_tick_completed(25_000_000);
        assert_eq!(tracker.ticks_seen(), 1);
    }

    #[test]
    fn concurrent_readers_see_consistent_horizons() {
        let tracker = Arc::new(TickRateTracker::new(&[Horizon::from_secs(1), Horizon::from_secs(2)], 10));
        let writer = {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || {
                for _ in 0..5_000 {
                    tracker.submit(200_000_000);
                }
            })
        };

        for _ in 0..1_000 {
            let metrics = tracker.metrics();
            for stats in &metrics.horizons {
                assert!(stats.mspt >= 100.0 && stats.mspt <= 200.0);
            }
        }

        writer.join().unwrap();
        assert!(approx(tracker.mspt(Horizon::from_secs(2)).unwrap(), 200.0));
    }
}
