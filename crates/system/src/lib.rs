pub mod cpu;
pub mod disk;
pub mod memory;
pub mod ticks;

pub use cpu::{CpuLoadPoller, CpuSensors, HostCpuSensors};
pub use disk::{DirectorySize, DiskPollSettings, DiskUsagePoller, SizeSource};
pub use memory::{format_bytes, format_optional_bytes, MemoryProbe, ProcessMemory};
pub use ticks::TickRateTracker;

use chrono::Local;
use std::sync::{Arc, Mutex};
use telemetry_config::TelemetryConfig;
use telemetry_core::state::{MemorySnapshot, TelemetrySnapshot};
use telemetry_core::sync::lock;
use telemetry_core::{Result, TickListener, Tracker};
use tracing::{error, info};

/// Owns one of each collector and hands out consistent snapshots.
///
/// Built once at startup and passed to whatever reports on it; there is no
/// global instance.
pub struct Telemetry {
    ticks:  Arc<TickRateTracker>,
    cpu:    CpuLoadPoller,
    disk:   DiskUsagePoller,
    memory: Mutex<Box<dyn MemoryProbe>>,
}

impl Telemetry {
    pub fn new(
        ticks: TickRateTracker,
        cpu: CpuLoadPoller,
        disk: DiskUsagePoller,
        memory: impl MemoryProbe + 'static,
    ) -> Self {
        Self {
            ticks: Arc::new(ticks),
            cpu,
            disk,
            memory: Mutex::new(Box::new(memory)),
        }
    }

    /// Collectors backed by the real host: `/proc/stat` and `sysinfo` for
    /// CPU and memory, the resolved world directory for disk.
    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self::new(
            TickRateTracker::from_config(&config.ticks),
            CpuLoadPoller::from_config(&config.cpu),
            DiskUsagePoller::from_config(&config.disk),
            ProcessMemory::new(),
        )
    }

    fn trackers(&self) -> [&dyn Tracker; 2] {
        [&self.cpu, &self.disk]
    }

    /// Start every poller. If one fails to start, the ones this call
    /// started are closed again before the error is returned; pollers that
    /// were already running are left alone.
    pub fn start(&self) -> Result<()> {
        let mut started: Vec<&dyn Tracker> = Vec::new();
        for tracker in self.trackers() {
            if let Err(e) = tracker.start() {
                error!("Failed to start {}: {e}", tracker.name());
                for tracker in started {
                    tracker.close();
                }
                return Err(e);
            }
            started.push(tracker);
        }
        info!("Telemetry collectors running");
        Ok(())
    }

    /// Stop and join every poller. Cached values stay readable.
    pub fn close(&self) {
        for tracker in self.trackers() {
            tracker.close();
        }
    }

    /// Handle for the host's tick loop.
    pub fn tick_listener(&self) -> Arc<dyn TickListener> {
        self.ticks.clone()
    }

    pub fn ticks(&self) -> &TickRateTracker {
        &self.ticks
    }

    pub fn cpu(&self) -> &CpuLoadPoller {
        &self.cpu
    }

    pub fn disk(&self) -> &DiskUsagePoller {
        &self.disk
    }

    pub fn memory(&self) -> MemorySnapshot {
        lock(&self.memory).sample()
    }

    /// Every collector's latest values. Each part is internally consistent;
    /// the parts are read one after another.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            ticks:       self.ticks.metrics(),
            cpu:         self.cpu.snapshot(),
            memory:      self.memory(),
            disk:        self.disk.usage(),
            captured_at: Local::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::{CpuLoadTicks, CpuTicks};
    use std::path::PathBuf;
    use std::time::Duration;
    use telemetry_core::state::{DiskStatus, Horizon, MemoryUsage};
    use telemetry_core::{PollerState, TelemetryError};

    struct Idle;

    impl CpuSensors for Idle {
        fn load_ticks(&mut self) -> CpuLoadTicks {
            CpuLoadTicks {
                system:   CpuTicks::default(),
                per_core: vec![CpuTicks::default()],
            }
        }

        fn temperature_celsius(&mut self) -> f64 {
            0.0
        }

        fn core_frequencies_hz(&mut self) -> Vec<u64> {
            vec![3_000_000_000]
        }
    }

    struct FixedMemory;

    impl MemoryProbe for FixedMemory {
        fn sample(&mut self) -> MemorySnapshot {
            MemorySnapshot {
                heap:     MemoryUsage { used: 256, committed: 512, max: Some(1024) },
                non_heap: MemoryUsage { used: 64, committed: 128, max: None },
            }
        }
    }

    fn hub(world: Option<PathBuf>) -> Telemetry {
        Telemetry::new(
            TickRateTracker::default(),
            CpuLoadPoller::new(Idle, Duration::from_millis(10), 4),
            DiskUsagePoller::for_directory(world, DiskPollSettings::default()),
            FixedMemory,
        )
    }

    #[test]
    fn snapshot_before_start_reports_seeds() {
        let telemetry = hub(None);
        let snapshot = telemetry.snapshot();

        let five = snapshot.ticks.get(Horizon::FIVE_SECONDS).unwrap();
        assert!((five.tps - 20.0).abs() < 1e-9);
        assert_eq!(snapshot.cpu.overall_load, None);
        assert_eq!(snapshot.memory.total_used(), 320);
        assert_eq!(snapshot.memory.max_bytes(), 1024);
        assert_eq!(snapshot.disk.size_bytes, None);
    }

    #[test]
    fn ticks_reach_the_tracker_through_the_listener() {
        let telemetry = hub(None);
        let listener = telemetry.tick_listener();
        for _ in 0..100 {
            listener.on_tick_completed(100_000_000);
        }
        let tps = telemetry.ticks().tps(Horizon::FIVE_SECONDS).unwrap();
        assert!((tps - 10.0).abs() < 1e-9);
    }

    #[test]
    fn start_and_close_cover_every_poller() {
        let telemetry = hub(None);
        telemetry.start().unwrap();
        assert!(telemetry.cpu().is_alive());
        assert_eq!(telemetry.disk().status(), DiskStatus::Unavailable);

        telemetry.close();
        assert!(!telemetry.cpu().is_alive());
        assert_eq!(telemetry.cpu().state(), PollerState::Stopped);
    }

    #[test]
    fn second_start_leaves_running_pollers_alone() {
        let world = std::env::temp_dir().join(format!("telemetry-hub-restart-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&world);
        std::fs::create_dir_all(&world).unwrap();
        std::fs::write(world.join("level.dat"), b"0123456789").unwrap();

        let telemetry = hub(Some(world.clone()));
        telemetry.start().unwrap();
        let err = telemetry.start().unwrap_err();
        assert!(matches!(err, TelemetryError::AlreadyStarted(_)));

        assert!(telemetry.cpu().is_alive());
        assert!(telemetry.disk().is_alive());
        assert!(telemetry.disk().is_tracking());
        assert_ne!(telemetry.disk().status(), DiskStatus::Frozen);

        telemetry.close();
        assert!(!telemetry.cpu().is_alive());
        assert!(!telemetry.disk().is_alive());
        let _ = std::fs::remove_dir_all(&world);
    }

    #[test]
    fn failed_start_rolls_back_only_its_own_pollers() {
        let telemetry = hub(None);
        telemetry.disk().close();

        assert!(matches!(telemetry.start(), Err(TelemetryError::Closed(_))));
        assert!(!telemetry.cpu().is_alive());
        assert_eq!(telemetry.cpu().state(), PollerState::Stopped);
    }
}
