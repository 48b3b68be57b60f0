use chrono::{DateTime, Local};
use serde::Serialize;
use std::time::Duration;

pub const BYTES_PER_MB: f64 = (1024 * 1024) as f64;
pub const BYTES_PER_GB: f64 = (1024 * 1024 * 1024) as f64;

/// Convert a byte count to binary megabytes.
pub fn to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

/// Convert a byte count to binary gigabytes.
pub fn to_gb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GB
}

/// Point-in-time view of every tracker, handed to the reporting layer.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub ticks:       TickMetrics,
    pub cpu:         CpuSnapshot,
    pub memory:      MemorySnapshot,
    pub disk:        DiskUsage,
    pub captured_at: DateTime<Local>,
}

// ── Ticks ─────────────────────────────────────────────────────────────────────

/// A trailing time window over which tick metrics are averaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Horizon {
    secs: u32,
}

impl Horizon {
    pub const FIVE_SECONDS:    Self = Self { secs: 5 };
    pub const FIFTEEN_SECONDS: Self = Self { secs: 15 };
    pub const ONE_MINUTE:      Self = Self { secs: 60 };
    pub const FIVE_MINUTES:    Self = Self { secs: 300 };
    pub const FIFTEEN_MINUTES: Self = Self { secs: 900 };

    pub const DEFAULTS: [Self; 5] = [
        Self::FIVE_SECONDS,
        Self::FIFTEEN_SECONDS,
        Self::ONE_MINUTE,
        Self::FIVE_MINUTES,
        Self::FIFTEEN_MINUTES,
    ];

    /// A horizon of `secs` seconds; zero is clamped to one.
    pub fn from_secs(secs: u32) -> Self {
        Self { secs: secs.max(1) }
    }

    pub fn secs(self) -> u32 {
        self.secs
    }

    pub fn duration(self) -> Duration {
        Duration::from_secs(u64::from(self.secs))
    }

    /// Short display label such as `"5s"`, `"1m"` or `"15m"`.
    pub fn label(self) -> String {
        if self.secs % 3600 == 0 {
            format!("{}h", self.secs / 3600)
        } else if self.secs % 60 == 0 {
            format!("{}m", self.secs / 60)
        } else {
            format!("{}s", self.secs)
        }
    }
}

/// Throughput and latency over one horizon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TickStats {
    pub horizon: Horizon,
    /// Ticks per second, derived from the mean tick duration.
    pub tps:     f64,
    /// Mean milliseconds per tick.
    pub mspt:    f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickMetrics {
    pub horizons: Vec<TickStats>,
}

impl TickMetrics {
    pub fn get(&self, horizon: Horizon) -> Option<&TickStats> {
        self.horizons.iter().find(|s| s.horizon == horizon)
    }
}

// ── CPU ───────────────────────────────────────────────────────────────────────

/// One published CPU poll result.
///
/// Loads are fractions in `[0, 1]`. `None` means "unavailable" and must be
/// rendered as such, never as 0%.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CpuSnapshot {
    /// Per logical CPU, in OS order.
    pub thread_loads:        Vec<Option<f64>>,
    pub overall_load:        Option<f64>,
    pub temperature_celsius: Option<f64>,
    pub core_frequencies_hz: Vec<u64>,
    /// `None` until the first poll cycle completes.
    pub captured_at:         Option<DateTime<Local>>,
}

impl CpuSnapshot {
    pub fn load_is_available(&self) -> bool {
        self.overall_load.is_some()
    }

    pub fn thread_count(&self) -> usize {
        self.thread_loads.len()
    }

    /// Highest per-thread load, ignoring unavailable entries.
    pub fn max_thread_load(&self) -> Option<f64> {
        self.thread_loads.iter().flatten().copied().reduce(f64::max)
    }

    pub fn max_frequency_hz(&self) -> u64 {
        self.core_frequencies_hz.iter().copied().max().unwrap_or(0)
    }

    pub fn frequencies_ghz(&self) -> Vec<f64> {
        self.core_frequencies_hz.iter().map(|hz| *hz as f64 / 1e9).collect()
    }

    pub fn max_frequency_ghz(&self) -> f64 {
        self.max_frequency_hz() as f64 / 1e9
    }
}

// ── Memory ────────────────────────────────────────────────────────────────────

/// Usage of one memory pool in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    pub used:      u64,
    pub committed: u64,
    /// Upper bound, if the pool has one.
    pub max:       Option<u64>,
}

impl MemoryUsage {
    pub fn used_mb(&self) -> f64 {
        to_mb(self.used)
    }

    pub fn committed_mb(&self) -> f64 {
        to_mb(self.committed)
    }

    pub fn max_mb(&self) -> Option<f64> {
        self.max.map(to_mb)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemorySnapshot {
    pub heap:     MemoryUsage,
    pub non_heap: MemoryUsage,
}

impl MemorySnapshot {
    pub fn total_used(&self) -> u64 {
        self.heap.used + self.non_heap.used
    }

    pub fn total_committed(&self) -> u64 {
        self.heap.committed + self.non_heap.committed
    }

    /// Heap ceiling, falling back to the committed heap when unbounded.
    pub fn max_bytes(&self) -> u64 {
        self.heap.max.unwrap_or(self.heap.committed)
    }

    /// Used memory as a fraction of [`max_bytes`](Self::max_bytes).
    pub fn used_fraction(&self) -> f64 {
        match self.max_bytes() {
            0 => 0.0,
            max => self.total_used() as f64 / max as f64,
        }
    }
}

// ── Disk ──────────────────────────────────────────────────────────────────────

/// What a reader can conclude about the world-size value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiskStatus {
    /// Tracking, but the first scan has not finished yet.
    #[default]
    Pending,
    /// Tracking; the value is from the latest successful scan.
    Tracking,
    /// Tracking stopped; the value is frozen at the last successful scan.
    Frozen,
    /// Tracking stopped before any scan succeeded.
    Unavailable,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiskUsage {
    /// `None` until a scan succeeds.
    pub size_bytes: Option<u64>,
    pub status:     DiskStatus,
    /// Scan loop running; `false` before start and after it exits.
    pub tracking:   bool,
}

impl DiskUsage {
    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    pub fn size_mb(&self) -> Option<f64> {
        self.size_bytes.map(to_mb)
    }

    pub fn size_gb(&self) -> Option<f64> {
        self.size_bytes.map(to_gb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn horizon_labels() {
        let labels: Vec<String> = Horizon::DEFAULTS.iter().map(|h| h.label()).collect();
        assert_eq!(labels, ["5s", "15s", "1m", "5m", "15m"]);
        assert_eq!(Horizon::from_secs(90).label(), "90s");
        assert_eq!(Horizon::from_secs(7200).label(), "2h");
    }

    #[test]
    fn zero_horizon_is_clamped() {
        assert_eq!(Horizon::from_secs(0).secs(), 1);
    }

    #[test]
    fn max_thread_load_skips_unavailable() {
        let cpu = CpuSnapshot {
            thread_loads: vec![Some(0.2), None, Some(0.9), Some(0.4)],
            ..Default::default()
        };
        assert_eq!(cpu.max_thread_load(), Some(0.9));
        assert_eq!(CpuSnapshot::default().max_thread_load(), None);
    }

    #[test]
    fn frequencies_convert_to_ghz() {
        let cpu = CpuSnapshot {
            core_frequencies_hz: vec![3_200_000_000, 4_500_000_000],
            ..Default::default()
        };
        assert_eq!(cpu.max_frequency_hz(), 4_500_000_000);
        assert!((cpu.max_frequency_ghz() - 4.5).abs() < 1e-9);
        assert_eq!(cpu.frequencies_ghz().len(), 2);
    }

    #[test]
    fn memory_max_falls_back_to_committed_heap() {
        let mem = MemorySnapshot {
            heap:     MemoryUsage { used: 100, committed: 400, max: None },
            non_heap: MemoryUsage { used: 50, committed: 60, max: None },
        };
        assert_eq!(mem.max_bytes(), 400);
        assert_eq!(mem.total_used(), 150);
        assert_eq!(mem.total_committed(), 460);
    }

    #[test]
    fn memory_pool_in_megabytes() {
        let pool = MemoryUsage { used: 512 * 1024 * 1024, committed: 1024 * 1024 * 1024, max: None };
        assert_eq!(pool.used_mb(), 512.0);
        assert_eq!(pool.committed_mb(), 1024.0);
        assert_eq!(pool.max_mb(), None);
    }

    #[test]
    fn disk_units() {
        let disk = DiskUsage {
            size_bytes: Some(10 * 1024 * 1024),
            status:     DiskStatus::Tracking,
            tracking:   true,
        };
        assert_eq!(disk.size_mb(), Some(10.0));
        assert!(disk.is_tracking());
        assert_eq!(DiskUsage::default().size_gb(), None);
        assert!(!DiskUsage::default().is_tracking());
    }
}
