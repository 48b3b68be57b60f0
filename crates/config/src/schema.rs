use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use telemetry_core::state::Horizon;
use telemetry_core::{Result, TelemetryError};

/// Highest accepted `ticks.expected_tps`.
pub const MAX_EXPECTED_TPS: u32 = 1_000;
/// Longest accepted tick horizon: one day.
pub const MAX_HORIZON_SECS: u32 = 86_400;
/// Largest accepted `cpu.history_len`.
pub const MAX_HISTORY_LEN: usize = 86_400;

/// Root configuration structure parsed from `telemetry.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Tick throughput/latency tracking.
    pub ticks:  TicksConfig,
    /// CPU load and temperature poller.
    pub cpu:    CpuConfig,
    /// World directory size poller.
    pub disk:   DiskConfig,
    /// Summary output of the bundled binary.
    pub report: ReportConfig,
}

impl TelemetryConfig {
    /// Reject values that would make a tracker meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.ticks.expected_tps == 0 {
            return Err(TelemetryError::Config("ticks.expected_tps must be > 0".into()));
        }
        if self.ticks.horizons_secs.is_empty() {
            return Err(TelemetryError::Config("ticks.horizons_secs must not be empty".into()));
        }
        if self.ticks.horizons_secs.contains(&0) {
            return Err(TelemetryError::Config("ticks.horizons_secs entries must be > 0".into()));
        }
        if self.ticks.expected_tps > MAX_EXPECTED_TPS {
            return Err(TelemetryError::Config(format!(
                "ticks.expected_tps must be <= {MAX_EXPECTED_TPS}"
            )));
        }
        if self.ticks.horizons_secs.iter().any(|&h| h > MAX_HORIZON_SECS) {
            return Err(TelemetryError::Config(format!(
                "ticks.horizons_secs entries must be <= {MAX_HORIZON_SECS}"
            )));
        }
        if self.cpu.history_len > MAX_HISTORY_LEN {
            return Err(TelemetryError::Config(format!(
                "cpu.history_len must be <= {MAX_HISTORY_LEN}"
            )));
        }
        if self.cpu.interval_ms == 0 {
            return Err(TelemetryError::Config("cpu.interval_ms must be > 0".into()));
        }
        if self.disk.interval_secs == 0 {
            return Err(TelemetryError::Config("disk.interval_secs must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TicksConfig {
    /// Ticks per second the host aims for. Sizes the windows and seeds them
    /// with the ideal tick duration.
    pub expected_tps:  u32,
    /// Trailing horizons to average over, in seconds.
    pub horizons_secs: Vec<u32>,
}

impl TicksConfig {
    pub fn horizons(&self) -> Vec<Horizon> {
        self.horizons_secs.iter().copied().map(Horizon::from_secs).collect()
    }
}

impl Default for TicksConfig {
    fn default() -> Self {
        Self {
            expected_tps:  20,
            horizons_secs: Horizon::DEFAULTS.iter().map(|h| h.secs()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    /// Poll cadence in milliseconds.
    pub interval_ms: u64,
    /// Number of overall-load samples kept for averaging.
    pub history_len: usize,
}

impl CpuConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            history_len: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    /// Initial scan cadence in seconds. Doubles whenever a scan overruns it.
    pub interval_secs:  u64,
    /// Consecutive failed scans tolerated before tracking is disabled.
    pub max_retries:    u32,
    /// Pause between failed scan attempts in milliseconds.
    pub retry_delay_ms: u64,
    /// Server root holding `server.properties`.
    pub server_dir:     PathBuf,
    /// Explicit world directory; overrides `level-name` from `server.properties`.
    pub world_dir:      Option<PathBuf>,
}

impl DiskConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            interval_secs:  60,
            max_retries:    3,
            retry_delay_ms: 1_000,
            server_dir:     PathBuf::from("."),
            world_dir:      None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// How often the binary logs a summary, in seconds.
    pub interval_secs: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self { interval_secs: 10 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = TelemetryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ticks.horizons(), Horizon::DEFAULTS.to_vec());
        assert_eq!(config.cpu.interval(), Duration::from_secs(1));
        assert_eq!(config.disk.retry_delay(), Duration::from_secs(1));
    }

    #[test]
    fn zero_tps_is_rejected() {
        let mut config = TelemetryConfig::default();
        config.ticks.expected_tps = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_horizon_is_rejected() {
        let mut config = TelemetryConfig::default();
        config.ticks.horizons_secs = vec![5, 0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_windows_are_rejected() {
        let mut config = TelemetryConfig::default();
        config.ticks.horizons_secs = vec![5, u32::MAX];
        assert!(config.validate().is_err());

        let mut config = TelemetryConfig::default();
        config.ticks.expected_tps = MAX_EXPECTED_TPS + 1;
        assert!(config.validate().is_err());

        let mut config = TelemetryConfig::default();
        config.cpu.history_len = usize::MAX;
        assert!(config.validate().is_err());

        let mut config = TelemetryConfig::default();
        config.ticks.horizons_secs = vec![MAX_HORIZON_SECS];
        config.ticks.expected_tps = MAX_EXPECTED_TPS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn world_dir_round_trips_through_toml() {
        let config: TelemetryConfig =
            toml::from_str("[disk]\nworld_dir = \"/srv/mc/world\"\n").unwrap();
        assert_eq!(config.disk.world_dir, Some(PathBuf::from("/srv/mc/world")));
    }
}
