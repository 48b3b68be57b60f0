pub mod properties;
pub mod schema;

pub use properties::{resolve_world_dir, Properties};
pub use schema::{CpuConfig, DiskConfig, ReportConfig, TelemetryConfig, TicksConfig};

use std::path::{Path, PathBuf};
use telemetry_core::{Result, TelemetryError};

/// Load configuration from a TOML file.  Returns `TelemetryConfig::default()`
/// if the file doesn't exist so the trackers always have sensible defaults.
pub fn load(path: impl AsRef<Path>) -> Result<TelemetryConfig> {
    let path = path.as_ref();
    if !path.exists() {
        tracing::warn!(
            "Config file not found at '{}'; using defaults.",
            path.display()
        );
        return Ok(TelemetryConfig::default());
    }

    let raw = std::fs::read_to_string(path)
        .map_err(|e| TelemetryError::Config(format!("cannot read '{}': {e}", path.display())))?;

    parse(&raw)
}

/// Parse a TOML document into a validated config.
pub fn parse(raw: &str) -> Result<TelemetryConfig> {
    let config: TelemetryConfig =
        toml::from_str(raw).map_err(|e| TelemetryError::Config(format!("TOML parse error: {e}")))?;
    config.validate()?;
    Ok(config)
}

/// Return the default config path, honouring `$XDG_CONFIG_HOME`.
pub fn default_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("server-telemetry").join("telemetry.toml")
}
