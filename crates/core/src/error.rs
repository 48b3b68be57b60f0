use thiserror::Error;

/// Top-level error type shared by every telemetry crate.
///
/// Only setup paths return it. Getters on the trackers never fail; degraded
/// measurements are encoded in the returned values instead.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("config error: {0}")]
    Config(String),

    #[error("failed to spawn '{name}' thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{0}' was already started")]
    AlreadyStarted(String),

    #[error("'{0}' was closed and cannot be started")]
    Closed(String),

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

pub type Result<T, E = TelemetryError> = std::result::Result<T, E>;
