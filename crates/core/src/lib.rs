pub mod error;
pub mod lifecycle;
pub mod state;
pub mod sync;
pub mod window;

pub use error::{Result, TelemetryError};
pub use lifecycle::{PollerState, Shutdown, TickListener, Tracker, Worker};
pub use window::{RollingWindow, Sample};
