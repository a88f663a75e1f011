//! Decision rules that sit between sensing and acting.
//!
//! - `interlock`: suppresses forward motion when an obstacle is too close.
//! - `telemetry`: paces distance publications on a fixed period.

pub mod interlock;
pub mod telemetry;

pub use interlock::SafetyInterlock;
pub use telemetry::{TelemetryOutcome, TelemetryScheduler};
