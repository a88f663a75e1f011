//! Utility re-exports and helper macros for the car firmware.
//!
//! This module re-exports the control components and timing types:
//!
//! - `config`: immutable robot configuration fixed at boot
//! - `motion`: motion intents and distance samples shared by every component
//! - `connection`: WiFi/broker session management and command decoding
//! - `controllers`: motor driver, ultrasonic sensor and the control loop
//! - `policy`: safety interlock and telemetry scheduling
//!
//! The `mk_static!` macro simplifies static initialization in no-std contexts.

pub mod config;
pub mod connection;
pub mod controllers;
pub mod motion;
pub mod policy;

pub use config::RobotConfig;
pub use connection::manager::ConnectivityManager;
pub use controllers::Coordinator;
pub use embassy_time::{Duration, Instant};
pub use motion::{Direction, DistanceSample, MotionIntent, Range};

#[macro_export]
/// Initialize a no-std static cell and write the given value into it.
///
/// This macro creates a `static_cell::StaticCell` for type `$t` and initializes
/// it with `$val`, returning a mutable reference to the stored value.
macro_rules! mk_static {
    ($t:ty, $val:expr) => {{
        static STATIC_CELL: $crate::static_cell::StaticCell<$t> =
            $crate::static_cell::StaticCell::new();
        STATIC_CELL.uninit().write($val)
    }};
}
