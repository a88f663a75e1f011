//! Control and telemetry core for a WiFi/MQTT differential-drive car on
//! no-std embedded platforms.
//!
//! For a runnable host simulation, see the `car-app/mock-mcu` binary.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod utils;

#[doc(hidden)]
pub use static_cell;
