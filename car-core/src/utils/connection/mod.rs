//! Module Exports
//!
//! This file exports the modules that talk to the outside world over WiFi and
//! the MQTT broker.
//!
//! # Modules
//! - `link`: collaborator traits for the WiFi station and broker session.
//! - `manager`: connection state machine with backoff and re-subscription.
//! - `command`: decoding of inbound command payloads into motion intents.

pub mod command;
/// Traits the WiFi and broker drivers implement.
pub mod link;
pub mod manager;

pub use command::{CommandDecoder, DecodeError};
pub use link::{BrokerClient, LinkError, WifiLink};
pub use manager::{ConnectionState, ConnectivityManager, LinkStats};
