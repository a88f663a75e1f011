//! Collaborator traits for network and broker access.
//!
//! The control loop never touches a radio or a socket directly. A board
//! support crate (or the host simulator) implements these two traits and the
//! `ConnectivityManager` drives them. Every method must return within a short,
//! bounded time.

use core::fmt;

/// Failures reported by the WiFi or broker collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// The access point or broker could not be reached.
    Unreachable,
    /// The peer answered but refused the session or subscription.
    Rejected,
    Timeout,
    /// The operation needs a session that is not up.
    NotConnected,
}

impl fmt::Display for LinkError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let msg = match self {
            LinkError::Unreachable => "peer unreachable",
            LinkError::Rejected => "peer rejected the request",
            LinkError::Timeout => "operation timed out",
            LinkError::NotConnected => "not connected",
        };
        f.write_str(msg)
    }
}

/// WiFi station association.
pub trait WifiLink {
    /// Start associating with the configured access point. Must not wait for
    /// the association to complete.
    fn begin(&mut self) -> Result<(), LinkError>;

    /// True once associated and holding an IP address.
    fn is_connected(&self) -> bool;

    /// Drop the association so the next `begin` starts clean.
    fn disconnect(&mut self);
}

/// Publish/subscribe broker session.
pub trait BrokerClient {
    /// Perform or start one bounded connection attempt.
    fn connect(&mut self) -> Result<(), LinkError>;

    fn is_connected(&self) -> bool;

    fn disconnect(&mut self);

    fn subscribe(
        &mut self,
        topic: &str,
    ) -> Result<(), LinkError>;

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
    ) -> Result<(), LinkError>;

    /// Service the session and hand every message that arrived since the last
    /// call to `on_message` as `(topic, payload)`. The handler runs to
    /// completion inside this call.
    fn poll(
        &mut self,
        on_message: &mut dyn FnMut(&str, &[u8]),
    );
}
