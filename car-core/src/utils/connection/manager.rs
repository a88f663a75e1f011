//! WiFi and broker session management.
//!
//! `ConnectivityManager` owns both collaborators and walks them through
//! `Disconnected -> NetworkConnecting -> NetworkConnected -> BrokerConnecting
//! -> BrokerConnected`. It is driven from the control loop: each `tick` takes at
//! most one transition and never waits for a connection to finish. Any failure
//! drops back to `Disconnected` and schedules the next attempt after an
//! exponential backoff.

use alloc::string::String;

use embassy_time::{Duration, Instant};

use super::link::{BrokerClient, LinkError, WifiLink};
use crate::utils::{config::RobotConfig, policy::telemetry::Publisher};

/// Largest shift applied to the initial backoff before the cap takes over.
const MAX_BACKOFF_DOUBLINGS: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    NetworkConnecting,
    NetworkConnected,
    BrokerConnecting,
    BrokerConnected,
}

/// Counters describing the link's history since boot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Connection attempts started from `Disconnected`.
    pub attempts: u32,
    pub failures: u32,
    /// Failures since the last established session.
    pub consecutive_failures: u32,
    /// Broker sessions established (initial connect and every reconnect).
    pub sessions: u32,
    /// Established sessions that were later lost.
    pub drops: u32,
}

/// Which layer a failure happened on; decides what gets torn down.
#[derive(Debug, Clone, Copy)]
enum Layer {
    Network,
    Broker,
}

pub struct ConnectivityManager<W, B> {
    wifi: W,
    broker: B,
    state: ConnectionState,
    command_topic: String,
    backoff: Duration,
    backoff_max: Duration,
    wifi_timeout: Duration,
    broker_timeout: Duration,
    /// When the current state was entered.
    entered_at: Instant,
    /// Earliest time the next attempt may start. `None` means immediately.
    retry_at: Option<Instant>,
    stats: LinkStats,
}

impl<W, B> ConnectivityManager<W, B>
where
    W: WifiLink,
    B: BrokerClient,
{
    pub fn new(
        wifi: W,
        broker: B,
        config: &RobotConfig,
    ) -> Self {
        Self {
            wifi,
            broker,
            state: ConnectionState::Disconnected,
            command_topic: config.command_topic.clone(),
            backoff: config.reconnect_backoff(),
            backoff_max: config.reconnect_backoff_max(),
            wifi_timeout: config.wifi_connect_timeout(),
            broker_timeout: config.broker_connect_timeout(),
            entered_at: Instant::from_ticks(0),
            retry_at: None,
            stats: LinkStats::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True only while a broker session is established and subscribed.
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::BrokerConnected
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    /// When the next attempt is allowed, if one is being held back.
    pub fn next_attempt_at(&self) -> Option<Instant> {
        match self.state {
            ConnectionState::Disconnected => self.retry_at,
            _ => None,
        }
    }

    pub fn wifi(&self) -> &W {
        &self.wifi
    }

    pub fn wifi_mut(&mut self) -> &mut W {
        &mut self.wifi
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn broker_mut(&mut self) -> &mut B {
        &mut self.broker
    }

    /// Advance the state machine by at most one transition.
    pub fn tick(
        &mut self,
        now: Instant,
    ) -> ConnectionState {
        match self.state {
            ConnectionState::Disconnected => {
                if self.retry_at.is_some_and(|at| now < at) {
                    return self.state;
                }
                self.stats.attempts += 1;
                if self.wifi.is_connected() {
                    self.enter(ConnectionState::NetworkConnecting, now);
                } else {
                    tracing::info!(attempt = self.stats.attempts, "starting WiFi association");
                    match self.wifi.begin() {
                        Ok(()) => self.enter(ConnectionState::NetworkConnecting, now),
                        Err(e) => self.fail(now, Layer::Network, e),
                    }
                }
            }
            ConnectionState::NetworkConnecting => {
                if self.wifi.is_connected() {
                    self.enter(ConnectionState::NetworkConnected, now);
                } else if self.elapsed(now) >= self.wifi_timeout {
                    self.fail(now, Layer::Network, LinkError::Timeout);
                }
            }
            ConnectionState::NetworkConnected => {
                if !self.wifi.is_connected() {
                    self.fail(now, Layer::Network, LinkError::NotConnected);
                } else {
                    match self.broker.connect() {
                        Ok(()) => self.enter(ConnectionState::BrokerConnecting, now),
                        Err(e) => self.fail(now, Layer::Broker, e),
                    }
                }
            }
            ConnectionState::BrokerConnecting => {
                if !self.wifi.is_connected() {
                    self.fail(now, Layer::Network, LinkError::NotConnected);
                } else if self.broker.is_connected() {
                    // Subscriptions do not survive a lost session, so every
                    // new session subscribes again.
                    match self.broker.subscribe(&self.command_topic) {
                        Ok(()) => {
                            self.stats.sessions += 1;
                            self.stats.consecutive_failures = 0;
                            self.retry_at = None;
                            tracing::info!(topic = %self.command_topic, "subscribed to command topic");
                            self.enter(ConnectionState::BrokerConnected, now);
                        }
                        Err(e) => self.fail(now, Layer::Broker, e),
                    }
                } else if self.elapsed(now) >= self.broker_timeout {
                    self.fail(now, Layer::Broker, LinkError::Timeout);
                }
            }
            ConnectionState::BrokerConnected => {
                let layer = if !self.wifi.is_connected() {
                    Some(Layer::Network)
                } else if !self.broker.is_connected() {
                    Some(Layer::Broker)
                } else {
                    None
                };
                if let Some(layer) = layer {
                    self.stats.drops += 1;
                    self.stats.consecutive_failures = 0;
                    tracing::warn!(?layer, "broker session lost");
                    self.fail(now, layer, LinkError::NotConnected);
                }
            }
        }
        self.state
    }

    /// Publish if the session is up. Never blocks and never fails loudly.
    pub fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
    ) -> bool {
        if !self.is_ready() {
            return false;
        }
        match self.broker.publish(topic, payload) {
            Ok(()) => true,
            Err(error) => {
                tracing::debug!(?error, topic, "publish failed");
                false
            }
        }
    }

    /// Let the broker deliver pending messages to `on_message`. No-op unless ready.
    pub fn service(
        &mut self,
        on_message: &mut dyn FnMut(&str, &[u8]),
    ) {
        if self.is_ready() {
            self.broker.poll(on_message);
        }
    }

    /// Wait applied after the `n`-th consecutive failure.
    pub fn backoff_after(
        &self,
        consecutive_failures: u32,
    ) -> Duration {
        let shift = consecutive_failures
            .saturating_sub(1)
            .min(MAX_BACKOFF_DOUBLINGS);
        let ticks = self.backoff.as_ticks().saturating_mul(1u64 << shift);
        Duration::from_ticks(ticks.min(self.backoff_max.as_ticks()))
    }

    fn elapsed(
        &self,
        now: Instant,
    ) -> Duration {
        now.saturating_duration_since(self.entered_at)
    }

    fn enter(
        &mut self,
        state: ConnectionState,
        now: Instant,
    ) {
        tracing::debug!(from = ?self.state, to = ?state, "link state");
        self.state = state;
        self.entered_at = now;
    }

    fn fail(
        &mut self,
        now: Instant,
        layer: Layer,
        error: LinkError,
    ) {
        match layer {
            Layer::Network => {
                self.broker.disconnect();
                self.wifi.disconnect();
            }
            Layer::Broker => self.broker.disconnect(),
        }
        self.stats.failures += 1;
        self.stats.consecutive_failures += 1;
        let wait = self.backoff_after(self.stats.consecutive_failures);
        self.retry_at = Some(now + wait);
        tracing::warn!(
            ?layer,
            %error,
            from = ?self.state,
            retry_in_ms = wait.as_millis(),
            "link failure, backing off"
        );
        self.state = ConnectionState::Disconnected;
        self.entered_at = now;
    }
}

impl<W, B> Publisher for ConnectivityManager<W, B>
where
    W: WifiLink,
    B: BrokerClient,
{
    fn is_ready(&self) -> bool {
        ConnectivityManager::is_ready(self)
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
    ) -> bool {
        ConnectivityManager::publish(self, topic, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Wifi {
        up: bool,
        refuse: bool,
        begins: u32,
    }

    impl WifiLink for Wifi {
        fn begin(&mut self) -> Result<(), LinkError> {
            self.begins += 1;
            if self.refuse {
                Err(LinkError::Unreachable)
            } else {
                self.up = true;
                Ok(())
            }
        }
        fn is_connected(&self) -> bool {
            self.up
        }
        fn disconnect(&mut self) {
            self.up = false;
        }
    }

    #[derive(Default)]
    struct Broker {
        up: bool,
        subscriptions: u32,
    }

    impl BrokerClient for Broker {
        fn connect(&mut self) -> Result<(), LinkError> {
            self.up = true;
            Ok(())
        }
        fn is_connected(&self) -> bool {
            self.up
        }
        fn disconnect(&mut self) {
            self.up = false;
        }
        fn subscribe(
            &mut self,
            _topic: &str,
        ) -> Result<(), LinkError> {
            self.subscriptions += 1;
            Ok(())
        }
        fn publish(
            &mut self,
            _topic: &str,
            _payload: &[u8],
        ) -> Result<(), LinkError> {
            Ok(())
        }
        fn poll(
            &mut self,
            _on_message: &mut dyn FnMut(&str, &[u8]),
        ) {
        }
    }

    fn ms(v: u64) -> Instant {
        Instant::from_millis(v)
    }

    #[test]
    fn one_transition_per_tick() {
        let mut link = ConnectivityManager::new(
            Wifi::default(),
            Broker::default(),
            &RobotConfig::default(),
        );
        let expected = [
            ConnectionState::NetworkConnecting,
            ConnectionState::NetworkConnected,
            ConnectionState::BrokerConnecting,
            ConnectionState::BrokerConnected,
        ];
        for (i, state) in expected.iter().enumerate() {
            assert_eq!(link.tick(ms(i as u64)), *state);
        }
        assert!(link.is_ready());
        assert_eq!(link.broker().subscriptions, 1);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let link = ConnectivityManager::new(
            Wifi::default(),
            Broker::default(),
            &RobotConfig::default(),
        );
        assert_eq!(link.backoff_after(1), Duration::from_millis(2000));
        assert_eq!(link.backoff_after(2), Duration::from_millis(4000));
        assert_eq!(link.backoff_after(3), Duration::from_millis(8000));
        assert_eq!(link.backoff_after(10), Duration::from_millis(30_000));
        assert_eq!(link.backoff_after(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn publish_is_refused_while_down() {
        let mut link = ConnectivityManager::new(
            Wifi::default(),
            Broker::default(),
            &RobotConfig::default(),
        );
        assert!(!link.publish("iot_car/ultrasonic", b"12.0"));
    }

    #[test]
    fn wifi_timeout_falls_back_to_disconnected() {
        let mut link = ConnectivityManager::new(
            Wifi::default(),
            Broker::default(),
            &RobotConfig::default(),
        );
        assert_eq!(link.tick(ms(0)), ConnectionState::NetworkConnecting);
        link.wifi_mut().up = false;
        assert_eq!(link.tick(ms(9_999)), ConnectionState::NetworkConnecting);
        assert_eq!(link.tick(ms(10_000)), ConnectionState::Disconnected);
        assert_eq!(link.next_attempt_at(), Some(ms(12_000)));
    }
}
