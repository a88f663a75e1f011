//! Simulated peripherals for running the car core on a host.

use std::{collections::VecDeque, convert::Infallible};

use car_core::utils::{
    connection::{BrokerClient, LinkError, WifiLink},
    Duration, Instant,
};
use embedded_hal::{
    digital::{ErrorType as PinErrorType, OutputPin},
    pwm::{ErrorType as PwmErrorType, SetDutyCycle},
};
use tracing::{debug, info, trace, warn};

/// WiFi station that associates a fixed time after `begin`.
pub struct SimWifi {
    ssid: String,
    password: String,
    assoc_delay: Duration,
    started_at: Option<Instant>,
}

impl SimWifi {
    pub fn new(
        ssid: String,
        password: String,
        assoc_delay: Duration,
    ) -> Self {
        Self {
            ssid,
            password,
            assoc_delay,
            started_at: None,
        }
    }
}

impl WifiLink for SimWifi {
    fn begin(&mut self) -> Result<(), LinkError> {
        info!(ssid = %self.ssid, open = self.password.is_empty(), "associating");
        self.started_at = Some(Instant::now());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.started_at
            .is_some_and(|t| Instant::now().saturating_duration_since(t) >= self.assoc_delay)
    }

    fn disconnect(&mut self) {
        self.started_at = None;
    }
}

/// Broker that replays a command script and drops the session periodically.
pub struct SimBroker {
    endpoint: String,
    client_id: String,
    script: Vec<String>,
    command_topic: Option<String>,
    command_interval: Duration,
    drop_every: Option<Duration>,
    session_start: Option<Instant>,
    next_command_at: Option<Instant>,
    cursor: usize,
    inbox: VecDeque<(String, Vec<u8>)>,
}

impl SimBroker {
    pub fn new(
        endpoint: String,
        client_id: String,
        script: Vec<String>,
        command_interval: Duration,
        drop_every: Option<Duration>,
    ) -> Self {
        Self {
            endpoint,
            client_id,
            script,
            command_topic: None,
            command_interval,
            drop_every,
            session_start: None,
            next_command_at: None,
            cursor: 0,
            inbox: VecDeque::new(),
        }
    }

    fn enqueue_due_commands(&mut self) {
        let (Some(topic), Some(due)) = (self.command_topic.as_ref(), self.next_command_at) else {
            return;
        };
        if self.script.is_empty() || Instant::now() < due {
            return;
        }
        let payload = &self.script[self.cursor % self.script.len()];
        debug!(%payload, "operator sends command");
        self.inbox
            .push_back((topic.clone(), payload.as_bytes().to_vec()));
        self.cursor += 1;
        self.next_command_at = Some(due + self.command_interval);
    }
}

impl BrokerClient for SimBroker {
    fn connect(&mut self) -> Result<(), LinkError> {
        info!(endpoint = %self.endpoint, client_id = %self.client_id, "broker session opened");
        self.session_start = Some(Instant::now());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        match (self.session_start, self.drop_every) {
            (Some(start), Some(every)) => Instant::now().saturating_duration_since(start) < every,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    fn disconnect(&mut self) {
        if self.session_start.take().is_some() {
            warn!(endpoint = %self.endpoint, "broker session closed");
        }
        self.command_topic = None;
        self.inbox.clear();
    }

    fn subscribe(
        &mut self,
        topic: &str,
    ) -> Result<(), LinkError> {
        if self.session_start.is_none() {
            return Err(LinkError::NotConnected);
        }
        info!(topic, "subscribed");
        self.command_topic = Some(topic.to_string());
        self.next_command_at
            .get_or_insert_with(|| Instant::now() + self.command_interval);
        Ok(())
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
    ) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        info!(topic, payload = %String::from_utf8_lossy(payload), "publish");
        Ok(())
    }

    fn poll(
        &mut self,
        on_message: &mut dyn FnMut(&str, &[u8]),
    ) {
        self.enqueue_due_commands();
        while let Some((topic, payload)) = self.inbox.pop_front() {
            on_message(&topic, &payload);
        }
    }
}

/// Direction input of the H-bridge, logged instead of driven.
pub struct LogPin {
    name: &'static str,
    high: bool,
}

impl LogPin {
    pub fn new(
        name: &'static str,
        gpio: u8,
    ) -> Self {
        debug!(name, gpio, "pin assigned");
        Self { name, high: false }
    }

    fn write(
        &mut self,
        high: bool,
    ) {
        if self.high != high {
            trace!(pin = self.name, high, "pin");
        }
        self.high = high;
    }
}

impl PinErrorType for LogPin {
    type Error = Infallible;
}

impl OutputPin for LogPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write(true);
        Ok(())
    }
}

/// PWM enable of the H-bridge with an 8-bit range, logged on change.
pub struct LogPwm {
    name: &'static str,
    duty: u16,
}

impl LogPwm {
    pub fn new(
        name: &'static str,
        gpio: u8,
    ) -> Self {
        debug!(name, gpio, "pwm assigned");
        Self { name, duty: 0 }
    }
}

impl PwmErrorType for LogPwm {
    type Error = Infallible;
}

impl SetDutyCycle for LogPwm {
    fn max_duty_cycle(&self) -> u16 {
        255
    }

    fn set_duty_cycle(
        &mut self,
        duty: u16,
    ) -> Result<(), Self::Error> {
        if self.duty != duty {
            debug!(pwm = self.name, duty, "duty");
        }
        self.duty = duty;
        Ok(())
    }
}
