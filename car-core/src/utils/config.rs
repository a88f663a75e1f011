//! Robot configuration.
//!
//! Everything the firmware needs to know about its environment lives in one
//! `RobotConfig`, resolved once at boot and handed to each component by
//! reference. Nothing mutates it afterwards.

use alloc::string::{String, ToString};
use core::fmt;

use embassy_time::Duration;
use serde::Deserialize;

/// Where distance readings come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorMode {
    /// Synthetic readings, no hardware needed.
    Mock,
    /// HC-SR04 on the configured trigger/echo pins.
    Real,
}

/// GPIO assignments for the L298N bridge and the HC-SR04.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PinMap {
    /// PWM enable, right motor.
    pub ena: u8,
    /// PWM enable, left motor.
    pub enb: u8,
    pub in1: u8,
    pub in2: u8,
    pub in3: u8,
    pub in4: u8,
    pub trig: u8,
    /// Must be level-shifted down to 3.3V.
    pub echo: u8,
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            ena: 13,
            enb: 12,
            in1: 14,
            in2: 27,
            in3: 26,
            in4: 25,
            trig: 35,
            echo: 34,
        }
    }
}

/// Boot-time configuration for every component of the control loop.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    pub wifi_ssid: String,
    pub wifi_password: String,
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    /// Inbound movement commands.
    pub command_topic: String,
    /// Outbound distance readings. Must differ from `command_topic`.
    pub telemetry_topic: String,
    pub pins: PinMap,
    pub sensor_mode: SensorMode,
    pub telemetry_period_ms: u64,
    pub sensor_poll_ms: u64,
    pub echo_timeout_us: u32,
    /// Readings farther than this are reported as no echo.
    pub max_range_cm: f32,
    pub obstacle_threshold_cm: f32,
    pub max_speed: u8,
    /// Speed used when a command carries no explicit speed.
    pub default_speed: u8,
    pub reconnect_backoff_ms: u64,
    pub reconnect_backoff_max_ms: u64,
    pub wifi_connect_timeout_ms: u64,
    pub broker_connect_timeout_ms: u64,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_password: String::new(),
            broker_host: "broker.hivemq.com".to_string(),
            broker_port: 1883,
            client_id: "iot_car".to_string(),
            command_topic: "iot_car/commands".to_string(),
            telemetry_topic: "iot_car/ultrasonic".to_string(),
            pins: PinMap::default(),
            sensor_mode: SensorMode::Mock,
            telemetry_period_ms: 1000,
            sensor_poll_ms: 60,
            echo_timeout_us: 30_000,
            max_range_cm: 400.0,
            obstacle_threshold_cm: 20.0,
            max_speed: 255,
            default_speed: 200,
            reconnect_backoff_ms: 2000,
            reconnect_backoff_max_ms: 30_000,
            wifi_connect_timeout_ms: 10_000,
            broker_connect_timeout_ms: 5000,
        }
    }
}

/// Reasons a configuration is refused at boot.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The JSON document could not be parsed.
    Parse(String),
    /// A period, timeout or backoff was zero.
    ZeroInterval(&'static str),
    DefaultSpeedAboveMax { default_speed: u8, max_speed: u8 },
    BackoffCapBelowInitial,
    EmptyTopic(&'static str),
    /// Commands and telemetry would loop back into each other.
    SharedTopic,
    InvalidThreshold,
}

impl fmt::Display for ConfigError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            ConfigError::Parse(msg) => write!(f, "invalid config document: {msg}"),
            ConfigError::ZeroInterval(field) => write!(f, "{field} must be non-zero"),
            ConfigError::DefaultSpeedAboveMax {
                default_speed,
                max_speed,
            } => write!(
                f,
                "default_speed {default_speed} exceeds max_speed {max_speed}"
            ),
            ConfigError::BackoffCapBelowInitial => {
                write!(f, "reconnect_backoff_max_ms is below reconnect_backoff_ms")
            }
            ConfigError::EmptyTopic(field) => write!(f, "{field} is empty"),
            ConfigError::SharedTopic => {
                write!(f, "command_topic and telemetry_topic must differ")
            }
            ConfigError::InvalidThreshold => {
                write!(f, "obstacle_threshold_cm and max_range_cm must be positive")
            }
        }
    }
}

impl RobotConfig {
    /// Parse a JSON document, filling missing fields from `Default`, and validate it.
    pub fn from_json(doc: &str) -> Result<Self, ConfigError> {
        let config: RobotConfig =
            serde_json::from_str(doc).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("telemetry_period_ms", self.telemetry_period_ms),
            ("sensor_poll_ms", self.sensor_poll_ms),
            ("echo_timeout_us", self.echo_timeout_us as u64),
            ("reconnect_backoff_ms", self.reconnect_backoff_ms),
            ("wifi_connect_timeout_ms", self.wifi_connect_timeout_ms),
            ("broker_connect_timeout_ms", self.broker_connect_timeout_ms),
        ];
        if let Some((field, _)) = intervals.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::ZeroInterval(*field));
        }
        if self.reconnect_backoff_max_ms < self.reconnect_backoff_ms {
            return Err(ConfigError::BackoffCapBelowInitial);
        }
        if self.default_speed > self.max_speed {
            return Err(ConfigError::DefaultSpeedAboveMax {
                default_speed: self.default_speed,
                max_speed: self.max_speed,
            });
        }
        if self.command_topic.is_empty() {
            return Err(ConfigError::EmptyTopic("command_topic"));
        }
        if self.telemetry_topic.is_empty() {
            return Err(ConfigError::EmptyTopic("telemetry_topic"));
        }
        if self.command_topic == self.telemetry_topic {
            return Err(ConfigError::SharedTopic);
        }
        if !(self.obstacle_threshold_cm > 0.0) || !(self.max_range_cm > 0.0) {
            return Err(ConfigError::InvalidThreshold);
        }
        Ok(())
    }

    pub fn telemetry_period(&self) -> Duration {
        Duration::from_millis(self.telemetry_period_ms)
    }

    pub fn sensor_poll_period(&self) -> Duration {
        Duration::from_millis(self.sensor_poll_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn reconnect_backoff_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_max_ms)
    }

    pub fn wifi_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.wifi_connect_timeout_ms)
    }

    pub fn broker_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.broker_connect_timeout_ms)
    }
}
