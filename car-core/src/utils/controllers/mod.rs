//! Module Exports
//!
//! This file exports the hardware-facing controllers and the control loop that
//! ties them together.
//!
//! - `motors`: L298N differential drive.
//! - `ultrasonic`: HC-SR04 driver, synthetic echo source and `DistanceSource`.

/// Module for driving the two DC motors.
pub mod motors;
pub mod ultrasonic;

use embassy_time::{Duration, Instant};

pub use motors::{Drive, DriveError, L298n, MotorChannel};
pub use ultrasonic::{DistanceSource, EchoCapability, EchoError, HcSr04, MockEcho, MockPattern};

use crate::utils::{
    config::RobotConfig,
    connection::{BrokerClient, CommandDecoder, ConnectivityManager, DecodeError, WifiLink},
    motion::{DistanceSample, MotionIntent, Range},
    policy::{
        telemetry::{TelemetryOutcome, TelemetryStats},
        SafetyInterlock, TelemetryScheduler,
    },
};

/// Counters for things the loop handled without stopping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub iterations: u32,
    pub commands_accepted: u32,
    pub decode_errors: u32,
    /// Iterations where the interlock replaced the desired intent.
    pub interlock_engagements: u32,
    pub motor_faults: u32,
    /// Sensor readings that came back as `Range::Fault`.
    pub sensor_faults: u32,
}

/// Result of one pass through the loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    pub desired: MotionIntent,
    pub effective: MotionIntent,
    pub link_ready: bool,
    pub telemetry: TelemetryOutcome,
}

/// The vehicle control loop.
///
/// Everything runs on the caller's thread: `step` services the link, applies
/// any new command, samples the distance sensor when due, runs the interlock,
/// drives the motors and lets telemetry publish. The desired intent (last good
/// command) and the effective intent (what the motors get) are kept apart;
/// the motors only ever see the effective one.
pub struct Coordinator<W, B, M> {
    link: ConnectivityManager<W, B>,
    decoder: CommandDecoder,
    sensor: DistanceSource,
    interlock: SafetyInterlock,
    motors: M,
    telemetry: TelemetryScheduler,
    sensor_period: Duration,
    next_sample_at: Option<Instant>,
    desired: MotionIntent,
    effective: MotionIntent,
    latest: Option<DistanceSample>,
    was_ready: bool,
    stats: LoopStats,
}

impl<W, B, M> Coordinator<W, B, M>
where
    W: WifiLink,
    B: BrokerClient,
    M: Drive,
{
    pub fn new(
        wifi: W,
        broker: B,
        sensor: DistanceSource,
        motors: M,
        config: &RobotConfig,
    ) -> Self {
        Self {
            link: ConnectivityManager::new(wifi, broker, config),
            decoder: CommandDecoder::new(config),
            sensor,
            interlock: SafetyInterlock::new(config),
            motors,
            telemetry: TelemetryScheduler::new(config),
            sensor_period: config.sensor_poll_period(),
            next_sample_at: None,
            desired: MotionIntent::STOP,
            effective: MotionIntent::STOP,
            latest: None,
            was_ready: false,
            stats: LoopStats::default(),
        }
    }

    pub fn desired(&self) -> MotionIntent {
        self.desired
    }

    pub fn effective(&self) -> MotionIntent {
        self.effective
    }

    pub fn latest_sample(&self) -> Option<DistanceSample> {
        self.latest
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn telemetry_stats(&self) -> TelemetryStats {
        self.telemetry.stats()
    }

    pub fn link(&self) -> &ConnectivityManager<W, B> {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut ConnectivityManager<W, B> {
        &mut self.link
    }

    pub fn motors(&self) -> &M {
        &self.motors
    }

    /// Run one loop iteration at time `now`.
    pub fn step(
        &mut self,
        now: Instant,
    ) -> StepReport {
        self.stats.iterations = self.stats.iterations.wrapping_add(1);

        self.link.tick(now);
        let ready = self.link.is_ready();
        if self.was_ready && !ready {
            // A reconnect must not resume a command issued before the drop.
            tracing::warn!("link lost, clearing desired intent");
            self.desired = MotionIntent::STOP;
        }
        self.was_ready = ready;

        self.receive_commands();

        if self.next_sample_at.is_none_or(|at| now >= at) {
            let sample = self.sensor.sample(now);
            if sample.range == Range::Fault {
                self.stats.sensor_faults += 1;
            }
            self.latest = Some(sample);
            self.next_sample_at = Some(now + self.sensor_period);
        }

        let effective = self.resolve_effective(ready);
        if effective != self.effective {
            tracing::info!(
                desired = ?self.desired,
                effective = ?effective,
                "effective intent changed"
            );
        }
        self.effective = effective;
        if let Err(error) = self.motors.drive(effective) {
            self.stats.motor_faults += 1;
            tracing::error!(%error, "motor drive failed");
        }

        let telemetry = self.telemetry.tick(now, self.latest.as_ref(), &mut self.link);

        StepReport {
            desired: self.desired,
            effective,
            link_ready: ready,
            telemetry,
        }
    }

    /// Decode everything the broker delivered this iteration. Rejected
    /// payloads leave the desired intent as it was.
    fn receive_commands(&mut self) {
        let decoder = &self.decoder;
        let desired = &mut self.desired;
        let stats = &mut self.stats;
        self.link
            .service(&mut |topic, payload| match decoder.decode(topic, payload) {
                Ok(intent) => {
                    stats.commands_accepted += 1;
                    tracing::debug!(?intent, "command accepted");
                    *desired = intent;
                }
                Err(error) => {
                    stats.decode_errors += 1;
                    log_rejection(error, topic, payload);
                }
            });
    }

    fn resolve_effective(
        &mut self,
        ready: bool,
    ) -> MotionIntent {
        if !ready {
            return MotionIntent::STOP;
        }
        let Some(sample) = self.latest.as_ref() else {
            return self.desired;
        };
        let effective = self.interlock.apply(self.desired, sample);
        if effective != self.desired {
            self.stats.interlock_engagements += 1;
            if self.effective == self.desired {
                tracing::warn!(
                    range = ?sample.range,
                    threshold_cm = self.interlock.threshold_cm(),
                    "obstacle ahead, forward motion suppressed"
                );
            }
        }
        effective
    }
}

fn log_rejection(
    error: DecodeError,
    topic: &str,
    payload: &[u8],
) {
    match core::str::from_utf8(payload) {
        Ok(text) => tracing::warn!(%error, topic, payload = text, "command rejected"),
        Err(_) => tracing::warn!(%error, topic, len = payload.len(), "command rejected"),
    }
}
