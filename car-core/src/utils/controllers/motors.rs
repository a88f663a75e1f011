//! Differential drive through an L298N dual H-bridge.
//!
//! Each motor channel has two direction inputs and one PWM enable. A
//! `MotionIntent` maps to one `(Rotation, duty)` pair per wheel; turns are
//! skid-steer with the wheels spinning in opposite directions.

use core::fmt;

use embedded_hal::{
    digital::{self, Error as _, OutputPin},
    pwm::{self, Error as _, SetDutyCycle},
};

use crate::utils::motion::{Direction, MotionIntent};

/// Hardware faults raised while driving the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveError {
    Pin(digital::ErrorKind),
    Pwm(pwm::ErrorKind),
}

impl fmt::Display for DriveError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            DriveError::Pin(kind) => write!(f, "direction pin fault: {kind:?}"),
            DriveError::Pwm(kind) => write!(f, "pwm fault: {kind:?}"),
        }
    }
}

/// Anything that can turn a motion intent into wheel motion.
pub trait Drive {
    fn drive(
        &mut self,
        intent: MotionIntent,
    ) -> Result<(), DriveError>;
}

/// Spin direction of a single wheel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Forward,
    Reverse,
    /// Both direction inputs low, motor free-wheels.
    Coast,
}

/// Per-wheel command: rotation and 8-bit duty (0..=255).
pub type WheelCommand = (Rotation, u8);

/// Map an intent to `(left, right)` wheel commands, clamping speed to `max_speed`.
pub fn wheel_commands(
    intent: MotionIntent,
    max_speed: u8,
) -> (WheelCommand, WheelCommand) {
    let duty = intent.speed.min(max_speed);
    match intent.direction {
        Direction::Forward => ((Rotation::Forward, duty), (Rotation::Forward, duty)),
        Direction::Backward => ((Rotation::Reverse, duty), (Rotation::Reverse, duty)),
        Direction::Left => ((Rotation::Reverse, duty), (Rotation::Forward, duty)),
        Direction::Right => ((Rotation::Forward, duty), (Rotation::Reverse, duty)),
        Direction::Stop => ((Rotation::Coast, 0), (Rotation::Coast, 0)),
    }
}

/// One half of the bridge: two direction inputs plus the PWM enable.
pub struct MotorChannel<A, B, EN> {
    in_a: A,
    in_b: B,
    enable: EN,
}

impl<A, B, EN> MotorChannel<A, B, EN>
where
    A: OutputPin,
    B: OutputPin,
    EN: SetDutyCycle,
{
    pub fn new(
        in_a: A,
        in_b: B,
        enable: EN,
    ) -> Self {
        Self { in_a, in_b, enable }
    }

    pub fn set(
        &mut self,
        (rotation, duty): WheelCommand,
    ) -> Result<(), DriveError> {
        let (a_high, b_high) = match rotation {
            Rotation::Forward => (true, false),
            Rotation::Reverse => (false, true),
            Rotation::Coast => (false, false),
        };
        let duty = if rotation == Rotation::Coast { 0 } else { duty };

        self.in_a
            .set_state(a_high.into())
            .map_err(|e| DriveError::Pin(e.kind()))?;
        self.in_b
            .set_state(b_high.into())
            .map_err(|e| DriveError::Pin(e.kind()))?;
        self.enable
            .set_duty_cycle_fraction(duty as u16, u8::MAX as u16)
            .map_err(|e| DriveError::Pwm(e.kind()))
    }

    pub fn release(self) -> (A, B, EN) {
        (self.in_a, self.in_b, self.enable)
    }
}

/// L298N driving a left and a right motor.
///
/// Identical consecutive intents simply re-assert the same pin levels and duty.
pub struct L298n<LA, LB, LEN, RA, RB, REN> {
    left: MotorChannel<LA, LB, LEN>,
    right: MotorChannel<RA, RB, REN>,
    max_speed: u8,
}

impl<LA, LB, LEN, RA, RB, REN> L298n<LA, LB, LEN, RA, RB, REN>
where
    LA: OutputPin,
    LB: OutputPin,
    LEN: SetDutyCycle,
    RA: OutputPin,
    RB: OutputPin,
    REN: SetDutyCycle,
{
    pub fn new(
        left: MotorChannel<LA, LB, LEN>,
        right: MotorChannel<RA, RB, REN>,
        max_speed: u8,
    ) -> Self {
        Self {
            left,
            right,
            max_speed,
        }
    }

    pub fn release(self) -> (MotorChannel<LA, LB, LEN>, MotorChannel<RA, RB, REN>) {
        (self.left, self.right)
    }
}

impl<LA, LB, LEN, RA, RB, REN> Drive for L298n<LA, LB, LEN, RA, RB, REN>
where
    LA: OutputPin,
    LB: OutputPin,
    LEN: SetDutyCycle,
    RA: OutputPin,
    RB: OutputPin,
    REN: SetDutyCycle,
{
    fn drive(
        &mut self,
        intent: MotionIntent,
    ) -> Result<(), DriveError> {
        let (left, right) = wheel_commands(intent, self.max_speed);
        self.left.set(left)?;
        self.right.set(right)
    }
}
