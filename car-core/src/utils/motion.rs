//! Motion intents and distance samples.
//!
//! These are the values passed between the sensor, the interlock, the motor
//! driver and telemetry. All of them are small `Copy` values that get replaced
//! wholesale rather than mutated in place.

use embassy_time::Instant;

/// Requested direction of travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
    /// Skid-steer turn in place to the left.
    Left,
    /// Skid-steer turn in place to the right.
    Right,
    Stop,
}

/// Direction plus speed. `speed` never exceeds the `max_speed` it was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionIntent {
    pub direction: Direction,
    pub speed: u8,
}

impl MotionIntent {
    /// Full stop, zero duty on both motors.
    pub const STOP: MotionIntent = MotionIntent {
        direction: Direction::Stop,
        speed: 0,
    };

    /// Build an intent with `speed` clamped to `max_speed`.
    ///
    /// `Stop` always carries a speed of zero.
    pub fn new(
        direction: Direction,
        speed: u32,
        max_speed: u8,
    ) -> Self {
        if direction == Direction::Stop {
            return Self::STOP;
        }
        let speed = speed.min(max_speed as u32) as u8;
        Self { direction, speed }
    }
}

impl Default for MotionIntent {
    fn default() -> Self {
        Self::STOP
    }
}

/// Outcome of a single ultrasonic ranging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Range {
    /// Distance to the nearest reflecting surface in centimeters.
    Measured(f32),
    /// No echo came back within the timeout. Means "nothing in range".
    NoEcho,
    /// The sensor itself misbehaved (pin error). Nothing is known about the
    /// path ahead.
    Fault,
}

impl Range {
    pub fn centimeters(&self) -> Option<f32> {
        match *self {
            Range::Measured(cm) => Some(cm),
            Range::NoEcho | Range::Fault => None,
        }
    }
}

/// The latest distance reading together with when it was taken.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceSample {
    pub range: Range,
    pub taken_at: Instant,
}

impl DistanceSample {
    pub fn measured(
        cm: f32,
        taken_at: Instant,
    ) -> Self {
        Self {
            range: Range::Measured(cm),
            taken_at,
        }
    }

    pub fn no_echo(taken_at: Instant) -> Self {
        Self {
            range: Range::NoEcho,
            taken_at,
        }
    }

    pub fn fault(taken_at: Instant) -> Self {
        Self {
            range: Range::Fault,
            taken_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_is_clamped_to_max() {
        let intent = MotionIntent::new(Direction::Forward, 900, 200);
        assert_eq!(intent.speed, 200);
    }

    #[test]
    fn stop_discards_speed() {
        let intent = MotionIntent::new(Direction::Stop, 120, 255);
        assert_eq!(intent, MotionIntent::STOP);
    }

    #[test]
    fn no_echo_has_no_centimeters() {
        assert_eq!(Range::NoEcho.centimeters(), None);
        assert_eq!(Range::Fault.centimeters(), None);
        assert_eq!(Range::Measured(12.5).centimeters(), Some(12.5));
    }
}
