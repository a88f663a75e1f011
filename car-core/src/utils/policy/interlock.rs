//! Obstacle interlock.
//!
//! Forward motion is replaced by `Stop` while the latest reading is closer than
//! the obstacle threshold. Every other direction passes through, since backing
//! away or turning is how the robot gets out of trouble.
//!
//! A missing echo does not engage the interlock: the HC-SR04 reports no echo
//! when nothing is within range, so it is read as a clear path. A sensor
//! fault is the opposite case: nothing is known, so forward stays blocked.

use crate::utils::{
    config::RobotConfig,
    motion::{Direction, DistanceSample, MotionIntent, Range},
};

#[derive(Debug, Clone, Copy)]
pub struct SafetyInterlock {
    threshold_cm: f32,
}

impl SafetyInterlock {
    pub fn new(config: &RobotConfig) -> Self {
        Self {
            threshold_cm: config.obstacle_threshold_cm,
        }
    }

    pub fn threshold_cm(&self) -> f32 {
        self.threshold_cm
    }

    /// True if `sample` blocks forward motion.
    pub fn is_blocked(
        &self,
        sample: &DistanceSample,
    ) -> bool {
        match sample.range {
            Range::Measured(cm) => cm < self.threshold_cm,
            Range::NoEcho => false,
            Range::Fault => true,
        }
    }

    /// Intent that may actually reach the motors.
    pub fn apply(
        &self,
        desired: MotionIntent,
        sample: &DistanceSample,
    ) -> MotionIntent {
        if desired.direction == Direction::Forward && self.is_blocked(sample) {
            MotionIntent::STOP
        } else {
            desired
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_time::Instant;

    fn interlock() -> SafetyInterlock {
        SafetyInterlock::new(&RobotConfig::default())
    }

    fn at(cm: f32) -> DistanceSample {
        DistanceSample::measured(cm, Instant::from_millis(0))
    }

    #[test]
    fn close_obstacle_stops_forward() {
        let desired = MotionIntent::new(Direction::Forward, 200, 255);
        assert_eq!(interlock().apply(desired, &at(15.0)), MotionIntent::STOP);
    }

    #[test]
    fn clear_path_keeps_forward_speed() {
        let desired = MotionIntent::new(Direction::Forward, 170, 255);
        assert_eq!(interlock().apply(desired, &at(25.0)), desired);
    }

    #[test]
    fn threshold_itself_is_clear() {
        let desired = MotionIntent::new(Direction::Forward, 170, 255);
        assert_eq!(interlock().apply(desired, &at(20.0)), desired);
    }

    #[test]
    fn other_directions_pass_through() {
        for direction in [
            Direction::Backward,
            Direction::Left,
            Direction::Right,
            Direction::Stop,
        ] {
            let desired = MotionIntent::new(direction, 120, 255);
            for cm in [0.0, 5.0, 19.9, 20.0, 300.0] {
                assert_eq!(interlock().apply(desired, &at(cm)), desired);
            }
        }
    }

    #[test]
    fn no_echo_never_engages() {
        let desired = MotionIntent::new(Direction::Forward, 255, 255);
        let sample = DistanceSample::no_echo(Instant::from_millis(0));
        assert_eq!(interlock().apply(desired, &sample), desired);
    }

    #[test]
    fn sensor_fault_blocks_forward_only() {
        let sample = DistanceSample::fault(Instant::from_millis(0));
        let forward = MotionIntent::new(Direction::Forward, 200, 255);
        assert_eq!(interlock().apply(forward, &sample), MotionIntent::STOP);
        let back = MotionIntent::new(Direction::Backward, 200, 255);
        assert_eq!(interlock().apply(back, &sample), back);
    }
}
