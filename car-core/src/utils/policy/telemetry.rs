//! Periodic distance telemetry.
//!
//! At most one publication per period, best effort. The period is measured
//! from the last successful publish, so a reading that could not go out (link
//! down, publish refused) is dropped rather than queued, and the next tick with
//! a working link sends a fresh one straight away.

use alloc::string::String;
use core::fmt::Write as _;

use embassy_time::{Duration, Instant};

use crate::utils::{
    config::RobotConfig,
    motion::{DistanceSample, Range},
};

/// Payload used when the last reading had no echo.
pub const NO_ECHO_PAYLOAD: &str = "-1";

/// Something telemetry can be published through.
pub trait Publisher {
    fn is_ready(&self) -> bool;

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
    ) -> bool;
}

/// What a single `tick` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryOutcome {
    NotDue,
    /// Due, but there is no usable reading (none taken yet, or a sensor fault).
    NoSample,
    /// Due while the link was down. Nothing was attempted.
    Offline,
    Published,
    /// Due and online, but the publish was refused.
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetryStats {
    pub published: u32,
    /// Periods in which a due reading could not be sent.
    pub dropped: u32,
}

pub struct TelemetryScheduler {
    topic: String,
    period: Duration,
    last_published_at: Option<Instant>,
    last_dropped_at: Option<Instant>,
    stats: TelemetryStats,
}

/// Encode a reading as the telemetry payload: centimeters with one decimal.
pub fn format_payload(sample: &DistanceSample) -> heapless::String<16> {
    let mut out = heapless::String::new();
    match sample.range {
        Range::Measured(cm) => {
            if write!(out, "{cm:.1}").is_err() {
                out.clear();
                let _ = out.push_str(NO_ECHO_PAYLOAD);
            }
        }
        Range::NoEcho | Range::Fault => {
            let _ = out.push_str(NO_ECHO_PAYLOAD);
        }
    }
    out
}

impl TelemetryScheduler {
    pub fn new(config: &RobotConfig) -> Self {
        Self {
            topic: config.telemetry_topic.clone(),
            period: config.telemetry_period(),
            last_published_at: None,
            last_dropped_at: None,
            stats: TelemetryStats::default(),
        }
    }

    pub fn stats(&self) -> TelemetryStats {
        self.stats
    }

    pub fn last_published_at(&self) -> Option<Instant> {
        self.last_published_at
    }

    /// Publish `sample` if a period has elapsed since the last successful
    /// publish. While the link is down this changes nothing but the drop
    /// counter.
    pub fn tick<P: Publisher>(
        &mut self,
        now: Instant,
        sample: Option<&DistanceSample>,
        link: &mut P,
    ) -> TelemetryOutcome {
        let due = self
            .last_published_at
            .is_none_or(|last| now.saturating_duration_since(last) >= self.period);
        if !due {
            return TelemetryOutcome::NotDue;
        }
        let Some(sample) = sample.filter(|s| s.range != Range::Fault) else {
            return TelemetryOutcome::NoSample;
        };

        if !link.is_ready() {
            if self.count_drop(now) {
                tracing::debug!("telemetry dropped, link down");
            }
            return TelemetryOutcome::Offline;
        }

        let payload = format_payload(sample);
        if link.publish(&self.topic, payload.as_bytes()) {
            self.stats.published += 1;
            self.last_published_at = Some(now);
            self.last_dropped_at = None;
            tracing::trace!(topic = %self.topic, payload = %payload, "telemetry published");
            TelemetryOutcome::Published
        } else {
            if self.count_drop(now) {
                tracing::warn!(topic = %self.topic, "telemetry publish refused");
            }
            TelemetryOutcome::Failed
        }
    }

    /// Count a missed reading at most once per period. Returns whether it
    /// was counted.
    fn count_drop(
        &mut self,
        now: Instant,
    ) -> bool {
        let fresh = self
            .last_dropped_at
            .is_none_or(|last| now.saturating_duration_since(last) >= self.period);
        if fresh {
            self.stats.dropped += 1;
            self.last_dropped_at = Some(now);
        }
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::{string::ToString, vec::Vec};

    #[derive(Default)]
    struct Sink {
        ready: bool,
        refuse: bool,
        sent: Vec<(String, String)>,
    }

    impl Publisher for Sink {
        fn is_ready(&self) -> bool {
            self.ready
        }
        fn publish(
            &mut self,
            topic: &str,
            payload: &[u8],
        ) -> bool {
            if self.refuse {
                return false;
            }
            self.sent.push((
                topic.to_string(),
                String::from_utf8(payload.to_vec()).unwrap(),
            ));
            true
        }
    }

    fn ms(v: u64) -> Instant {
        Instant::from_millis(v)
    }

    #[test]
    fn payload_format() {
        assert_eq!(format_payload(&DistanceSample::measured(23.44, ms(0))), "23.4");
        assert_eq!(format_payload(&DistanceSample::no_echo(ms(0))), "-1");
    }

    #[test]
    fn publishes_once_per_period() {
        let mut sched = TelemetryScheduler::new(&RobotConfig::default());
        let mut sink = Sink {
            ready: true,
            ..Sink::default()
        };
        let sample = DistanceSample::measured(50.0, ms(0));
        let mut published = 0;
        for t in (0..=3000).step_by(20) {
            if sched.tick(ms(t), Some(&sample), &mut sink) == TelemetryOutcome::Published {
                published += 1;
            }
        }
        // Slots at 0, 1000, 2000 and 3000.
        assert_eq!(published, 4);
        assert_eq!(sink.sent[0], ("iot_car/ultrasonic".to_string(), "50.0".to_string()));
    }

    #[test]
    fn nothing_is_sent_while_offline() {
        let mut sched = TelemetryScheduler::new(&RobotConfig::default());
        let mut sink = Sink::default();
        let sample = DistanceSample::measured(50.0, ms(0));
        assert_eq!(sched.tick(ms(0), Some(&sample), &mut sink), TelemetryOutcome::Offline);
        assert_eq!(sched.tick(ms(500), Some(&sample), &mut sink), TelemetryOutcome::Offline);
        assert_eq!(sched.tick(ms(1000), Some(&sample), &mut sink), TelemetryOutcome::Offline);
        assert!(sink.sent.is_empty());
        assert_eq!(sched.last_published_at(), None);
        // Counted once per period, not once per tick.
        assert_eq!(sched.stats().dropped, 2);
    }

    #[test]
    fn reconnect_publishes_right_away() {
        let mut sched = TelemetryScheduler::new(&RobotConfig::default());
        let mut sink = Sink::default();
        let sample = DistanceSample::measured(33.0, ms(0));
        assert_eq!(sched.tick(ms(0), Some(&sample), &mut sink), TelemetryOutcome::Offline);

        sink.ready = true;
        assert_eq!(sched.tick(ms(10), Some(&sample), &mut sink), TelemetryOutcome::Published);
        assert_eq!(sched.last_published_at(), Some(ms(10)));
        assert_eq!(sched.tick(ms(990), Some(&sample), &mut sink), TelemetryOutcome::NotDue);
        assert_eq!(sched.tick(ms(1010), Some(&sample), &mut sink), TelemetryOutcome::Published);
        assert_eq!(sink.sent.len(), 2);
    }

    #[test]
    fn refused_publish_is_retried() {
        let mut sched = TelemetryScheduler::new(&RobotConfig::default());
        let mut sink = Sink {
            ready: true,
            refuse: true,
            ..Sink::default()
        };
        let sample = DistanceSample::measured(33.0, ms(0));
        assert_eq!(sched.tick(ms(0), Some(&sample), &mut sink), TelemetryOutcome::Failed);
        sink.refuse = false;
        assert_eq!(sched.tick(ms(10), Some(&sample), &mut sink), TelemetryOutcome::Published);
        assert_eq!(sched.stats(), TelemetryStats { published: 1, dropped: 1 });
    }

    #[test]
    fn sensor_fault_is_not_published() {
        let mut sched = TelemetryScheduler::new(&RobotConfig::default());
        let mut sink = Sink {
            ready: true,
            ..Sink::default()
        };
        let fault = DistanceSample::fault(ms(0));
        assert_eq!(sched.tick(ms(0), Some(&fault), &mut sink), TelemetryOutcome::NoSample);
        let sample = DistanceSample::no_echo(ms(60));
        assert_eq!(sched.tick(ms(60), Some(&sample), &mut sink), TelemetryOutcome::Published);
        assert_eq!(sink.sent[0].1, "-1");
    }

    #[test]
    fn waits_for_first_sample() {
        let mut sched = TelemetryScheduler::new(&RobotConfig::default());
        let mut sink = Sink {
            ready: true,
            ..Sink::default()
        };
        assert_eq!(sched.tick(ms(0), None, &mut sink), TelemetryOutcome::NoSample);
        let sample = DistanceSample::measured(12.0, ms(60));
        assert_eq!(sched.tick(ms(60), Some(&sample), &mut sink), TelemetryOutcome::Published);
    }
}
