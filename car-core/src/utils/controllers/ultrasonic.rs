//! Ultrasonic ranging.
//!
//! `DistanceSource` turns echo timings into `DistanceSample`s. Where the
//! timings come from is an `EchoCapability` chosen at boot: the HC-SR04
//! driver for real hardware, or `MockEcho` for synthetic readings. The control
//! loop only ever sees the `DistanceSource`.

use alloc::{boxed::Box, vec::Vec};
use core::fmt;

use embassy_time::{Duration, Instant};
use embedded_hal::{
    delay::DelayNs,
    digital::{self, Error as _, InputPin, OutputPin},
};
use rand_core::RngCore;

use crate::utils::{
    config::RobotConfig,
    motion::{DistanceSample, Range},
};

/// Speed of sound at ~20°C in cm/us.
pub const SOUND_CM_PER_US: f32 = 0.0343;

/// Convert an echo round-trip time to a one-way distance in centimeters.
pub fn micros_to_cm(echo_us: u32) -> f32 {
    echo_us as f32 * SOUND_CM_PER_US / 2.0
}

/// Round-trip echo time for a target `cm` away.
pub fn cm_to_micros(cm: f32) -> u32 {
    if cm <= 0.0 {
        return 0;
    }
    (cm * 2.0 / SOUND_CM_PER_US) as u32
}

/// Faults of the ranging hardware itself, as opposed to a missing echo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoError {
    Trigger(digital::ErrorKind),
    Echo(digital::ErrorKind),
}

impl fmt::Display for EchoError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            EchoError::Trigger(kind) => write!(f, "trigger pin fault: {kind:?}"),
            EchoError::Echo(kind) => write!(f, "echo pin fault: {kind:?}"),
        }
    }
}

/// The two primitives a ranging device has to offer.
pub trait EchoCapability {
    /// Fire one measurement pulse.
    fn trigger(&mut self) -> Result<(), EchoError>;

    /// Round-trip time of the echo for the last trigger, or `None` if nothing
    /// came back within `timeout_us`.
    fn read_echo_micros(
        &mut self,
        timeout_us: u32,
    ) -> Result<Option<u32>, EchoError>;
}

/// Where the HC-SR04 driver reads the time from.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// The embassy-time driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// HC-SR04 on a trigger output and an echo input.
///
/// Both echo edges are timestamped with the clock while busy-polling the echo
/// line, and one read never waits longer than the timeout in total.
pub struct HcSr04<TRIG, ECHO, D, C = SystemClock> {
    trig: TRIG,
    echo: ECHO,
    delay: D,
    clock: C,
}

impl<TRIG, ECHO, D> HcSr04<TRIG, ECHO, D> {
    pub fn new(
        trig: TRIG,
        echo: ECHO,
        delay: D,
    ) -> Self {
        Self::with_clock(trig, echo, delay, SystemClock)
    }
}

impl<TRIG, ECHO, D, C> HcSr04<TRIG, ECHO, D, C> {
    pub fn with_clock(
        trig: TRIG,
        echo: ECHO,
        delay: D,
        clock: C,
    ) -> Self {
        Self {
            trig,
            echo,
            delay,
            clock,
        }
    }

    pub fn release(self) -> (TRIG, ECHO, D) {
        (self.trig, self.echo, self.delay)
    }
}

impl<TRIG, ECHO, D, C> HcSr04<TRIG, ECHO, D, C>
where
    TRIG: OutputPin,
    ECHO: InputPin,
    D: DelayNs,
    C: Clock,
{
    /// 10us high pulse after a short settle low.
    fn pulse(&mut self) -> Result<(), TRIG::Error> {
        self.trig.set_low()?;
        self.delay.delay_us(2);
        self.trig.set_high()?;
        self.delay.delay_us(10);
        self.trig.set_low()
    }

    /// Poll until the echo line reads `level`. Returns when it did, or `None`
    /// once `deadline` has passed.
    fn wait_for(
        &mut self,
        level: bool,
        deadline: Instant,
    ) -> Result<Option<Instant>, EchoError> {
        loop {
            let high = self
                .echo
                .is_high()
                .map_err(|e| EchoError::Echo(e.kind()))?;
            let now = self.clock.now();
            if high == level {
                return Ok(Some(now));
            }
            if now >= deadline {
                return Ok(None);
            }
        }
    }
}

impl<TRIG, ECHO, D, C> EchoCapability for HcSr04<TRIG, ECHO, D, C>
where
    TRIG: OutputPin,
    ECHO: InputPin,
    D: DelayNs,
    C: Clock,
{
    fn trigger(&mut self) -> Result<(), EchoError> {
        self.pulse().map_err(|e| EchoError::Trigger(e.kind()))
    }

    fn read_echo_micros(
        &mut self,
        timeout_us: u32,
    ) -> Result<Option<u32>, EchoError> {
        let deadline = self.clock.now() + Duration::from_micros(timeout_us as u64);
        let Some(rise) = self.wait_for(true, deadline)? else {
            return Ok(None);
        };
        let Some(fall) = self.wait_for(false, deadline)? else {
            return Ok(None);
        };
        let us = fall.saturating_duration_since(rise).as_micros();
        Ok(Some(u32::try_from(us).unwrap_or(u32::MAX)))
    }
}

/// Synthetic reading patterns for `MockEcho`.
pub enum MockPattern {
    /// Always the same distance.
    Fixed(f32),
    /// Sinusoid around `center_cm`, one full cycle every `period` samples.
    Wave {
        center_cm: f32,
        amplitude_cm: f32,
        period: u32,
    },
    /// Replays the list in a loop. `None` entries are missing echoes.
    Script(Vec<Option<f32>>),
    /// Uniform readings in `[min_cm, max_cm)` drawn from the given generator.
    Random {
        rng: Box<dyn RngCore>,
        min_cm: f32,
        max_cm: f32,
    },
}

/// Echo source that needs no hardware.
pub struct MockEcho {
    pattern: MockPattern,
    step: u32,
    pending: Option<f32>,
}

impl MockEcho {
    pub fn new(pattern: MockPattern) -> Self {
        Self {
            pattern,
            step: 0,
            pending: None,
        }
    }

    fn next_distance(&mut self) -> Option<f32> {
        let step = self.step;
        self.step = self.step.wrapping_add(1);
        match &mut self.pattern {
            MockPattern::Fixed(cm) => Some(*cm),
            MockPattern::Wave {
                center_cm,
                amplitude_cm,
                period,
            } => {
                let period = (*period).max(1);
                let phase = (step % period) as f32 / period as f32;
                let angle = phase * 2.0 * core::f32::consts::PI;
                let cm = *center_cm + *amplitude_cm * libm::sinf(angle);
                Some(cm.max(0.0))
            }
            MockPattern::Script(values) => {
                if values.is_empty() {
                    return None;
                }
                values[step as usize % values.len()]
            }
            MockPattern::Random {
                rng,
                min_cm,
                max_cm,
            } => {
                // 24 bits fit an f32 mantissa exactly, keeping `unit` below 1.0.
                let unit = (rng.next_u32() >> 8) as f32 / (1u32 << 24) as f32;
                Some(*min_cm + unit * (*max_cm - *min_cm))
            }
        }
    }
}

impl EchoCapability for MockEcho {
    fn trigger(&mut self) -> Result<(), EchoError> {
        self.pending = self.next_distance();
        Ok(())
    }

    fn read_echo_micros(
        &mut self,
        timeout_us: u32,
    ) -> Result<Option<u32>, EchoError> {
        let us = self.pending.take().map(cm_to_micros);
        Ok(us.filter(|&us| us <= timeout_us))
    }
}

/// Produces distance samples from whichever echo capability was selected.
pub struct DistanceSource {
    echo: Box<dyn EchoCapability>,
    timeout_us: u32,
    max_range_cm: f32,
}

impl DistanceSource {
    pub fn new(
        echo: Box<dyn EchoCapability>,
        config: &RobotConfig,
    ) -> Self {
        Self {
            echo,
            timeout_us: config.echo_timeout_us,
            max_range_cm: config.max_range_cm,
        }
    }

    /// Take one reading. Blocks for at most the configured echo timeout.
    ///
    /// A hardware fault yields `Range::Fault`, never `NoEcho`.
    pub fn sample(
        &mut self,
        now: Instant,
    ) -> DistanceSample {
        let range = match self.range() {
            Ok(range) => range,
            Err(error) => {
                tracing::warn!(%error, "ultrasonic sensor fault");
                Range::Fault
            }
        };
        tracing::trace!(?range, "distance sample");
        DistanceSample {
            range,
            taken_at: now,
        }
    }

    fn range(&mut self) -> Result<Range, EchoError> {
        self.echo.trigger()?;
        let Some(us) = self.echo.read_echo_micros(self.timeout_us)? else {
            return Ok(Range::NoEcho);
        };
        let cm = micros_to_cm(us);
        if cm > self.max_range_cm {
            Ok(Range::NoEcho)
        } else {
            Ok(Range::Measured(cm))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    struct Counter(u32);

    impl RngCore for Counter {
        fn next_u32(&mut self) -> u32 {
            self.0 = self.0.wrapping_add(0x4000_0000);
            self.0
        }
        fn next_u64(&mut self) -> u64 {
            self.next_u32() as u64
        }
        fn fill_bytes(
            &mut self,
            dst: &mut [u8],
        ) {
            dst.fill(0);
        }
    }

    fn source(pattern: MockPattern) -> DistanceSource {
        DistanceSource::new(Box::new(MockEcho::new(pattern)), &RobotConfig::default())
    }

    #[test]
    fn conversion_matches_speed_of_sound() {
        // 1000us round trip is ~17.15cm.
        assert!((micros_to_cm(1000) - 17.15).abs() < 1e-3);
        let back = micros_to_cm(cm_to_micros(50.0));
        assert!((back - 50.0).abs() < 0.05);
    }

    #[test]
    fn fixed_pattern_round_trips() {
        let mut src = source(MockPattern::Fixed(42.0));
        let cm = src.sample(Instant::from_millis(0)).range.centimeters().unwrap();
        assert!((cm - 42.0).abs() < 0.05);
    }

    #[test]
    fn script_replays_with_no_echo_entries() {
        let mut src = source(MockPattern::Script(vec![Some(15.0), None]));
        let t = Instant::from_millis(0);
        assert!(matches!(src.sample(t).range, Range::Measured(_)));
        assert_eq!(src.sample(t).range, Range::NoEcho);
        assert!(matches!(src.sample(t).range, Range::Measured(_)));
    }

    #[test]
    fn beyond_timeout_is_no_echo() {
        // 30000us timeout is ~514cm, past the 400cm range cap as well.
        let mut src = source(MockPattern::Fixed(600.0));
        assert_eq!(src.sample(Instant::from_millis(0)).range, Range::NoEcho);
    }

    #[test]
    fn beyond_max_range_is_no_echo() {
        let mut src = source(MockPattern::Fixed(450.0));
        assert_eq!(src.sample(Instant::from_millis(0)).range, Range::NoEcho);
    }

    #[test]
    fn wave_stays_within_amplitude() {
        let mut echo = MockEcho::new(MockPattern::Wave {
            center_cm: 60.0,
            amplitude_cm: 40.0,
            period: 8,
        });
        for _ in 0..16 {
            let cm = echo.next_distance().unwrap();
            assert!((19.99..=100.01).contains(&cm), "{cm} out of range");
        }
    }

    #[test]
    fn random_stays_within_bounds() {
        let mut echo = MockEcho::new(MockPattern::Random {
            rng: Box::new(Counter(0)),
            min_cm: 10.0,
            max_cm: 30.0,
        });
        for _ in 0..8 {
            let cm = echo.next_distance().unwrap();
            assert!((10.0..30.0).contains(&cm), "{cm} out of range");
        }
    }

    struct Broken;

    impl EchoCapability for Broken {
        fn trigger(&mut self) -> Result<(), EchoError> {
            Ok(())
        }

        fn read_echo_micros(
            &mut self,
            _timeout_us: u32,
        ) -> Result<Option<u32>, EchoError> {
            Err(EchoError::Echo(digital::ErrorKind::Other))
        }
    }

    #[test]
    fn pin_fault_is_not_no_echo() {
        let mut src = DistanceSource::new(Box::new(Broken), &RobotConfig::default());
        assert_eq!(src.sample(Instant::from_millis(0)).range, Range::Fault);
    }

    #[test]
    fn sample_keeps_timestamp() {
        let mut src = source(MockPattern::Fixed(10.0));
        assert_eq!(src.sample(Instant::from_millis(1234)).taken_at, Instant::from_millis(1234));
    }
}
