//! Command decoding.
//!
//! Turns a raw `(topic, payload)` pair from the broker into a `MotionIntent`.
//! Two payload shapes are understood:
//!
//! - plain tokens: `forward`, `left 120`, `b:90`, `STOP` (optional speed after
//!   a space, `:` or `,`)
//! - JSON: `{"cmd": "forward", "speed": 150}`
//!
//! Decoding is pure. A rejected payload never touches the caller's current
//! intent; it is up to the caller to keep the last good command.

use alloc::string::String;
use core::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::utils::{
    config::RobotConfig,
    motion::{Direction, MotionIntent},
};

/// Why a command payload was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Not a known command word (or not UTF-8 at all).
    Unrecognized,
    /// Known command word with a speed that is not a non-negative integer.
    InvalidSpeed,
    /// Message arrived on a topic other than the command topic.
    UnexpectedTopic,
}

impl fmt::Display for DecodeError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let msg = match self {
            DecodeError::Unrecognized => "unrecognized command",
            DecodeError::InvalidSpeed => "invalid speed",
            DecodeError::UnexpectedTopic => "message on unexpected topic",
        };
        f.write_str(msg)
    }
}

/// JSON form of a command, e.g. `{"cmd":"left","speed":90}`. The speed is
/// kept loose so a wrongly typed speed is reported as such.
#[derive(Debug, Deserialize)]
struct JsonCommand {
    cmd: String,
    #[serde(default)]
    speed: Option<Value>,
}

pub struct CommandDecoder {
    topic: String,
    default_speed: u8,
    max_speed: u8,
}

impl CommandDecoder {
    pub fn new(config: &RobotConfig) -> Self {
        Self {
            topic: config.command_topic.clone(),
            default_speed: config.default_speed,
            max_speed: config.max_speed,
        }
    }

    /// Decode one inbound message.
    pub fn decode(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Result<MotionIntent, DecodeError> {
        if topic != self.topic {
            return Err(DecodeError::UnexpectedTopic);
        }
        let text = core::str::from_utf8(payload).map_err(|_| DecodeError::Unrecognized)?;
        let text = text.trim();
        if text.starts_with('{') {
            return self.decode_json(text);
        }

        let (word, speed) = match text.find([' ', ':', ',']) {
            Some(idx) => (&text[..idx], Some(text[idx + 1..].trim())),
            None => (text, None),
        };
        let direction = parse_direction(word).ok_or(DecodeError::Unrecognized)?;
        let speed = match speed {
            Some(raw) => parse_speed(raw)?,
            None => self.default_speed as u32,
        };
        Ok(MotionIntent::new(direction, speed, self.max_speed))
    }

    fn decode_json(
        &self,
        text: &str,
    ) -> Result<MotionIntent, DecodeError> {
        let cmd: JsonCommand =
            serde_json::from_str(text).map_err(|_| DecodeError::Unrecognized)?;
        let direction = parse_direction(cmd.cmd.trim()).ok_or(DecodeError::Unrecognized)?;
        let speed = match cmd.speed {
            Some(Value::Number(n)) => json_speed(&n)?,
            Some(_) => return Err(DecodeError::InvalidSpeed),
            None => self.default_speed as u32,
        };
        Ok(MotionIntent::new(direction, speed, self.max_speed))
    }
}

/// Decimal speed token. Anything too large for a `u32` saturates; the
/// intent clamps it to the configured maximum afterwards.
fn parse_speed(raw: &str) -> Result<u32, DecodeError> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DecodeError::InvalidSpeed);
    }
    Ok(raw.parse::<u32>().unwrap_or(u32::MAX))
}

/// Non-negative JSON number, integer or not. Fractions are truncated.
fn json_speed(n: &serde_json::Number) -> Result<u32, DecodeError> {
    if let Some(v) = n.as_u64() {
        return Ok(u32::try_from(v).unwrap_or(u32::MAX));
    }
    match n.as_f64() {
        Some(v) if v >= 0.0 => Ok(v as u32),
        _ => Err(DecodeError::InvalidSpeed),
    }
}

fn parse_direction(word: &str) -> Option<Direction> {
    const WORDS: [(&str, Direction); 13] = [
        ("forward", Direction::Forward),
        ("fwd", Direction::Forward),
        ("f", Direction::Forward),
        ("backward", Direction::Backward),
        ("back", Direction::Backward),
        ("reverse", Direction::Backward),
        ("b", Direction::Backward),
        ("left", Direction::Left),
        ("l", Direction::Left),
        ("right", Direction::Right),
        ("r", Direction::Right),
        ("stop", Direction::Stop),
        ("s", Direction::Stop),
    ];
    WORDS
        .iter()
        .find(|(w, _)| w.eq_ignore_ascii_case(word))
        .map(|&(_, d)| d)
}
