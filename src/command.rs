// src/command.rs - Motion command model sent to the mobility base
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::config::MAX_MAGNITUDE;

/// Discrete direction bucket for a (forward_back, left_right) pair.
///
/// The numeric codes are part of the downstream wire contract and must not
/// be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum JoystickZone {
    Front = 0,
    FrontLeft = 1,
    FrontRight = 2,
    Left = 3,
    Right = 4,
    BackLeft = 5,
    BackRight = 6,
    Back = 7,
    Origin = 8,
}

impl JoystickZone {
    /// Fixed lookup from the sign of each axis. Negative left_right is left.
    pub fn from_components(forward_back: i32, left_right: i32) -> Self {
        match (forward_back.cmp(&0), left_right.cmp(&0)) {
            (Ordering::Greater, Ordering::Equal) => JoystickZone::Front,
            (Ordering::Greater, Ordering::Less) => JoystickZone::FrontLeft,
            (Ordering::Greater, Ordering::Greater) => JoystickZone::FrontRight,
            (Ordering::Equal, Ordering::Less) => JoystickZone::Left,
            (Ordering::Equal, Ordering::Greater) => JoystickZone::Right,
            (Ordering::Less, Ordering::Less) => JoystickZone::BackLeft,
            (Ordering::Less, Ordering::Greater) => JoystickZone::BackRight,
            (Ordering::Less, Ordering::Equal) => JoystickZone::Back,
            (Ordering::Equal, Ordering::Equal) => JoystickZone::Origin,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<JoystickZone> for u8 {
    fn from(zone: JoystickZone) -> Self {
        zone.code()
    }
}

impl TryFrom<u8> for JoystickZone {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => JoystickZone::Front,
            1 => JoystickZone::FrontLeft,
            2 => JoystickZone::FrontRight,
            3 => JoystickZone::Left,
            4 => JoystickZone::Right,
            5 => JoystickZone::BackLeft,
            6 => JoystickZone::BackRight,
            7 => JoystickZone::Back,
            8 => JoystickZone::Origin,
            other => return Err(format!("unknown joystick zone code {}", other)),
        })
    }
}

/// Who is driving. The downstream arbiter uses this to pick between inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum InputSource {
    RampAssist = 0,
    Remote = 1,
    Wdi = 2,
    ChairVirtual = 3,
    ChairPhysical = 4,
}

impl From<InputSource> for u8 {
    fn from(source: InputSource) -> Self {
        source as u8
    }
}

impl TryFrom<u8> for InputSource {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => InputSource::RampAssist,
            1 => InputSource::Remote,
            2 => InputSource::Wdi,
            3 => InputSource::ChairVirtual,
            4 => InputSource::ChairPhysical,
            other => return Err(format!("unknown input source code {}", other)),
        })
    }
}

/// One joystick-equivalent command. The zone is always derived from the
/// two magnitudes, so `zone == Origin` exactly when both are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MotionCommand {
    forward_back: i32,
    left_right: i32,
    #[serde(rename = "joystick_zone")]
    zone: JoystickZone,
    input_source: InputSource,
}

impl MotionCommand {
    /// Build a remote command, clamping both axes to the fixed range.
    pub fn new(forward_back: i32, left_right: i32) -> Self {
        let forward_back = forward_back.clamp(-MAX_MAGNITUDE, MAX_MAGNITUDE);
        let left_right = left_right.clamp(-MAX_MAGNITUDE, MAX_MAGNITUDE);
        Self {
            forward_back,
            left_right,
            zone: JoystickZone::from_components(forward_back, left_right),
            input_source: InputSource::Remote,
        }
    }

    /// The stop command.
    pub fn origin() -> Self {
        Self::new(0, 0)
    }

    pub fn forward_back(&self) -> i32 {
        self.forward_back
    }

    pub fn left_right(&self) -> i32 {
        self.left_right
    }

    pub fn zone(&self) -> JoystickZone {
        self.zone
    }

    pub fn input_source(&self) -> InputSource {
        self.input_source
    }

    pub fn is_stop(&self) -> bool {
        self.zone == JoystickZone::Origin
    }
}

impl Default for MotionCommand {
    fn default() -> Self {
        Self::origin()
    }
}

/// How a tick's command came about, used for the per-tick log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Back,
    Left,
    Right,
    /// A key arrived but maps to nothing.
    Unknown,
    /// No key arrived within the wait.
    Idle,
}

impl Direction {
    pub fn log_char(self) -> char {
        match self {
            Direction::Forward => 'F',
            Direction::Back => 'B',
            Direction::Left => 'L',
            Direction::Right => 'R',
            Direction::Unknown => '?',
            Direction::Idle => ' ',
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.log_char())
    }
}
