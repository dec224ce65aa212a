//! Wire-level constants shared with the controller firmware.

use serde::{Deserialize, Serialize};

use crate::codec::{DecodeError, Format};

/// Marker the controller prints at the end of its boot output.
pub const BOOT_TERMINATOR: &[u8] = b"END OF INITIALISATION\n";

/// Marker the controller emits after a realignment request.
pub const REALIGN_MARKER: &[u8] = b"=*= Please realign packets here =*=";

/// Info message the limit finder sends once both limits are known.
pub const LIMIT_FINDING_DONE: &str = "LimitFinder: NOW DONE";

/// Baud rate the controller firmware is built with.
pub const DEFAULT_BAUD_RATE: u32 = 74_880;

/// Arithmetic applied by a set-position / set-velocity command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SetOperation {
    Subtract,
    Equal,
    Add,
    Nul,
}

impl SetOperation {
    pub const fn as_char(self) -> char {
        match self {
            SetOperation::Subtract => '-',
            SetOperation::Equal => '=',
            SetOperation::Add => '+',
            SetOperation::Nul => '0',
        }
    }

    pub fn from_char(c: char) -> Result<Self, DecodeError> {
        match c {
            '-' => Ok(SetOperation::Subtract),
            '=' => Ok(SetOperation::Equal),
            '+' => Ok(SetOperation::Add),
            '0' => Ok(SetOperation::Nul),
            other => Err(DecodeError::InvalidEnum { kind: "set operation", value: other }),
        }
    }
}

/// Identifies one carriage on the rig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum CartId {
    One = 1,
    Two = 2,
}

impl CartId {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for CartId {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(CartId::One),
            2 => Ok(CartId::Two),
            other => Err(DecodeError::UnknownSpecifier { kind: "cart id", value: other }),
        }
    }
}

impl From<CartId> for u8 {
    fn from(cart: CartId) -> u8 {
        cart.as_u8()
    }
}

impl std::fmt::Display for CartId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cart {}", self.as_u8())
    }
}

/// Failure reason reported by the controller when an experiment ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceFailure {
    Nul,
    PositionLeft,
    PositionRight,
    AngleLeft,
    AngleRight,
    Other,
}

impl DeviceFailure {
    pub const fn code(self) -> i8 {
        match self {
            DeviceFailure::Nul => 0,
            DeviceFailure::PositionLeft => -1,
            DeviceFailure::PositionRight => 1,
            DeviceFailure::AngleLeft => -2,
            DeviceFailure::AngleRight => 2,
            DeviceFailure::Other => 127,
        }
    }

    pub fn from_code(code: i8) -> Result<Self, DecodeError> {
        match code {
            0 => Ok(DeviceFailure::Nul),
            -1 => Ok(DeviceFailure::PositionLeft),
            1 => Ok(DeviceFailure::PositionRight),
            -2 => Ok(DeviceFailure::AngleLeft),
            2 => Ok(DeviceFailure::AngleRight),
            127 => Ok(DeviceFailure::Other),
            other => Err(DecodeError::UnknownSpecifier { kind: "failure mode", value: other as u8 }),
        }
    }
}

/// What an experiment-info packet is reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfoSpecifier {
    TrackLengthSteps,
    PositionDrift,
    AngleDrift,
}

impl InfoSpecifier {
    pub const fn code(self) -> u8 {
        match self {
            InfoSpecifier::TrackLengthSteps => 0x00,
            InfoSpecifier::PositionDrift => 0x01,
            InfoSpecifier::AngleDrift => 0x02,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, DecodeError> {
        match code {
            0x00 => Ok(InfoSpecifier::TrackLengthSteps),
            0x01 => Ok(InfoSpecifier::PositionDrift),
            0x02 => Ok(InfoSpecifier::AngleDrift),
            other => Err(DecodeError::UnknownSpecifier { kind: "experiment info", value: other }),
        }
    }

    /// Wire format of the value that follows this specifier.
    pub const fn format(self) -> Format {
        match self {
            InfoSpecifier::TrackLengthSteps | InfoSpecifier::PositionDrift => Format::Int32,
            InfoSpecifier::AngleDrift => Format::Float32,
        }
    }
}
