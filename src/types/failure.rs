//! Why an episode ended.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::DeviceFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FailureDescriptor {
    #[serde(rename = "steps/max")]
    MaxStepsReached,
    #[serde(rename = "position/left")]
    PositionLeft,
    #[serde(rename = "position/right")]
    PositionRight,
    #[serde(rename = "angle/left")]
    AngleLeft,
    #[serde(rename = "angle/right")]
    AngleRight,
    #[serde(rename = "imbalance")]
    Imbalance,
}

impl FailureDescriptor {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureDescriptor::MaxStepsReached => "steps/max",
            FailureDescriptor::PositionLeft => "position/left",
            FailureDescriptor::PositionRight => "position/right",
            FailureDescriptor::AngleLeft => "angle/left",
            FailureDescriptor::AngleRight => "angle/right",
            FailureDescriptor::Imbalance => "imbalance",
        }
    }

    /// Truncation rather than failure.
    pub fn is_truncation(self) -> bool {
        self == FailureDescriptor::MaxStepsReached
    }

    /// Failure reported by the controller, if it maps onto a descriptor.
    pub fn from_device(failure: DeviceFailure) -> Option<Self> {
        match failure {
            DeviceFailure::PositionLeft => Some(FailureDescriptor::PositionLeft),
            DeviceFailure::PositionRight => Some(FailureDescriptor::PositionRight),
            DeviceFailure::AngleLeft => Some(FailureDescriptor::AngleLeft),
            DeviceFailure::AngleRight => Some(FailureDescriptor::AngleRight),
            DeviceFailure::Nul | DeviceFailure::Other => None,
        }
    }
}

impl fmt::Display for FailureDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
