//! Per-step results and experiment lifecycle.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{FailureDescriptor, Observation};

/// Diagnostics attached to a step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    /// Steps taken in the episode so far.
    pub steps: u64,
    /// Every failure condition that held after this step.
    pub failures: Vec<FailureDescriptor>,
    /// Set when the episode was already over before this step.
    pub frozen: bool,
    pub action_interval: Option<Duration>,
    pub action_frequency: Option<f64>,
    pub observation_interval: Option<Duration>,
}

impl StepInfo {
    /// Ended by the step limit alone.
    pub fn truncated(&self) -> bool {
        !self.failures.is_empty() && self.failures.iter().all(|f| f.is_truncation())
    }

    /// Ended by at least one genuine failure.
    pub fn terminated(&self) -> bool {
        self.failures.iter().any(|f| !f.is_truncation())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub observation: Observation,
    pub reward: f64,
    pub done: bool,
    pub info: StepInfo,
}

/// Lifecycle of a physical-rig experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentState {
    #[default]
    Starting,
    Resetting,
    Running,
    Ending,
    Ended,
}

impl ExperimentState {
    /// Observation gaps are expected while the rig is being reset or stopped.
    pub fn tolerates_gaps(self) -> bool {
        matches!(self, ExperimentState::Resetting | ExperimentState::Ending)
    }
}

impl fmt::Display for ExperimentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExperimentState::Starting => "starting",
            ExperimentState::Resetting => "resetting",
            ExperimentState::Running => "running",
            ExperimentState::Ending => "ending",
            ExperimentState::Ended => "ended",
        };
        f.write_str(name)
    }
}
