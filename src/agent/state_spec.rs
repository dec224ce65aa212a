//! What an agent gets to see of its physical state.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{FailureBounds, Observation, ObservationSpace, PhysicalState};

/// Projects ground truth into observations.
pub trait StateSpec: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// One label per observation dimension.
    fn labels(&self) -> &'static [&'static str];

    fn externalize(&self, state: &PhysicalState) -> Observation;

    /// Twice the failure bounds, so failing observations still lie inside.
    fn observation_space(&self, bounds: &FailureBounds) -> ObservationSpace;
}

/// Position, velocity, angle and angular velocity.
#[derive(Debug, Clone, Copy, Default)]
pub struct TotalKnowledge;

impl StateSpec for TotalKnowledge {
    fn name(&self) -> &'static str {
        "total_knowledge"
    }

    fn labels(&self) -> &'static [&'static str] {
        &["x", "dx", "theta", "dtheta"]
    }

    fn externalize(&self, state: &PhysicalState) -> Observation {
        Observation::new(state.to_array().to_vec())
    }

    fn observation_space(&self, bounds: &FailureBounds) -> ObservationSpace {
        let position = bounds.position.scaled(2.0);
        let angle = bounds.angle.scaled(2.0);
        ObservationSpace::new(
            vec![position.min, -f64::MAX, angle.min, -f64::MAX],
            vec![position.max, f64::MAX, angle.max, f64::MAX],
        )
    }
}

/// Position and angle only. A single observation does not determine the
/// system; use it with frame stacking.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionalKnowledge;

impl StateSpec for PositionalKnowledge {
    fn name(&self) -> &'static str {
        "positional_knowledge"
    }

    fn labels(&self) -> &'static [&'static str] {
        &["x", "theta"]
    }

    fn externalize(&self, state: &PhysicalState) -> Observation {
        Observation::new(vec![state.x, state.theta])
    }

    fn observation_space(&self, bounds: &FailureBounds) -> ObservationSpace {
        let position = bounds.position.scaled(2.0);
        let angle = bounds.angle.scaled(2.0);
        ObservationSpace::new(vec![position.min, angle.min], vec![position.max, angle.max])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateSpecKind {
    #[default]
    TotalKnowledge,
    PositionalKnowledge,
}

impl StateSpecKind {
    pub fn build(self) -> Box<dyn StateSpec> {
        match self {
            StateSpecKind::TotalKnowledge => Box::new(TotalKnowledge),
            StateSpecKind::PositionalKnowledge => Box::new(PositionalKnowledge),
        }
    }
}
