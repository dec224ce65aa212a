//! Reward and failure policies.
//!
//! A [`Goal`] decides what an agent is rewarded for and when its episode
//! fails, independently of whether the agent is simulated or physical.

use std::f64::consts::PI;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RigError};
use crate::types::{Bounds, FailureBounds, FailureDescriptor, PhysicalState};

/// Twelve degrees, the classic balance limit.
pub const DEFAULT_FAILURE_ANGLE: f64 = 2.0 * PI * 12.0 / 360.0;

pub trait Goal: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn failure_bounds(&self) -> &FailureBounds;

    fn reward(&self, state: &PhysicalState) -> f64;

    /// Every failure condition that holds in `state`.
    fn check(&self, state: &PhysicalState) -> Vec<FailureDescriptor>;

    /// Clears per-episode bookkeeping.
    fn reset(&mut self) {}

    /// Called once per step after the state has advanced by `tau` seconds.
    fn post_step(&mut self, _state: &PhysicalState, _tau: f64) {}
}

fn position_failures(bounds: &FailureBounds, x: f64, failures: &mut Vec<FailureDescriptor>) {
    if bounds.position.below(x) {
        failures.push(FailureDescriptor::PositionLeft);
    }
    if bounds.position.above(x) {
        failures.push(FailureDescriptor::PositionRight);
    }
}

// An angle below the lower bound means the pole has fallen to the right.
fn angle_failures(bounds: &FailureBounds, theta: f64, failures: &mut Vec<FailureDescriptor>) {
    if bounds.angle.below(theta) {
        failures.push(FailureDescriptor::AngleRight);
    }
    if bounds.angle.above(theta) {
        failures.push(FailureDescriptor::AngleLeft);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceParams {
    pub bounds: FailureBounds,
}

impl Default for BalanceParams {
    fn default() -> Self {
        Self {
            bounds: FailureBounds {
                position: Bounds::symmetric(2.4),
                angle: Bounds::symmetric(DEFAULT_FAILURE_ANGLE),
                ..FailureBounds::default()
            },
        }
    }
}

/// One point per step survived; fails when the cart or the pole leaves its
/// bounds.
#[derive(Debug, Clone)]
pub struct BalanceGoal {
    params: BalanceParams,
}

impl BalanceGoal {
    pub fn new(params: BalanceParams) -> Self {
        Self { params }
    }
}

impl Goal for BalanceGoal {
    fn name(&self) -> &'static str {
        "balance"
    }

    fn failure_bounds(&self) -> &FailureBounds {
        &self.params.bounds
    }

    fn reward(&self, _state: &PhysicalState) -> f64 {
        1.0
    }

    fn check(&self, state: &PhysicalState) -> Vec<FailureDescriptor> {
        let mut failures = Vec::new();
        position_failures(&self.params.bounds, state.x, &mut failures);
        angle_failures(&self.params.bounds, state.theta, &mut failures);
        failures
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwingupParams {
    pub bounds: FailureBounds,
    /// Seconds above the horizon after which dropping below it fails.
    pub time_above_threshold: f64,
    pub punishment_positional_failure: f64,
}

impl Default for SwingupParams {
    fn default() -> Self {
        Self {
            bounds: FailureBounds { position: Bounds::symmetric(10.0), ..FailureBounds::default() },
            time_above_threshold: 10.0,
            punishment_positional_failure: 10_000.0,
        }
    }
}

/// Rewarded for keeping the pole high. Once the pole has spent long enough
/// above the horizon, falling back below it is an imbalance failure.
#[derive(Debug, Clone)]
pub struct SwingupGoal {
    params: SwingupParams,
    time_above_horizon: f64,
}

impl SwingupGoal {
    pub fn new(params: SwingupParams) -> Self {
        Self { params, time_above_horizon: 0.0 }
    }

    pub fn time_above_horizon(&self) -> f64 {
        self.time_above_horizon
    }

    fn above_horizon(theta: f64) -> bool {
        theta.cos() > 0.0
    }
}

impl Goal for SwingupGoal {
    fn name(&self) -> &'static str {
        "swingup"
    }

    fn failure_bounds(&self) -> &FailureBounds {
        &self.params.bounds
    }

    fn reward(&self, state: &PhysicalState) -> f64 {
        if self.params.bounds.position.contains(state.x) {
            ((1.0 + state.theta.cos()) * 2.0).powi(2)
        } else {
            -self.params.punishment_positional_failure
        }
    }

    fn check(&self, state: &PhysicalState) -> Vec<FailureDescriptor> {
        let mut failures = Vec::new();
        position_failures(&self.params.bounds, state.x, &mut failures);
        if self.time_above_horizon >= self.params.time_above_threshold && !Self::above_horizon(state.theta) {
            failures.push(FailureDescriptor::Imbalance);
        }
        failures
    }

    fn reset(&mut self) {
        self.time_above_horizon = 0.0;
    }

    fn post_step(&mut self, state: &PhysicalState, tau: f64) {
        if Self::above_horizon(state.theta) {
            self.time_above_horizon += tau;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PotentialParams {
    pub bounds: FailureBounds,
    /// Track length (m); the reward falls to zero at `±track_length / 2`.
    pub track_length: f64,
}

impl Default for PotentialParams {
    fn default() -> Self {
        Self {
            bounds: FailureBounds {
                position: Bounds::symmetric(0.5),
                angle: Bounds::symmetric(DEFAULT_FAILURE_ANGLE),
                ..FailureBounds::default()
            },
            track_length: 1.0,
        }
    }
}

/// Cosine potential over the track: 1 at the centre, 0 at the ends.
#[derive(Debug, Clone)]
pub struct PotentialGoal {
    params: PotentialParams,
}

impl PotentialGoal {
    pub fn new(params: PotentialParams) -> Self {
        Self { params }
    }
}

impl Goal for PotentialGoal {
    fn name(&self) -> &'static str {
        "potential"
    }

    fn failure_bounds(&self) -> &FailureBounds {
        &self.params.bounds
    }

    fn reward(&self, state: &PhysicalState) -> f64 {
        (PI * state.x / self.params.track_length).cos()
    }

    fn check(&self, state: &PhysicalState) -> Vec<FailureDescriptor> {
        let mut failures = Vec::new();
        position_failures(&self.params.bounds, state.x, &mut failures);
        angle_failures(&self.params.bounds, state.theta, &mut failures);
        failures
    }
}

/// Serialisable goal selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GoalConfig {
    Balance(BalanceParams),
    Swingup(SwingupParams),
    Potential(PotentialParams),
}

impl Default for GoalConfig {
    fn default() -> Self {
        GoalConfig::Balance(BalanceParams::default())
    }
}

impl GoalConfig {
    pub fn bounds(&self) -> &FailureBounds {
        match self {
            GoalConfig::Balance(p) => &p.bounds,
            GoalConfig::Swingup(p) => &p.bounds,
            GoalConfig::Potential(p) => &p.bounds,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.bounds().validate()?;
        match self {
            GoalConfig::Swingup(p) if !(p.time_above_threshold >= 0.0) => Err(RigError::invalid_argument(
                format!("time_above_threshold must be non-negative, got {}", p.time_above_threshold),
            )),
            GoalConfig::Potential(p) if !(p.track_length > 0.0) => Err(RigError::invalid_argument(format!(
                "track_length must be positive, got {}",
                p.track_length
            ))),
            _ => Ok(()),
        }
    }

    pub fn build(&self) -> Result<Box<dyn Goal>> {
        self.validate()?;
        Ok(match *self {
            GoalConfig::Balance(p) => Box::new(BalanceGoal::new(p)),
            GoalConfig::Swingup(p) => Box::new(SwingupGoal::new(p)),
            GoalConfig::Potential(p) => Box::new(PotentialGoal::new(p)),
        })
    }
}
