//! Simulated plant: the integrator plus a randomised start state.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RigError};
use crate::integration::{CartpoleParams, Integrator, IntegratorConfig};
use crate::types::{Action, Bounds, FailureBounds, PhysicalState};

/// Where an agent's state comes from.
pub trait Plant: Send + std::fmt::Debug {
    /// Current ground truth, if any has been established.
    fn state(&self) -> Option<PhysicalState>;
}

/// Uniform distribution `mean ± spread`, clipped to the failure bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Spread {
    pub mean: f64,
    pub spread: f64,
}

impl Default for Spread {
    fn default() -> Self {
        Self { mean: 0.0, spread: 0.05 }
    }
}

impl Spread {
    pub fn fixed(value: f64) -> Self {
        Self { mean: value, spread: 0.0 }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, bounds: &Bounds, name: &str) -> Result<f64> {
        if !(self.mean.is_finite() && self.spread.is_finite() && self.spread >= 0.0) {
            return Err(RigError::invalid_argument(format!(
                "{name} start {} ± {} is not a valid distribution",
                self.mean, self.spread
            )));
        }
        let low = (self.mean - self.spread).max(bounds.min);
        let high = (self.mean + self.spread).min(bounds.max);
        if low > high {
            return Err(RigError::invalid_argument(format!(
                "{name} start {} ± {} lies outside [{}, {}]",
                self.mean, self.spread, bounds.min, bounds.max
            )));
        }
        Ok(rng.gen_range(low..=high))
    }
}

/// Start-state distribution for each dimension.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StartDistribution {
    pub position: Spread,
    pub position_velocity: Spread,
    pub angle: Spread,
    pub angle_velocity: Spread,
}

impl StartDistribution {
    /// Every dimension starts exactly at `state`.
    pub fn at(state: PhysicalState) -> Self {
        Self {
            position: Spread::fixed(state.x),
            position_velocity: Spread::fixed(state.x_dot),
            angle: Spread::fixed(state.theta),
            angle_velocity: Spread::fixed(state.theta_dot),
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, bounds: &FailureBounds) -> Result<PhysicalState> {
        Ok(PhysicalState {
            x: self.position.sample(rng, &bounds.position, "position")?,
            x_dot: self.position_velocity.sample(rng, &bounds.position_velocity, "position velocity")?,
            theta: self.angle.sample(rng, &bounds.angle, "angle")?,
            theta_dot: self.angle_velocity.sample(rng, &bounds.angle_velocity, "angle velocity")?,
        })
    }
}

/// Everything needed to simulate one cart-pole.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParams {
    #[serde(flatten)]
    pub physics: CartpoleParams,
    pub start: StartDistribution,
    /// Magnitude of the force applied by either action (N).
    pub force_magnitude: f64,
    pub integrator: IntegratorConfig,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            physics: CartpoleParams::default(),
            start: StartDistribution::default(),
            force_magnitude: 100.0,
            integrator: IntegratorConfig::default(),
        }
    }
}

impl SimulationParams {
    pub fn validate(&self) -> Result<()> {
        self.physics.validate()?;
        if !(self.force_magnitude.is_finite() && self.force_magnitude >= 0.0) {
            return Err(RigError::invalid_argument(format!(
                "force_magnitude must be non-negative, got {}",
                self.force_magnitude
            )));
        }
        if self.integrator.resolution == 0 {
            return Err(RigError::invalid_argument("integration resolution must be at least 1"));
        }
        Ok(())
    }
}

/// Integrates the equations of motion for each action.
#[derive(Debug)]
pub struct SimulatedPlant {
    integrator: Integrator,
    start: StartDistribution,
    force_magnitude: f64,
    rng: ChaCha8Rng,
    state: Option<PhysicalState>,
}

impl SimulatedPlant {
    pub fn new(params: SimulationParams, seed: Option<u64>) -> Result<Self> {
        params.validate()?;
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Ok(Self {
            integrator: Integrator::with_config(params.physics, params.integrator)?,
            start: params.start,
            force_magnitude: params.force_magnitude,
            rng,
            state: None,
        })
    }

    pub fn integrator(&self) -> &Integrator {
        &self.integrator
    }

    pub fn force_magnitude(&self) -> f64 {
        self.force_magnitude
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    /// Samples a new start state and clears the friction context.
    pub fn reset(&mut self, bounds: &FailureBounds) -> Result<PhysicalState> {
        let state = self.start.sample(&mut self.rng, bounds)?;
        self.integrator.reset();
        self.state = Some(state);
        Ok(state)
    }

    /// Applies `action` for `tau` seconds.
    pub fn advance(&mut self, action: Action, tau: f64) -> Result<PhysicalState> {
        let state = self.state.ok_or_else(|| RigError::invalid_argument("simulated plant stepped before reset"))?;
        let force = action.sign() * self.force_magnitude;
        let next = self.integrator.step(&state, force, tau)?;
        self.state = Some(next);
        Ok(next)
    }

    /// Overrides the current state.
    pub fn set_state(&mut self, state: PhysicalState) {
        self.state = Some(state);
    }
}

impl Plant for SimulatedPlant {
    fn state(&self) -> Option<PhysicalState> {
        self.state
    }
}
