//! Numerical integration of the cart-pole dynamics.
//!
//! [`equations::evaluate`] is the pure derivative function;
//! [`Integrator`] owns the friction context between control steps and
//! advances a [`PhysicalState`] by one timestep with the configured
//! [`Method`].
//!
//! ```rust
//! use cartpole_rig::integration::{CartpoleParams, Integrator, Method};
//! use cartpole_rig::types::PhysicalState;
//!
//! let mut integrator = Integrator::new(CartpoleParams::default(), Method::Rk45, 10).unwrap();
//! let next = integrator.step(&PhysicalState::default(), 10.0, 0.02).unwrap();
//! assert!(next.x_dot > 0.0);
//! ```

pub mod equations;
pub mod solver;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{Result, RigError};
use crate::types::PhysicalState;

pub use equations::{CartpoleParams, Evaluation, FrictionContext, MAX_PASSES, evaluate};
pub use solver::{Method, Solution, Tolerances};

/// Solver settings for one agent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorConfig {
    pub method: Method,
    /// Substeps per control step (RK4), or the bound on the step size
    /// `tau / resolution` (RK45).
    pub resolution: u32,
    pub tolerances: Tolerances,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        Self { method: Method::Rk45, resolution: 100, tolerances: Tolerances::default() }
    }
}

/// Advances one cart-pole through control steps.
#[derive(Debug, Clone)]
pub struct Integrator {
    params: CartpoleParams,
    config: IntegratorConfig,
    context: FrictionContext,
    passes: u64,
    evaluations: u64,
}

impl Integrator {
    pub fn new(params: CartpoleParams, method: Method, resolution: u32) -> Result<Self> {
        Self::with_config(params, IntegratorConfig { method, resolution, ..IntegratorConfig::default() })
    }

    pub fn with_config(params: CartpoleParams, config: IntegratorConfig) -> Result<Self> {
        params.validate()?;
        if config.resolution == 0 {
            return Err(RigError::invalid_argument("integration resolution must be at least 1"));
        }
        Ok(Self { params, config, context: FrictionContext::default(), passes: 0, evaluations: 0 })
    }

    pub fn params(&self) -> &CartpoleParams {
        &self.params
    }

    pub fn config(&self) -> &IntegratorConfig {
        &self.config
    }

    pub fn context(&self) -> FrictionContext {
        self.context
    }

    /// Clears the friction context. Call at the start of every episode.
    pub fn reset(&mut self) {
        self.context.reset();
        self.passes = 0;
        self.evaluations = 0;
    }

    /// Mean solves per derivative evaluation since the last reset.
    pub fn mean_passes(&self) -> f64 {
        if self.evaluations == 0 { 0.0 } else { self.passes as f64 / self.evaluations as f64 }
    }

    /// State after applying `force` for `tau` seconds.
    ///
    /// The result is not checked for finiteness; callers validate it.
    pub fn step(&mut self, state: &PhysicalState, force: f64, tau: f64) -> Result<PhysicalState> {
        let params = self.params;
        let context = &mut self.context;
        let passes = &mut self.passes;
        let evaluations = &mut self.evaluations;
        let rhs = |_t: f64, y: &[f64; 4]| -> Result<[f64; 4]> {
            let eval = evaluate(&params, &PhysicalState::from_array(*y), force, *context)?;
            *context = eval.context;
            *passes += u64::from(eval.passes);
            *evaluations += 1;
            Ok(eval.derivatives)
        };

        let y0 = state.to_array();
        let y = match self.config.method {
            Method::Rk4 => solver::rk4(rhs, y0, tau, self.config.resolution)?,
            Method::Rk45 => {
                let max_step = tau / f64::from(self.config.resolution);
                let solution = solver::rk45(rhs, y0, tau, max_step, self.config.tolerances)?;
                trace!(accepted = solution.accepted, rejected = solution.rejected, "RK45 step");
                solution.state
            }
        };
        Ok(PhysicalState::from_array(y))
    }
}
