//! Cart-pole equations of motion with Coulomb friction.
//!
//! Follows Florian, "Correct equations for the dynamics of the cart-pole
//! system" (2007). The pole is a rigid rod of uniform density, forces act
//! parallel to the track, and both the cart-track and the pole-hinge
//! friction coefficients are constant.
//!
//! The cart's friction force points against `sgn(N_c · ẋ)`, where the normal
//! force `N_c` itself depends on the angular acceleration being solved for.
//! [`evaluate`] therefore solves with the previous call's normal force, and
//! re-solves once with the new sign if it flipped. The normal force is
//! carried between calls in a [`FrictionContext`].

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, RigError};
use crate::types::PhysicalState;

/// Maximum number of solves per evaluation. A sign flip on the last pass is
/// a numerical error.
pub const MAX_PASSES: u32 = 2;

/// Physical constants of one cart-pole.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CartpoleParams {
    /// Gravitational acceleration (m/s²)
    pub gravity: f64,
    /// Cart mass (kg)
    pub mass_cart: f64,
    /// Pole mass (kg)
    pub mass_pole: f64,
    /// Cart-track friction coefficient
    pub friction_cart: f64,
    /// Pole-hinge friction coefficient
    pub friction_pole: f64,
    /// Half the pole length (m)
    pub pole_length: f64,
}

impl Default for CartpoleParams {
    fn default() -> Self {
        Self {
            gravity: 9.8,
            mass_cart: 5.0,
            mass_pole: 0.1,
            friction_cart: 0.01,
            friction_pole: 0.001,
            pole_length: 1.0,
        }
    }
}

impl CartpoleParams {
    /// Cart plus pole.
    pub fn total_mass(&self) -> f64 {
        self.mass_cart + self.mass_pole
    }

    /// Pole mass times pole length.
    pub fn mass_length(&self) -> f64 {
        self.mass_pole * self.pole_length
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("gravity", self.gravity),
            ("mass_cart", self.mass_cart),
            ("mass_pole", self.mass_pole),
            ("pole_length", self.pole_length),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(RigError::invalid_argument(format!("{name} must be positive, got {value}")));
            }
        }
        for (name, value) in [("friction_cart", self.friction_cart), ("friction_pole", self.friction_pole)] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(RigError::invalid_argument(format!("{name} must be non-negative, got {value}")));
            }
        }
        Ok(())
    }
}

/// Normal force remembered between evaluations.
///
/// Must be reset at the start of every episode.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrictionContext {
    pub last_normal_force: f64,
}

impl FrictionContext {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Result of one derivative evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// `[ẋ, ẍ, θ̇, θ̈]`
    pub derivatives: [f64; 4],
    pub context: FrictionContext,
    /// Solves needed, `1..=MAX_PASSES`.
    pub passes: u32,
}

/// Sign function with `sgn(0) == 0`. NaN maps to zero.
pub fn sgn(value: f64) -> f64 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Normal force of the track on the cart.
pub fn normal_force(params: &CartpoleParams, theta: f64, theta_dot: f64, theta_ddot: f64) -> f64 {
    params.gravity * params.total_mass()
        - params.mass_length() * (theta_ddot * theta.sin() + theta_dot.powi(2) * theta.cos())
}

/// One solve of the accelerations given a remembered normal force.
///
/// Returns the derivatives and the normal force they imply.
fn solve(params: &CartpoleParams, state: &PhysicalState, force: f64, last_normal_force: f64) -> ([f64; 4], f64) {
    let g = params.gravity;
    let m = params.total_mass();
    let ml = params.mass_length();
    let PhysicalState { x_dot, theta, theta_dot, .. } = *state;
    let (sin, cos) = theta.sin_cos();

    let alpha = params.friction_cart * sgn(last_normal_force * x_dot);

    let numerator = g * sin + cos * ((-force - ml * theta_dot.powi(2) * (sin + alpha * cos)) / m + g * alpha)
        - params.friction_pole * theta_dot / ml;
    let denominator = params.pole_length * (4.0 / 3.0 - (params.mass_pole * cos / m) * (cos - alpha));
    let theta_ddot = numerator / denominator;

    let new_normal_force = normal_force(params, theta, theta_dot, theta_ddot);
    let x_ddot = (force + ml * (theta_dot.powi(2) * sin - theta_ddot * cos) - new_normal_force * alpha) / m;

    ([x_dot, x_ddot, theta_dot, theta_ddot], new_normal_force)
}

/// Derivatives of `state` under `force`, re-solving once on a normal-force
/// sign flip.
///
/// A flip is only counted when the remembered normal force is non-zero, so
/// the first evaluation of an episode never re-solves.
pub fn evaluate(
    params: &CartpoleParams,
    state: &PhysicalState,
    force: f64,
    context: FrictionContext,
) -> Result<Evaluation> {
    let mut last = context.last_normal_force;
    for passes in 1..=MAX_PASSES {
        let (derivatives, normal) = solve(params, state, force, last);
        let flipped = last != 0.0 && sgn(last) != sgn(normal);
        if !flipped {
            return Ok(Evaluation {
                derivatives,
                context: FrictionContext { last_normal_force: normal },
                passes,
            });
        }
        debug!(previous = last, normal, pass = passes, "Normal force changed sign, re-solving");
        last = normal;
    }
    Err(RigError::numerical(format!(
        "cart normal force still changing sign after {MAX_PASSES} passes; increase the cart mass"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn florian() -> CartpoleParams {
        CartpoleParams {
            gravity: 9.8,
            mass_cart: 1.0,
            mass_pole: 0.1,
            friction_cart: 0.01,
            friction_pole: 0.001,
            pole_length: 1.0,
        }
    }

    #[test]
    fn sign_of_zero_is_zero() {
        assert_eq!(sgn(0.0), 0.0);
        assert_eq!(sgn(-0.0), 0.0);
        assert_eq!(sgn(3.0), 1.0);
        assert_eq!(sgn(-3.0), -1.0);
        assert_eq!(sgn(f64::NAN), 0.0);
    }

    #[test]
    fn upright_at_rest_is_an_equilibrium() {
        let eval = evaluate(&florian(), &PhysicalState::default(), 0.0, FrictionContext::default()).unwrap();
        assert_eq!(eval.derivatives, [0.0; 4]);
        assert_eq!(eval.passes, 1);
        let expected = 9.8 * 1.1;
        assert!((eval.context.last_normal_force - expected).abs() < 1e-12);
    }

    #[test]
    fn sign_flip_resolves_in_two_passes() {
        let context = FrictionContext { last_normal_force: -1.0 };
        let state = PhysicalState::new(0.0, 0.5, 0.0, 0.0);
        let eval = evaluate(&florian(), &state, 0.0, context).unwrap();
        assert_eq!(eval.passes, 2);
        assert!(eval.context.last_normal_force > 0.0);

        // The second pass uses the new sign: friction opposes the motion.
        assert!(eval.derivatives[1] < 0.0);
    }

    #[test]
    fn steady_sign_needs_one_pass() {
        let context = FrictionContext { last_normal_force: 10.0 };
        let state = PhysicalState::new(0.0, 0.5, 0.1, -0.2);
        let eval = evaluate(&florian(), &state, 10.0, context).unwrap();
        assert_eq!(eval.passes, 1);
    }

    #[test]
    fn pushing_right_accelerates_cart_right_and_tips_pole_left() {
        let eval = evaluate(&florian(), &PhysicalState::default(), 10.0, FrictionContext::default()).unwrap();
        assert!(eval.derivatives[1] > 0.0);
        assert!(eval.derivatives[3] < 0.0);
    }

    #[test]
    fn mirrored_state_gives_mirrored_derivatives() {
        let params = CartpoleParams { friction_cart: 0.0, friction_pole: 0.0, ..florian() };
        let state = PhysicalState::new(0.3, 0.2, 0.1, 0.4);
        let mirrored = PhysicalState::new(-0.3, -0.2, -0.1, -0.4);
        let a = evaluate(&params, &state, 5.0, FrictionContext::default()).unwrap();
        let b = evaluate(&params, &mirrored, -5.0, FrictionContext::default()).unwrap();
        for (lhs, rhs) in a.derivatives.iter().zip(b.derivatives) {
            assert!((lhs + rhs).abs() < 1e-12, "{lhs} vs {rhs}");
        }
    }

    #[test]
    fn invalid_params_are_rejected() {
        assert!(florian().validate().is_ok());
        assert!(CartpoleParams { mass_cart: 0.0, ..florian() }.validate().is_err());
        assert!(CartpoleParams { pole_length: -1.0, ..florian() }.validate().is_err());
        assert!(CartpoleParams { friction_cart: -0.1, ..florian() }.validate().is_err());
        assert!(CartpoleParams { gravity: f64::NAN, ..florian() }.validate().is_err());
    }
}
