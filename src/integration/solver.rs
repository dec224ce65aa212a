//! Explicit Runge-Kutta solvers over fixed-size state vectors.
//!
//! The right-hand side may carry state between calls (the friction context
//! does), so it is taken as `FnMut` and may fail.

use serde::{Deserialize, Serialize};

use crate::error::{Result, RigError};

/// Integration scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Dormand-Prince 5(4) with adaptive step size.
    #[default]
    Rk45,
    /// Classic fourth order with a fixed number of substeps.
    Rk4,
}

/// Error tolerances for adaptive methods.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerances {
    pub rtol: f64,
    pub atol: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self { rtol: 1e-3, atol: 1e-6 }
    }
}

/// Work done by one adaptive solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Solution<const N: usize> {
    pub state: [f64; N],
    pub accepted: u32,
    pub rejected: u32,
}

const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 10.0;
const MAX_STEPS: u32 = 100_000;

// Dormand-Prince tableau.
const C: [f64; 6] = [1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0];
const A2: [f64; 1] = [1.0 / 5.0];
const A3: [f64; 2] = [3.0 / 40.0, 9.0 / 40.0];
const A4: [f64; 3] = [44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0];
const A5: [f64; 4] = [19372.0 / 6561.0, -25360.0 / 2187.0, 64448.0 / 6561.0, -212.0 / 729.0];
const A6: [f64; 5] = [9017.0 / 3168.0, -355.0 / 33.0, 46732.0 / 5247.0, 49.0 / 176.0, -5103.0 / 18656.0];
const B: [f64; 6] = [35.0 / 384.0, 0.0, 500.0 / 1113.0, 125.0 / 192.0, -2187.0 / 6784.0, 11.0 / 84.0];
const E: [f64; 7] = [
    71.0 / 57600.0,
    0.0,
    -71.0 / 16695.0,
    71.0 / 1920.0,
    -17253.0 / 339200.0,
    22.0 / 525.0,
    -1.0 / 40.0,
];

/// `y + h · Σ aᵢ kᵢ`
fn combine<const N: usize>(y: &[f64; N], h: f64, coefficients: &[f64], k: &[[f64; N]]) -> [f64; N] {
    let mut out = *y;
    for (a, ki) in coefficients.iter().zip(k) {
        for (o, kij) in out.iter_mut().zip(ki) {
            *o += h * a * kij;
        }
    }
    out
}

/// Integrates from `t = 0` to `t_end` in `steps` equal RK4 steps.
pub fn rk4<const N: usize, F>(mut f: F, y0: [f64; N], t_end: f64, steps: u32) -> Result<[f64; N]>
where
    F: FnMut(f64, &[f64; N]) -> Result<[f64; N]>,
{
    if steps == 0 {
        return Err(RigError::invalid_argument("RK4 needs at least one step"));
    }
    let h = t_end / f64::from(steps);
    let mut y = y0;
    for i in 0..steps {
        let t = h * f64::from(i);
        let k1 = f(t, &y)?;
        let k2 = f(t + h / 2.0, &combine(&y, h, &[0.5], &[k1]))?;
        let k3 = f(t + h / 2.0, &combine(&y, h, &[0.5], &[k2]))?;
        let k4 = f(t + h, &combine(&y, h, &[1.0], &[k3]))?;
        y = combine(&y, h, &[1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0], &[k1, k2, k3, k4]);
    }
    Ok(y)
}

/// Integrates from `t = 0` to `t_end` with Dormand-Prince 5(4).
///
/// Step sizes never exceed `max_step`. The error norm is the RMS of the
/// embedded error scaled by `atol + rtol · max(|y|, |y_new|)`; a step is
/// accepted when the norm is at most one.
pub fn rk45<const N: usize, F>(
    mut f: F,
    y0: [f64; N],
    t_end: f64,
    max_step: f64,
    tolerances: Tolerances,
) -> Result<Solution<N>>
where
    F: FnMut(f64, &[f64; N]) -> Result<[f64; N]>,
{
    if !(t_end.is_finite() && t_end >= 0.0) || !(max_step.is_finite() && max_step > 0.0) {
        return Err(RigError::invalid_argument(format!(
            "cannot integrate to {t_end} with maximum step {max_step}"
        )));
    }

    let mut t = 0.0;
    let mut y = y0;
    let mut h = max_step.min(t_end);
    let mut k1 = f(t, &y)?;
    let mut accepted = 0;
    let mut rejected = 0;

    while t < t_end {
        if accepted + rejected >= MAX_STEPS {
            return Err(RigError::numerical(format!("no convergence after {MAX_STEPS} steps at t = {t}")));
        }
        let remaining = t_end - t;
        let last = h >= remaining || remaining - h <= 4.0 * f64::EPSILON * t_end.max(1.0);
        if last {
            h = remaining;
        }
        if h <= f64::EPSILON * t_end.max(1.0) {
            return Err(RigError::numerical(format!("step size underflow at t = {t}")));
        }

        let k2 = f(t + C[0] * h, &combine(&y, h, &A2, &[k1]))?;
        let k3 = f(t + C[1] * h, &combine(&y, h, &A3, &[k1, k2]))?;
        let k4 = f(t + C[2] * h, &combine(&y, h, &A4, &[k1, k2, k3]))?;
        let k5 = f(t + C[3] * h, &combine(&y, h, &A5, &[k1, k2, k3, k4]))?;
        let k6 = f(t + C[4] * h, &combine(&y, h, &A6, &[k1, k2, k3, k4, k5]))?;
        let y_new = combine(&y, h, &B, &[k1, k2, k3, k4, k5, k6]);
        let k7 = f(t + h, &y_new)?;

        let stages = [k1, k2, k3, k4, k5, k6, k7];
        let mut sum = 0.0;
        for i in 0..N {
            let error: f64 = E.iter().zip(&stages).map(|(e, k)| e * k[i]).sum::<f64>() * h;
            let scale = tolerances.atol + tolerances.rtol * y[i].abs().max(y_new[i].abs());
            sum += (error / scale).powi(2);
        }
        let norm = (sum / N as f64).sqrt();
        if !norm.is_finite() {
            return Err(RigError::numerical(format!("non-finite error estimate at t = {t}")));
        }

        let factor = if norm == 0.0 {
            MAX_FACTOR
        } else {
            (SAFETY * norm.powf(-0.2)).clamp(MIN_FACTOR, MAX_FACTOR)
        };

        if norm <= 1.0 {
            t = if last { t_end } else { t + h };
            y = y_new;
            k1 = k7;
            accepted += 1;
            h = (h * factor).min(max_step);
        } else {
            rejected += 1;
            h *= factor.min(1.0);
        }
    }

    Ok(Solution { state: y, accepted, rejected })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decay(_: f64, y: &[f64; 1]) -> Result<[f64; 1]> {
        Ok([-y[0]])
    }

    fn oscillator(_: f64, y: &[f64; 2]) -> Result<[f64; 2]> {
        Ok([y[1], -y[0]])
    }

    #[test]
    fn rk4_matches_exponential_decay() {
        let y = rk4(decay, [1.0], 1.0, 100).unwrap();
        assert!((y[0] - (-1.0f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn rk45_tracks_harmonic_oscillator() {
        let tolerances = Tolerances { rtol: 1e-8, atol: 1e-10 };
        let solution = rk45(oscillator, [1.0, 0.0], std::f64::consts::PI, 0.1, tolerances).unwrap();
        assert!((solution.state[0] + 1.0).abs() < 1e-5, "{:?}", solution.state);
        assert!(solution.state[1].abs() < 1e-5);
        assert!(solution.accepted >= 32);
    }

    #[test]
    fn rk45_respects_max_step() {
        let solution = rk45(decay, [1.0], 0.02, 0.002, Tolerances::default()).unwrap();
        assert!(solution.accepted >= 10);
        assert!((solution.state[0] - (-0.02f64).exp()).abs() < 1e-6);
    }

    #[test]
    fn zero_span_returns_initial_state() {
        let solution = rk45(decay, [2.0], 0.0, 0.1, Tolerances::default()).unwrap();
        assert_eq!(solution.state, [2.0]);
        assert_eq!(solution.accepted, 0);
    }

    #[test]
    fn rhs_errors_propagate() {
        let failing = |_: f64, _: &[f64; 1]| -> Result<[f64; 1]> { Err(RigError::numerical("boom")) };
        assert!(matches!(rk45(failing, [1.0], 1.0, 0.1, Tolerances::default()), Err(RigError::Numerical { .. })));
        assert!(matches!(rk4(failing, [1.0], 1.0, 4), Err(RigError::Numerical { .. })));
    }

    #[test]
    fn nan_derivatives_are_numerical_errors() {
        let nan = |_: f64, _: &[f64; 1]| -> Result<[f64; 1]> { Ok([f64::NAN]) };
        assert!(matches!(rk45(nan, [1.0], 1.0, 0.1, Tolerances::default()), Err(RigError::Numerical { .. })));
    }

    #[test]
    fn rk4_rejects_zero_steps() {
        assert!(rk4(decay, [1.0], 1.0, 0).is_err());
    }
}
