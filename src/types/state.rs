//! Physical state and the observations derived from it.

use std::ops::{Deref, Index};

use serde::{Deserialize, Serialize};

/// Ground-truth state of one cart-pole.
///
/// `theta` is zero with the pole upright.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PhysicalState {
    /// Cart position (m)
    pub x: f64,
    /// Cart velocity (m/s)
    pub x_dot: f64,
    /// Pole angle (rad)
    pub theta: f64,
    /// Pole angular velocity (rad/s)
    pub theta_dot: f64,
}

impl PhysicalState {
    pub const DIM: usize = 4;

    pub fn new(x: f64, x_dot: f64, theta: f64, theta_dot: f64) -> Self {
        Self { x, x_dot, theta, theta_dot }
    }

    pub fn to_array(self) -> [f64; 4] {
        [self.x, self.x_dot, self.theta, self.theta_dot]
    }

    pub fn from_array([x, x_dot, theta, theta_dot]: [f64; 4]) -> Self {
        Self { x, x_dot, theta, theta_dot }
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }
}

impl From<[f64; 4]> for PhysicalState {
    fn from(values: [f64; 4]) -> Self {
        Self::from_array(values)
    }
}

/// State as exposed to a consumer, possibly projected to fewer dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation(Vec<f64>);

impl Observation {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }
}

impl Deref for Observation {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        &self.0
    }
}

impl Index<usize> for Observation {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.0[index]
    }
}

impl From<Vec<f64>> for Observation {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

/// Fixed-length box of observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationSpace {
    pub low: Vec<f64>,
    pub high: Vec<f64>,
}

impl ObservationSpace {
    pub fn new(low: Vec<f64>, high: Vec<f64>) -> Self {
        debug_assert_eq!(low.len(), high.len());
        Self { low, high }
    }

    pub fn dim(&self) -> usize {
        self.low.len()
    }

    pub fn contains(&self, observation: &[f64]) -> bool {
        observation.len() == self.dim()
            && observation
                .iter()
                .zip(self.low.iter().zip(&self.high))
                .all(|(v, (lo, hi))| *lo <= *v && *v <= *hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_round_trip() {
        let state = PhysicalState::new(1.0, -2.0, 0.5, 0.25);
        assert_eq!(PhysicalState::from(state.to_array()), state);
        assert!(state.is_finite());
        assert!(!PhysicalState { theta: f64::NAN, ..state }.is_finite());
        assert!(!PhysicalState { x: f64::INFINITY, ..state }.is_finite());
    }

    #[test]
    fn observation_space_membership() {
        let space = ObservationSpace::new(vec![-1.0, -2.0], vec![1.0, 2.0]);
        assert!(space.contains(&[0.0, 2.0]));
        assert!(!space.contains(&[0.0, 2.1]));
        assert!(!space.contains(&[0.0]));

        let observation = Observation::new(vec![0.5, -0.5]);
        assert_eq!(observation[1], -0.5);
        assert_eq!(observation.len(), 2);
    }
}
