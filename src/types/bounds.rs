//! Failure bounds.

use serde::{Deserialize, Serialize};

use crate::error::{Result, RigError};

/// Closed interval `[min, max]`. Values on the boundary are inside.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const UNBOUNDED: Bounds = Bounds { min: f64::NEG_INFINITY, max: f64::INFINITY };

    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn symmetric(limit: f64) -> Self {
        Self { min: -limit, max: limit }
    }

    /// Strictly below the lower bound.
    pub fn below(&self, value: f64) -> bool {
        value < self.min
    }

    /// Strictly above the upper bound.
    pub fn above(&self, value: f64) -> bool {
        value > self.max
    }

    pub fn contains(&self, value: f64) -> bool {
        !self.below(value) && !self.above(value)
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self { min: self.min * factor, max: self.max * factor }
    }

    pub fn validate(&self, name: &str) -> Result<()> {
        if self.min.is_nan() || self.max.is_nan() || self.min > self.max {
            return Err(RigError::invalid_argument(format!(
                "{name} bounds [{}, {}] are empty",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self::UNBOUNDED
    }
}

impl From<(f64, f64)> for Bounds {
    fn from((min, max): (f64, f64)) -> Self {
        Self { min, max }
    }
}

/// Per-dimension limits beyond which an episode fails.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureBounds {
    pub position: Bounds,
    pub position_velocity: Bounds,
    pub angle: Bounds,
    pub angle_velocity: Bounds,
}

impl FailureBounds {
    pub fn validate(&self) -> Result<()> {
        self.position.validate("position")?;
        self.position_velocity.validate("position velocity")?;
        self.angle.validate("angle")?;
        self.angle_velocity.validate("angle velocity")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_is_inside() {
        let bounds = Bounds::symmetric(2.4);
        assert!(bounds.contains(2.4));
        assert!(bounds.contains(-2.4));
        assert!(!bounds.above(2.4));
        assert!(bounds.above(2.4 + 1e-9));
        assert!(bounds.below(-2.4 - 1e-9));
    }

    #[test]
    fn unbounded_contains_everything_finite() {
        assert!(Bounds::UNBOUNDED.contains(f64::MAX));
        assert!(Bounds::UNBOUNDED.contains(f64::MIN));
        assert_eq!(Bounds::UNBOUNDED.scaled(2.0), Bounds::UNBOUNDED);
    }

    #[test]
    fn empty_bounds_are_rejected() {
        assert!(Bounds::new(1.0, -1.0).validate("position").is_err());
        assert!(Bounds::new(f64::NAN, 1.0).validate("position").is_err());
        assert!(FailureBounds::default().validate().is_ok());
    }

    #[test]
    fn yaml_accepts_partial_bounds() {
        let bounds: FailureBounds =
            serde_yaml_ng::from_str("position: {min: -2.4, max: 2.4}\n").unwrap();
        assert_eq!(bounds.position, Bounds::symmetric(2.4));
        assert_eq!(bounds.angle, Bounds::UNBOUNDED);
    }
}
