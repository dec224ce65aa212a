//! Discrete actions.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RigError};

/// Push the cart one way or the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Action {
    /// Force towards negative x.
    Backward = 0,
    /// Force towards positive x.
    Forward = 1,
}

impl Action {
    /// Sign of the applied force.
    pub fn sign(self) -> f64 {
        match self {
            Action::Backward => -1.0,
            Action::Forward => 1.0,
        }
    }

    pub fn index(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for Action {
    type Error = RigError;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(Action::Backward),
            1 => Ok(Action::Forward),
            action => Err(RigError::InvalidAction { action, n: ActionSpace::BINARY.n }),
        }
    }
}

impl From<Action> for i64 {
    fn from(action: Action) -> i64 {
        action.index()
    }
}

/// `n` discrete choices numbered from zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpace {
    pub n: usize,
}

impl ActionSpace {
    pub const BINARY: ActionSpace = ActionSpace { n: 2 };

    pub fn contains(&self, action: i64) -> bool {
        usize::try_from(action).is_ok_and(|a| a < self.n)
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> i64 {
        rng.gen_range(0..self.n) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn only_zero_and_one_are_actions() {
        assert_eq!(Action::try_from(0).unwrap(), Action::Backward);
        assert_eq!(Action::try_from(1).unwrap(), Action::Forward);
        for bad in [-1, 2, i64::MAX] {
            match Action::try_from(bad) {
                Err(RigError::InvalidAction { action, n }) => {
                    assert_eq!(action, bad);
                    assert_eq!(n, 2);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn force_direction() {
        assert_eq!(Action::Backward.sign(), -1.0);
        assert_eq!(Action::Forward.sign(), 1.0);
    }

    #[test]
    fn samples_stay_in_space() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let space = ActionSpace::BINARY;
        for _ in 0..100 {
            assert!(space.contains(space.sample(&mut rng)));
        }
        assert!(!space.contains(-1));
        assert!(!space.contains(2));
    }
}
