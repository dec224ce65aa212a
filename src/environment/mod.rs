//! Multi-agent step loop exposed to training code.

mod experimental;
mod simulated;

use std::collections::BTreeMap;

use crate::error::{Result, RigError};
use crate::types::{Action, Observation, StepResult};

pub use experimental::ExperimentalEnv;
pub use simulated::SimulatedEnv;

/// Reset/step/observe interface over one or more agents.
///
/// Maps are keyed by agent name. Implementations handle their own timing:
/// the simulated environment advances instantly, the experimental one waits
/// on the rig.
#[async_trait::async_trait]
pub trait Environment: Send {
    fn agent_names(&self) -> Vec<String>;

    /// Starts a new episode for every agent.
    async fn reset(&mut self) -> Result<BTreeMap<String, Observation>>;

    /// Applies one action per agent.
    ///
    /// Every agent must be given an action; an action outside the action
    /// space is an error and nothing is stepped.
    async fn step(&mut self, actions: &BTreeMap<String, i64>) -> Result<BTreeMap<String, StepResult>>;

    /// Current observation of one agent.
    fn observe(&self, agent: &str) -> Result<Observation>;

    /// Releases the environment's resources.
    async fn close(&mut self) -> Result<()>;
}

/// Checks that `actions` covers exactly `names` and that each is valid.
pub(crate) fn validate_actions(names: &[String], actions: &BTreeMap<String, i64>) -> Result<()> {
    for name in names {
        let action = actions
            .get(name)
            .ok_or_else(|| RigError::invalid_argument(format!("no action given for agent '{name}'")))?;
        Action::try_from(*action)?;
    }
    if let Some(unknown) = actions.keys().find(|k| !names.contains(k)) {
        return Err(RigError::invalid_argument(format!("action given for unknown agent '{unknown}'")));
    }
    Ok(())
}
