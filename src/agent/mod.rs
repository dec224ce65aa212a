//! Agents: one cart-pole, its goal and what it gets to observe.
//!
//! An [`Agent`] composes three strategies:
//!
//! - a [`Goal`] deciding reward and failure,
//! - a [`StateSpec`] projecting ground truth into observations,
//! - a [`Plant`] owning the ground truth, either the integrator
//!   ([`SimulatedPlant`]) or the rig itself ([`ExperimentalPlant`]).
//!
//! Agents are built with [`AgentBuilder`].
//!
//! ## Episode lifecycle
//!
//! `reset` starts an episode; each step advances the plant, checks every
//! failure condition and reports all that hold. Once an episode is done,
//! further steps are tolerated: they log a warning, return zero reward and
//! leave the state untouched until the next reset.

mod builder;
pub mod experimental;
pub mod goal;
pub mod plant;
pub mod state_spec;

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Result, RigError};
use crate::protocol::SetVelocityPacket;
use crate::types::{
    Action, ActionSpace, FailureDescriptor, Observation, ObservationSpace, PhysicalState,
    StepInfo, StepResult,
};

pub use builder::AgentBuilder;
pub use experimental::{ExperimentParams, ExperimentalPlant, FrequencyTicker};
pub use goal::{
    BalanceGoal, BalanceParams, DEFAULT_FAILURE_ANGLE, Goal, GoalConfig, PotentialGoal,
    PotentialParams, SwingupGoal, SwingupParams,
};
pub use plant::{Plant, SimulatedPlant, SimulationParams, Spread, StartDistribution};
pub use state_spec::{PositionalKnowledge, StateSpec, StateSpecKind, TotalKnowledge};

/// One cart-pole taking part in an environment.
#[derive(Debug)]
pub struct Agent<P: Plant> {
    name: String,
    goal: Box<dyn Goal>,
    spec: Box<dyn StateSpec>,
    plant: P,
    max_steps: Option<u64>,
    tau: f64,
    steps: u64,
    steps_beyond_done: u64,
    last_failures: Vec<FailureDescriptor>,
    done: bool,
}

impl<P: Plant> Agent<P> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn goal(&self) -> &dyn Goal {
        self.goal.as_ref()
    }

    pub fn state_spec(&self) -> &dyn StateSpec {
        self.spec.as_ref()
    }

    pub fn plant(&self) -> &P {
        &self.plant
    }

    pub fn plant_mut(&mut self) -> &mut P {
        &mut self.plant
    }

    /// Control timestep (s).
    pub fn tau(&self) -> f64 {
        self.tau
    }

    pub fn max_steps(&self) -> Option<u64> {
        self.max_steps
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Failures reported by the step that ended the episode.
    pub fn last_failures(&self) -> &[FailureDescriptor] {
        &self.last_failures
    }

    pub fn action_space(&self) -> ActionSpace {
        ActionSpace::BINARY
    }

    pub fn observation_space(&self) -> ObservationSpace {
        self.spec.observation_space(self.goal.failure_bounds())
    }

    pub fn physical_state(&self) -> Result<PhysicalState> {
        self.plant.state().ok_or_else(|| RigError::StateUnavailable { agent: self.name.clone() })
    }

    pub fn observe(&self) -> Result<Observation> {
        Ok(self.spec.externalize(&self.physical_state()?))
    }

    /// The observation paired with its dimension labels.
    pub fn observe_labeled(&self) -> Result<Vec<(&'static str, f64)>> {
        let observation = self.observe()?;
        Ok(self.spec.labels().iter().copied().zip(observation.iter().copied()).collect())
    }

    /// Every failure condition that holds in `state` at the current step count.
    pub fn check_state(&self, state: &PhysicalState) -> Vec<FailureDescriptor> {
        let mut failures = self.goal.check(state);
        if self.max_steps.is_some_and(|max| self.steps >= max) {
            failures.push(FailureDescriptor::MaxStepsReached);
        }
        failures
    }

    fn begin_episode(&mut self) {
        self.steps = 0;
        self.steps_beyond_done = 0;
        self.last_failures.clear();
        self.done = false;
        self.goal.reset();
    }

    /// Ends the episode from outside, e.g. when the rig stops the experiment.
    pub(crate) fn halt(&mut self) {
        self.done = true;
    }

    /// Result of stepping an episode that is already over.
    fn frozen_step(&mut self) -> Result<StepResult> {
        self.steps_beyond_done += 1;
        if self.steps_beyond_done == 1 {
            warn!(
                agent = %self.name,
                "Stepping an agent whose episode is done; call reset first. \
                 Further steps return zero reward."
            );
        }
        Ok(StepResult {
            observation: self.observe()?,
            reward: 0.0,
            done: true,
            info: StepInfo {
                steps: self.steps,
                failures: self.last_failures.clone(),
                frozen: true,
                ..StepInfo::default()
            },
        })
    }

    /// Evaluates the goal on the state the plant has just reached.
    fn conclude_step(&mut self, extra_failures: Vec<FailureDescriptor>, mut info: StepInfo) -> Result<StepResult> {
        let state = self.physical_state()?;
        if !state.is_finite() {
            return Err(RigError::numerical(format!("agent '{}' reached a non-finite state {state:?}", self.name)));
        }

        self.steps += 1;
        self.goal.post_step(&state, self.tau);

        let mut failures = self.check_state(&state);
        for failure in extra_failures {
            if !failures.contains(&failure) {
                failures.push(failure);
            }
        }
        let reward = self.goal.reward(&state);
        let done = !failures.is_empty();
        if done {
            debug!(agent = %self.name, steps = self.steps, failures = ?failures, "Episode done");
            self.last_failures = failures.clone();
            self.done = true;
        }

        info.steps = self.steps;
        info.failures = failures;
        Ok(StepResult { observation: self.spec.externalize(&state), reward, done, info })
    }
}

impl Agent<SimulatedPlant> {
    /// Samples a new start state and starts an episode.
    pub fn reset(&mut self) -> Result<Observation> {
        let bounds = *self.goal.failure_bounds();
        let state = self.plant.reset(&bounds)?;
        self.begin_episode();
        debug!(agent = %self.name, state = ?state, "Simulated agent reset");
        Ok(self.spec.externalize(&state))
    }

    /// Applies `action` for one timestep.
    pub fn step(&mut self, action: i64) -> Result<StepResult> {
        let action = Action::try_from(action)?;
        if self.done {
            return self.frozen_step();
        }
        self.plant.advance(action, self.tau)?;
        self.conclude_step(Vec::new(), StepInfo::default())
    }
}

impl Agent<ExperimentalPlant> {
    /// Forgets the previous episode's observations.
    pub fn pre_reset(&mut self) {
        self.plant.clear();
        self.begin_episode();
    }

    /// Paces the action and returns the command implementing it, or `None`
    /// when the episode is already over.
    pub async fn prepare_step(&mut self, action: i64) -> Result<Option<(SetVelocityPacket, Option<Duration>)>> {
        let action = Action::try_from(action)?;
        if self.done {
            return Ok(None);
        }
        let interval = self.plant.pace_action().await;
        Ok(Some((self.plant.command(action), interval)))
    }

    /// Evaluates the step once a fresh observation has arrived.
    ///
    /// `device_failures` are those reported by the controller.
    pub fn finish_step(
        &mut self,
        device_failures: Vec<FailureDescriptor>,
        action_interval: Option<Duration>,
    ) -> Result<StepResult> {
        if self.done {
            return self.frozen_step();
        }
        let info = StepInfo {
            action_interval,
            action_frequency: Some(self.plant.action_frequency()),
            observation_interval: self.plant.last_observation_interval(),
            ..StepInfo::default()
        };
        self.conclude_step(device_failures, info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bounds, FailureBounds};

    fn balance_agent(start: PhysicalState, max_steps: Option<u64>) -> Agent<SimulatedPlant> {
        let params = SimulationParams {
            start: StartDistribution::at(start),
            force_magnitude: 10.0,
            ..SimulationParams::default()
        };
        AgentBuilder::new("cart")
            .goal(GoalConfig::Balance(BalanceParams {
                bounds: FailureBounds {
                    position: Bounds::symmetric(2.4),
                    angle: Bounds::symmetric(0.2095),
                    ..FailureBounds::default()
                },
            }))
            .max_steps(max_steps)
            .seed(3)
            .simulated(params)
            .unwrap()
    }

    #[test]
    fn invalid_action_is_rejected_before_anything_else() {
        let mut agent = balance_agent(PhysicalState::default(), None);
        let before = agent.physical_state().unwrap();
        assert!(matches!(agent.step(2), Err(RigError::InvalidAction { action: 2, n: 2 })));
        assert!(matches!(agent.step(-1), Err(RigError::InvalidAction { .. })));
        assert_eq!(agent.physical_state().unwrap(), before);
        assert_eq!(agent.steps(), 0);
    }

    #[test]
    fn state_is_frozen_after_done() {
        let start = PhysicalState::new(2.4, 0.0, 0.0, 0.0);
        let mut agent = balance_agent(start, None);
        let mut result = agent.step(1).unwrap();
        while !result.done {
            result = agent.step(1).unwrap();
        }
        assert!(result.info.failures.contains(&FailureDescriptor::PositionRight));
        assert!(!result.info.frozen);

        let frozen_state = agent.physical_state().unwrap();
        let steps = agent.steps();
        for _ in 0..3 {
            let again = agent.step(0).unwrap();
            assert!(again.done);
            assert!(again.info.frozen);
            assert_eq!(again.reward, 0.0);
            assert_eq!(again.info.failures, result.info.failures);
        }
        assert_eq!(agent.physical_state().unwrap(), frozen_state);
        assert_eq!(agent.steps(), steps);

        agent.reset().unwrap();
        assert!(!agent.is_done());
        assert_eq!(agent.steps(), 0);
    }

    #[test]
    fn max_steps_truncates() {
        let mut agent = balance_agent(PhysicalState::default(), Some(3));
        for action in [0, 1] {
            assert!(!agent.step(action).unwrap().done);
        }
        let last = agent.step(0).unwrap();
        assert!(last.done);
        assert_eq!(last.info.failures, vec![FailureDescriptor::MaxStepsReached]);
        assert!(last.info.truncated());
        assert!(!last.info.terminated());
    }

    #[test]
    fn labels_pair_with_observation() {
        let agent = balance_agent(PhysicalState::new(0.5, 0.0, 0.1, 0.0), None);
        let labeled = agent.observe_labeled().unwrap();
        assert_eq!(labeled, vec![("x", 0.5), ("dx", 0.0), ("theta", 0.1), ("dtheta", 0.0)]);
        assert_eq!(agent.observation_space().dim(), 4);
        assert!(agent.action_space().contains(1));
    }

    #[test]
    fn experimental_agent_needs_an_observation() {
        let agent = AgentBuilder::new("rig").experimental(ExperimentParams::default()).unwrap();
        assert!(matches!(agent.observe(), Err(RigError::StateUnavailable { agent }) if agent == "rig"));
    }

    #[test]
    fn experimental_steps_merge_device_failures() {
        use crate::protocol::{CartId, ObservationPacket};
        use crate::types::ExperimentState;

        let mut agent = AgentBuilder::new("rig").experimental(ExperimentParams::default()).unwrap();
        agent.pre_reset();
        let packet = ObservationPacket { timestamp_micros: 10, cart_id: CartId::One, position_steps: 0, angle_degrees: 0.0 };
        agent.plant_mut().absorb(&packet, ExperimentState::Running);

        let result = agent.finish_step(vec![FailureDescriptor::AngleLeft], None).unwrap();
        assert!(result.done);
        assert_eq!(result.info.failures, vec![FailureDescriptor::AngleLeft]);
        assert!(agent.finish_step(Vec::new(), None).unwrap().info.frozen);
    }
}
