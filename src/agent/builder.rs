use super::{
    Agent, ExperimentParams, ExperimentalPlant, GoalConfig, Plant, SimulatedPlant, SimulationParams,
    StateSpecKind,
};
use crate::error::{Result, RigError};

/// Assembles an [`Agent`] from a goal, a state spec and a plant.
///
/// ```rust
/// use cartpole_rig::agent::{AgentBuilder, SimulationParams, StateSpecKind};
///
/// let mut agent = AgentBuilder::new("cart")
///     .state_spec(StateSpecKind::PositionalKnowledge)
///     .seed(7)
///     .simulated(SimulationParams::default())
///     .unwrap();
/// let result = agent.step(1).unwrap();
/// assert_eq!(result.observation.len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct AgentBuilder {
    name: String,
    goal: GoalConfig,
    state_spec: StateSpecKind,
    max_steps: Option<u64>,
    seed: Option<u64>,
    tau: f64,
}

impl AgentBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            goal: GoalConfig::default(),
            state_spec: StateSpecKind::default(),
            max_steps: None,
            seed: None,
            tau: 0.02,
        }
    }

    pub fn goal(mut self, goal: GoalConfig) -> Self {
        self.goal = goal;
        self
    }

    pub fn state_spec(mut self, state_spec: StateSpecKind) -> Self {
        self.state_spec = state_spec;
        self
    }

    pub fn max_steps(mut self, max_steps: Option<u64>) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Control timestep (s).
    pub fn tau(mut self, tau: f64) -> Self {
        self.tau = tau;
        self
    }

    fn assemble<P: Plant>(self, plant: P) -> Result<Agent<P>> {
        if self.name.is_empty() {
            return Err(RigError::config("agent name must not be empty"));
        }
        if !(self.tau.is_finite() && self.tau > 0.0) {
            return Err(RigError::config(format!("timestep must be positive, got {}", self.tau)));
        }
        if self.max_steps == Some(0) {
            return Err(RigError::config("max_steps must be at least 1"));
        }
        Ok(Agent {
            name: self.name,
            goal: self.goal.build()?,
            spec: self.state_spec.build(),
            plant,
            max_steps: self.max_steps,
            tau: self.tau,
            steps: 0,
            steps_beyond_done: 0,
            last_failures: Vec::new(),
            done: false,
        })
    }

    /// Builds an integrator-driven agent, already reset into its first episode.
    pub fn simulated(self, params: SimulationParams) -> Result<Agent<SimulatedPlant>> {
        let plant = SimulatedPlant::new(params, self.seed)?;
        let mut agent = self.assemble(plant)?;
        agent.reset()?;
        Ok(agent)
    }

    /// Builds an agent for one cart of the physical rig. It has no state
    /// until the environment feeds it observations.
    pub fn experimental(self, params: ExperimentParams) -> Result<Agent<ExperimentalPlant>> {
        let plant = ExperimentalPlant::new(params)?;
        self.assemble(plant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_degenerate_settings() {
        assert!(AgentBuilder::new("").simulated(SimulationParams::default()).is_err());
        assert!(AgentBuilder::new("a").tau(0.0).simulated(SimulationParams::default()).is_err());
        assert!(AgentBuilder::new("a").max_steps(Some(0)).experimental(ExperimentParams::default()).is_err());
    }

    #[test]
    fn simulated_agents_start_reset() {
        let agent = AgentBuilder::new("a").seed(1).simulated(SimulationParams::default()).unwrap();
        assert!(agent.physical_state().is_ok());
        assert_eq!(agent.tau(), 0.02);
        assert_eq!(agent.goal().name(), "balance");
        assert_eq!(agent.state_spec().name(), "total_knowledge");
    }
}
