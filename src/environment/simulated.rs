use std::collections::BTreeMap;

use tracing::{debug, info};

use super::{Environment, validate_actions};
use crate::agent::{Agent, SimulatedPlant};
use crate::error::{Result, RigError};
use crate::types::{Observation, StepResult};

/// Agents integrated in lockstep.
///
/// When any agent's episode ends, every agent is reported done until the
/// next reset.
#[derive(Debug)]
pub struct SimulatedEnv {
    agents: Vec<Agent<SimulatedPlant>>,
    world_time: f64,
    total_world_time: f64,
    any_done: bool,
}

impl SimulatedEnv {
    pub fn new(agents: Vec<Agent<SimulatedPlant>>) -> Result<Self> {
        if agents.is_empty() {
            return Err(RigError::config("an environment needs at least one agent"));
        }
        for (i, agent) in agents.iter().enumerate() {
            if agents[..i].iter().any(|other| other.name() == agent.name()) {
                return Err(RigError::config(format!("duplicate agent name '{}'", agent.name())));
            }
        }
        Ok(Self { agents, world_time: 0.0, total_world_time: 0.0, any_done: false })
    }

    pub fn agents(&self) -> &[Agent<SimulatedPlant>] {
        &self.agents
    }

    pub fn agent(&self, name: &str) -> Result<&Agent<SimulatedPlant>> {
        self.agents
            .iter()
            .find(|a| a.name() == name)
            .ok_or_else(|| RigError::invalid_argument(format!("no agent named '{name}'")))
    }

    /// Simulated seconds in the current episode.
    pub fn world_time(&self) -> f64 {
        self.world_time
    }

    /// Simulated seconds since construction.
    pub fn total_world_time(&self) -> f64 {
        self.total_world_time
    }

    pub fn reset_sync(&mut self) -> Result<BTreeMap<String, Observation>> {
        let observations = self
            .agents
            .iter_mut()
            .map(|agent| Ok((agent.name().to_string(), agent.reset()?)))
            .collect::<Result<_>>()?;
        self.world_time = 0.0;
        self.any_done = false;
        debug!(agents = self.agents.len(), "Simulated environment reset");
        Ok(observations)
    }

    pub fn step_sync(&mut self, actions: &BTreeMap<String, i64>) -> Result<BTreeMap<String, StepResult>> {
        let names = self.agent_names();
        validate_actions(&names, actions)?;

        let was_done = self.any_done;
        let mut results = BTreeMap::new();
        for agent in &mut self.agents {
            let action = actions.get(agent.name()).copied().unwrap_or_default();
            let result = agent.step(action)?;
            results.insert(agent.name().to_string(), result);
        }

        let tau = self.agents.iter().map(|a| a.tau()).fold(0.0, f64::max);
        if !was_done {
            self.world_time += tau;
            self.total_world_time += tau;
        }

        if results.values().any(|r| r.done) {
            if !self.any_done {
                info!(world_time = self.world_time, "Episode over for every agent");
            }
            self.any_done = true;
            for result in results.values_mut() {
                result.done = true;
            }
        }
        Ok(results)
    }
}

#[async_trait::async_trait]
impl Environment for SimulatedEnv {
    fn agent_names(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.name().to_string()).collect()
    }

    async fn reset(&mut self) -> Result<BTreeMap<String, Observation>> {
        self.reset_sync()
    }

    async fn step(&mut self, actions: &BTreeMap<String, i64>) -> Result<BTreeMap<String, StepResult>> {
        self.step_sync(actions)
    }

    fn observe(&self, agent: &str) -> Result<Observation> {
        self.agent(agent)?.observe()
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
