//! YAML configuration and named presets.
//!
//! A [`RigConfig`] describes the timestep, the agents and, for the physical
//! rig, the serial session. Every field has a default, so a file only
//! needs to name what differs:
//!
//! ```yaml
//! timestep: 0.02
//! agents:
//!   - name: cart
//!     goal:
//!       kind: swingup
//!       time_above_threshold: 5.0
//!     state_spec: positional_knowledge
//!     max_steps: 1000
//!     simulation:
//!       mass_cart: 0.5
//!       force_magnitude: 10.0
//!       integrator:
//!         method: rk4
//!         resolution: 4
//! ```
//!
//! Agents carry either a `simulation` or an `experiment` section; an agent
//! with neither is simulated with default physics.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agent::{
    Agent, AgentBuilder, BalanceParams, DEFAULT_FAILURE_ANGLE, ExperimentParams, ExperimentalPlant,
    GoalConfig, SimulatedPlant, SimulationParams, StartDistribution, StateSpecKind,
};
use crate::environment::{ExperimentalEnv, SimulatedEnv};
use crate::error::{Result, RigError};
use crate::integration::{CartpoleParams, IntegratorConfig};
use crate::network::{ByteChannel, NetworkSession, SerialChannel, SessionConfig};
use crate::protocol::constants::DEFAULT_BAUD_RATE;
use crate::types::{Bounds, FailureBounds, PhysicalState};

/// One agent's settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    #[serde(default)]
    pub goal: GoalConfig,
    #[serde(default)]
    pub state_spec: StateSpecKind,
    #[serde(default)]
    pub max_steps: Option<u64>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation: Option<SimulationParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment: Option<ExperimentParams>,
}

impl AgentConfig {
    pub fn simulated(name: impl Into<String>, simulation: SimulationParams) -> Self {
        Self {
            name: name.into(),
            goal: GoalConfig::default(),
            state_spec: StateSpecKind::default(),
            max_steps: None,
            seed: None,
            simulation: Some(simulation),
            experiment: None,
        }
    }

    pub fn experimental(name: impl Into<String>, experiment: ExperimentParams) -> Self {
        Self { simulation: None, experiment: Some(experiment), ..Self::simulated(name, SimulationParams::default()) }
    }

    pub fn is_experimental(&self) -> bool {
        self.experiment.is_some()
    }

    fn builder(&self, timestep: f64) -> AgentBuilder {
        let builder = AgentBuilder::new(self.name.clone())
            .goal(self.goal)
            .state_spec(self.state_spec)
            .max_steps(self.max_steps)
            .tau(timestep);
        match self.seed {
            Some(seed) => builder.seed(seed),
            None => builder,
        }
    }

    pub fn build_simulated(&self, timestep: f64) -> Result<Agent<SimulatedPlant>> {
        if self.is_experimental() {
            return Err(RigError::config(format!("agent '{}' is configured for the physical rig", self.name)));
        }
        self.builder(timestep).simulated(self.simulation.unwrap_or_default())
    }

    pub fn build_experimental(&self, timestep: f64) -> Result<Agent<ExperimentalPlant>> {
        let params = self
            .experiment
            .ok_or_else(|| RigError::config(format!("agent '{}' has no experiment section", self.name)))?;
        self.builder(timestep).experimental(params)
    }

    fn validate(&self) -> Result<()> {
        let scoped = |e: RigError| RigError::config(format!("agent '{}': {e}", self.name));
        if self.name.is_empty() {
            return Err(RigError::config("agent name must not be empty"));
        }
        if self.simulation.is_some() && self.experiment.is_some() {
            return Err(RigError::config(format!(
                "agent '{}' has both simulation and experiment sections",
                self.name
            )));
        }
        if self.max_steps == Some(0) {
            return Err(RigError::config(format!("agent '{}': max_steps must be at least 1", self.name)));
        }
        self.goal.validate().map_err(scoped)?;
        if let Some(simulation) = &self.simulation {
            simulation.validate().map_err(scoped)?;
        }
        if let Some(experiment) = &self.experiment {
            experiment.validate().map_err(scoped)?;
        }
        Ok(())
    }
}

/// Serial session settings. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub port: PathBuf,
    /// Line speed; framing is always 8N1 without flow control.
    pub baud_rate: u32,
    /// `None` waits forever.
    pub response_timeout_ms: Option<u64>,
    pub read_timeout_ms: u64,
    pub realign_timeout_ms: Option<u64>,
    pub settle_delay_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        let millis = |d: Duration| u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
        Self {
            port: PathBuf::from("/dev/ttyUSB0"),
            baud_rate: DEFAULT_BAUD_RATE,
            response_timeout_ms: defaults.response_timeout.map(millis),
            read_timeout_ms: millis(defaults.read_timeout),
            realign_timeout_ms: defaults.realign_timeout.map(millis),
            settle_delay_ms: millis(defaults.settle_delay),
        }
    }
}

impl SessionSettings {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            response_timeout: self.response_timeout_ms.map(Duration::from_millis),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            realign_timeout: self.realign_timeout_ms.map(Duration::from_millis),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
        }
    }

    pub fn channel(&self) -> SerialChannel {
        SerialChannel::new(&self.port).with_baud_rate(self.baud_rate)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    /// Control timestep (s).
    pub timestep: f64,
    /// Visible extent of the track (m).
    pub world_size: Bounds,
    pub agents: Vec<AgentConfig>,
    pub session: SessionSettings,
}

impl Default for RigConfig {
    fn default() -> Self {
        default_simulated()
    }
}

impl RigConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: RigConfig = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| RigError::file_error(path.to_path_buf(), e))?;
        debug!(path = %path.display(), "Loading configuration");
        Self::from_yaml_str(&contents)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.timestep.is_finite() && self.timestep > 0.0) {
            return Err(RigError::config(format!("timestep must be positive, got {}", self.timestep)));
        }
        self.world_size.validate("world_size").map_err(|e| RigError::config(e.to_string()))?;
        if self.agents.is_empty() {
            return Err(RigError::config("at least one agent is required"));
        }

        let mut names = BTreeSet::new();
        let mut carts = BTreeSet::new();
        for agent in &self.agents {
            agent.validate()?;
            if !names.insert(agent.name.as_str()) {
                return Err(RigError::config(format!("duplicate agent name '{}'", agent.name)));
            }
            if let Some(experiment) = &agent.experiment {
                if !carts.insert(experiment.cart_id) {
                    return Err(RigError::config(format!("{} is assigned to more than one agent", experiment.cart_id)));
                }
            }
        }

        let experimental = self.agents.iter().filter(|a| a.is_experimental()).count();
        if experimental != 0 && experimental != self.agents.len() {
            return Err(RigError::config("simulated and experimental agents cannot share an environment"));
        }
        Ok(())
    }

    pub fn is_experimental(&self) -> bool {
        self.agents.iter().any(AgentConfig::is_experimental)
    }

    pub fn simulated_env(&self) -> Result<SimulatedEnv> {
        self.validate()?;
        let agents = self.agents.iter().map(|a| a.build_simulated(self.timestep)).collect::<Result<Vec<_>>>()?;
        SimulatedEnv::new(agents)
    }

    /// Experimental environment over the configured serial port.
    pub fn experimental_env(&self) -> Result<ExperimentalEnv<SerialChannel>> {
        self.experimental_env_with(self.session.channel())
    }

    /// Experimental environment over any byte channel.
    pub fn experimental_env_with<C: ByteChannel>(&self, channel: C) -> Result<ExperimentalEnv<C>> {
        self.validate()?;
        let agents =
            self.agents.iter().map(|a| a.build_experimental(self.timestep)).collect::<Result<Vec<_>>>()?;
        ExperimentalEnv::new(NetworkSession::new(channel, self.session.session_config()), agents)
    }
}

/// One balancing cart with the integrator's default physics.
pub fn default_simulated() -> RigConfig {
    let simulation = SimulationParams {
        integrator: IntegratorConfig { resolution: 2, ..IntegratorConfig::default() },
        ..SimulationParams::default()
    };
    RigConfig {
        timestep: 0.02,
        world_size: Bounds::new(-2.5, 2.5),
        agents: vec![AgentConfig { max_steps: Some(5000), ..AgentConfig::simulated("cart", simulation) }],
        session: SessionSettings::default(),
    }
}

/// Parameters of the DeepPILCO cart-pole benchmark.
pub fn deep_pilco() -> RigConfig {
    let mut config = default_simulated();
    let simulation = SimulationParams {
        physics: CartpoleParams {
            gravity: 9.82,
            mass_cart: 0.5,
            mass_pole: 0.5,
            friction_cart: 0.1,
            friction_pole: 0.0,
            pole_length: 0.6,
        },
        start: StartDistribution::at(PhysicalState::default()),
        force_magnitude: 10.0,
        integrator: IntegratorConfig { resolution: 2, ..IntegratorConfig::default() },
    };
    let goal = GoalConfig::Balance(BalanceParams {
        bounds: FailureBounds {
            position: Bounds::symmetric(2.4),
            angle: Bounds::symmetric(DEFAULT_FAILURE_ANGLE),
            ..FailureBounds::default()
        },
    });
    config.agents = vec![AgentConfig { goal, max_steps: Some(5000), ..AgentConfig::simulated("cart", simulation) }];
    config
}

/// One cart on the physical rig.
pub fn default_experiment() -> RigConfig {
    RigConfig {
        agents: vec![AgentConfig::experimental("cart", ExperimentParams::default())],
        ..default_simulated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::SwingupParams;
    use crate::integration::Method;
    use crate::protocol::CartId;
    use anyhow::{Context, Result, ensure};

    #[test]
    fn presets_validate() -> Result<()> {
        for config in [default_simulated(), deep_pilco(), default_experiment()] {
            config.validate().context("preset failed validation")?;
        }
        ensure!(default_experiment().is_experimental(), "experiment preset is not experimental");
        ensure!(!deep_pilco().is_experimental(), "DeepPILCO preset is experimental");
        Ok(())
    }

    #[test]
    fn yaml_fills_in_defaults() -> Result<()> {
        let yaml = r#"
timestep: 0.01
agents:
  - name: swinger
    goal:
      kind: swingup
      time_above_threshold: 5.0
    state_spec: positional_knowledge
    seed: 42
    simulation:
      mass_cart: 0.5
      force_magnitude: 10.0
      integrator:
        method: rk4
        resolution: 4
"#;
        let config = RigConfig::from_yaml_str(yaml)?;
        ensure!(config.timestep == 0.01);
        ensure!(config.session.baud_rate == DEFAULT_BAUD_RATE);

        let agent = &config.agents[0];
        ensure!(agent.state_spec == StateSpecKind::PositionalKnowledge);
        ensure!(agent.goal == GoalConfig::Swingup(SwingupParams { time_above_threshold: 5.0, ..SwingupParams::default() }));
        let simulation = agent.simulation.context("simulation section missing")?;
        ensure!(simulation.physics.mass_cart == 0.5);
        ensure!(simulation.physics.mass_pole == CartpoleParams::default().mass_pole);
        ensure!(simulation.integrator.method == Method::Rk4);

        let env = config.simulated_env()?;
        ensure!(env.agents()[0].observe()?.len() == 2);
        Ok(())
    }

    #[test]
    fn experiment_section_parses() -> Result<()> {
        let yaml = r#"
agents:
  - name: left
    experiment:
      cart_id: 1
  - name: right
    experiment:
      cart_id: 2
      velocity_increment: 25
session:
  port: /dev/ttyACM0
  response_timeout_ms: null
"#;
        let config = RigConfig::from_yaml_str(yaml)?;
        ensure!(config.is_experimental());
        ensure!(config.agents[1].experiment.context("missing")?.cart_id == CartId::Two);
        ensure!(config.session.session_config().response_timeout.is_none());
        ensure!(config.session.channel().path() == Path::new("/dev/ttyACM0"));
        Ok(())
    }

    #[test]
    fn invalid_configurations_are_rejected() {
        let mut duplicate = default_simulated();
        duplicate.agents.push(duplicate.agents[0].clone());
        assert!(matches!(duplicate.validate(), Err(RigError::Config { .. })));

        let mut carts = default_experiment();
        carts.agents.push(AgentConfig::experimental("other", ExperimentParams::default()));
        assert!(carts.validate().is_err());

        let mut mixed = default_simulated();
        mixed.agents.push(AgentConfig::experimental("rig", ExperimentParams::default()));
        assert!(mixed.validate().is_err());

        let mut massless = default_simulated();
        if let Some(simulation) = massless.agents[0].simulation.as_mut() {
            simulation.physics.mass_cart = 0.0;
        }
        assert!(matches!(massless.validate(), Err(RigError::Config { .. })));

        let zero_resolution = "agents:\n  - name: a\n    simulation:\n      integrator:\n        resolution: 0\n";
        assert!(RigConfig::from_yaml_str(zero_resolution).is_err());

        assert!(RigConfig::from_yaml_str("timestep: -1.0\n").is_err());
        assert!(matches!(RigConfig::from_yaml_str("timestep: [\n"), Err(RigError::ConfigParse(_))));
    }

    #[test]
    fn yaml_round_trip_preserves_presets() -> Result<()> {
        let config = deep_pilco();
        let yaml = config.to_yaml_string()?;
        let parsed = RigConfig::from_yaml_str(&yaml)?;
        ensure!(parsed == config, "round trip changed the configuration");
        Ok(())
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let error = RigConfig::from_path("/nonexistent/cartpole-rig.yaml").unwrap_err();
        assert!(matches!(error, RigError::Io { .. }));
    }
}
