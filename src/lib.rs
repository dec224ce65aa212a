//! Cart-pole simulation and physical rig control.
//!
//! Cartpole Rig drives one or more inverted pendulums on carts, either
//! integrated numerically or running on a physical rig whose controller
//! speaks a binary protocol over a serial link. Both sides expose the same
//! reset/step/observe interface to training code.
//!
//! # Features
//!
//! - **Simulation**: Florian's cart-pole dynamics with Coulomb friction,
//!   integrated by adaptive Dormand–Prince or fixed-step RK4
//! - **Physical rig**: packet framing with automatic realignment, ping-pong
//!   liveness, bring-up and reset handshakes
//! - **Composable agents**: pluggable goals (balance, swing-up, potential) and
//!   state specs (full or positional knowledge)
//! - **Configuration**: YAML files and named presets
//!
//! # Quick Start
//!
//! ```rust
//! use std::collections::BTreeMap;
//!
//! use cartpole_rig::{Rig, config};
//!
//! let mut env = Rig::simulate(&config::deep_pilco()).unwrap();
//! let observations = env.reset_sync().unwrap();
//! assert_eq!(observations["cart"].len(), 4);
//!
//! let actions = BTreeMap::from([("cart".to_string(), 1)]);
//! let results = env.step_sync(&actions).unwrap();
//! assert!(!results["cart"].done);
//! ```

// Core types and error handling
pub mod codec;
mod error;
pub mod logging;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Wire protocol and transport
pub mod network;
pub mod protocol;

// Dynamics, agents and environments
pub mod agent;
pub mod config;
pub mod environment;
pub mod integration;

// Core exports
pub use error::*;
pub use types::*;

pub use agent::{Agent, AgentBuilder};
pub use config::RigConfig;
pub use environment::{Environment, ExperimentalEnv, SimulatedEnv};
pub use network::{NetworkSession, SerialChannel};

/// Unified entry point for building environments from a configuration.
///
/// # Examples
///
/// ## Simulation
/// ```rust
/// use cartpole_rig::{Rig, config};
///
/// let env = Rig::simulate(&config::default_simulated()).unwrap();
/// assert_eq!(env.agents().len(), 1);
/// ```
///
/// ## Physical rig
/// ```rust,no_run
/// use cartpole_rig::{Environment, Rig, config};
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() -> cartpole_rig::Result<()> {
///     let mut env = Rig::connect(&config::default_experiment()).await?;
///     let observations = env.reset().await?;
///     println!("{observations:?}");
///     env.close().await
/// }
/// ```
pub struct Rig;

impl Rig {
    /// Builds a simulated environment. Every agent starts reset.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration fails validation or names an
    /// experimental agent.
    pub fn simulate(config: &RigConfig) -> Result<SimulatedEnv> {
        config.simulated_env()
    }

    /// Opens the configured serial port and brings the controller up.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration fails validation or names a simulated agent
    /// - The serial device cannot be opened
    /// - The controller fails its liveness check or never answers
    pub async fn connect(config: &RigConfig) -> Result<ExperimentalEnv<SerialChannel>> {
        let mut env = config.experimental_env()?;
        env.setup().await?;
        Ok(env)
    }
}
