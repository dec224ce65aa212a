use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{Environment, validate_actions};
use crate::agent::{Agent, ExperimentalPlant};
use crate::error::{Result, RigError};
use crate::network::{ByteChannel, GetOptions, NetworkSession, PacketBuffer, log_messages, selectors};
use crate::protocol::{
    CartId, DoJigglePacket, ExperimentDonePacket, ExperimentStartPacket, ExperimentStopPacket,
    ObservationPacket, PacketType, SetOperation, SetVelocityPacket,
};
use crate::types::{ExperimentState, FailureDescriptor, Observation, StepResult};

/// What the controller reported about the running experiment.
#[derive(Debug, Default)]
struct DeviceReport {
    ended: bool,
    failures: BTreeMap<CartId, Vec<FailureDescriptor>>,
}

impl DeviceReport {
    fn record(&mut self, packet: &ExperimentDonePacket, carts: &[CartId]) {
        self.ended = true;
        let Some(failure) = FailureDescriptor::from_device(packet.failure) else {
            return;
        };
        let affected: Vec<CartId> = match CartId::try_from(packet.cart_id) {
            Ok(cart) => vec![cart],
            Err(_) => carts.to_vec(),
        };
        for cart in affected {
            self.failures.entry(cart).or_default().push(failure);
        }
    }
}

/// Hands every buffered observation to the agent driving its cart.
fn route(
    buffer: &mut PacketBuffer,
    agents: &mut [Agent<ExperimentalPlant>],
    phase: ExperimentState,
    report: &mut DeviceReport,
    carts: &[CartId],
) {
    log_messages(buffer);
    for packet in buffer.drain_type::<ObservationPacket>() {
        match agents.iter_mut().find(|a| a.plant().cart_id() == packet.cart_id) {
            Some(agent) => {
                agent.plant_mut().absorb(&packet, phase);
            }
            None => debug!(cart = %packet.cart_id, "Observation for a cart without an agent"),
        }
    }
    for packet in buffer.drain_type::<ExperimentDonePacket>() {
        if phase == ExperimentState::Running {
            info!(cart = packet.cart_id, failure = ?packet.failure, "Controller ended the experiment");
            report.record(&packet, carts);
        } else {
            debug!(cart = packet.cart_id, phase = %phase, "Ignoring experiment-done outside a run");
        }
    }
}

/// Agents driving carts on the physical rig through one session.
#[derive(Debug)]
pub struct ExperimentalEnv<C: ByteChannel> {
    session: NetworkSession<C>,
    agents: Vec<Agent<ExperimentalPlant>>,
    carts: Vec<CartId>,
    state: ExperimentState,
    report: DeviceReport,
}

impl<C: ByteChannel> ExperimentalEnv<C> {
    pub fn new(session: NetworkSession<C>, agents: Vec<Agent<ExperimentalPlant>>) -> Result<Self> {
        if agents.is_empty() {
            return Err(RigError::config("an environment needs at least one agent"));
        }
        let mut names = BTreeSet::new();
        let mut carts = Vec::with_capacity(agents.len());
        for agent in &agents {
            if !names.insert(agent.name()) {
                return Err(RigError::config(format!("duplicate agent name '{}'", agent.name())));
            }
            let cart = agent.plant().cart_id();
            if carts.contains(&cart) {
                return Err(RigError::config(format!("{cart} is driven by more than one agent")));
            }
            carts.push(cart);
        }
        Ok(Self { session, agents, carts, state: ExperimentState::Starting, report: DeviceReport::default() })
    }

    pub fn state(&self) -> ExperimentState {
        self.state
    }

    pub fn session(&self) -> &NetworkSession<C> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut NetworkSession<C> {
        &mut self.session
    }

    pub fn agents(&self) -> &[Agent<ExperimentalPlant>] {
        &self.agents
    }

    pub fn agent(&self, name: &str) -> Result<&Agent<ExperimentalPlant>> {
        self.agents
            .iter()
            .find(|a| a.name() == name)
            .ok_or_else(|| RigError::invalid_argument(format!("no agent named '{name}'")))
    }

    fn set_state(&mut self, state: ExperimentState) {
        debug!(from = %self.state, to = %state, "Experiment state");
        self.state = state;
    }

    /// Opens the session and runs the controller bring-up.
    pub async fn setup(&mut self) -> Result<()> {
        self.session.bring_up(&self.carts).await
    }

    /// Waits for `T`, routing observations while waiting.
    async fn await_echo<T: PacketType>(&mut self) -> Result<T> {
        let phase = self.state;
        let Self { session, agents, report, carts, .. } = self;
        session
            .get_packet(selectors::any, GetOptions::default(), |buffer| route(buffer, agents, phase, report, carts))
            .await?
            .ok_or_else(|| RigError::connection_failed(format!("no {} echo received", T::KIND.name())))
    }

    /// Digests until every agent in `pending` has a fresh observation, or the
    /// controller ends the experiment.
    ///
    /// The whole wait is bounded by the session's response timeout, however
    /// much other traffic arrives meanwhile.
    async fn await_observations(&mut self, mut pending: Vec<bool>) -> Result<()> {
        let deadline = self.session.config().response_timeout.map(|budget| (Instant::now() + budget, budget));
        loop {
            route(self.session.buffer_mut(), &mut self.agents, self.state, &mut self.report, &self.carts);
            for (waiting, agent) in pending.iter_mut().zip(&mut self.agents) {
                if agent.plant_mut().take_fresh() {
                    *waiting = false;
                }
            }
            if self.report.ended || pending.iter().all(|waiting| !waiting) {
                return Ok(());
            }

            let Some((deadline, budget)) = deadline else {
                self.session.digest(true, true).await?;
                continue;
            };
            if Instant::now() >= deadline {
                return Err(self.observation_timeout(&pending, budget));
            }
            match tokio::time::timeout_at(deadline, self.session.digest(true, true)).await {
                Ok(digested) => {
                    digested?;
                }
                Err(_) => return Err(self.observation_timeout(&pending, budget)),
            }
        }
    }

    fn observation_timeout(&self, pending: &[bool], budget: Duration) -> RigError {
        let missing: Vec<&str> = pending
            .iter()
            .zip(&self.agents)
            .filter(|(waiting, _)| **waiting)
            .map(|(_, agent)| agent.name())
            .collect();
        warn!(agents = ?missing, "No fresh observation before the deadline");
        RigError::timeout(format!("waiting for observations from {}", missing.join(", ")), budget)
    }

    fn clear_fresh(&mut self) {
        for agent in &mut self.agents {
            agent.plant_mut().take_fresh();
        }
    }

    /// Runs the reset protocol and returns each agent's first observation.
    ///
    /// Ping → zero velocity → experiment start → first observations →
    /// jiggle → angle offsets.
    pub async fn reset_experiment(&mut self) -> Result<BTreeMap<String, Observation>> {
        if !self.session.is_ready() {
            return Err(RigError::connection_failed("session is not set up; call setup first"));
        }
        if self.state == ExperimentState::Running {
            self.end_experiment().await?;
        }

        self.set_state(ExperimentState::Starting);
        log_messages(self.session.buffer_mut());
        self.session.buffer_mut().clear();
        self.report = DeviceReport::default();
        self.session.assert_ping_pong().await?;

        for &cart in &self.carts {
            self.session.send_packet(&SetVelocityPacket::new(SetOperation::Equal, cart, 0)).await?;
        }

        self.set_state(ExperimentState::Resetting);
        for agent in &mut self.agents {
            agent.pre_reset();
        }

        self.session.send_packet(&ExperimentStartPacket { timestamp: 0 }).await?;
        let _: ExperimentStartPacket = self.await_echo().await?;
        info!("Experiment started");
        self.await_observations(vec![true; self.agents.len()]).await?;

        self.clear_fresh();
        self.session.send_packet(&DoJigglePacket).await?;
        let _: DoJigglePacket = self.await_echo().await?;
        self.await_observations(vec![true; self.agents.len()]).await?;

        for agent in &mut self.agents {
            if !agent.plant().is_settled() {
                warn!(agent = %agent.name(), "Pendulum not settled after jiggle");
            }
            let offset = agent.plant_mut().set_angle_offset()?;
            info!(agent = %agent.name(), offset, "Angle offset set");
        }

        self.set_state(ExperimentState::Running);
        self.agents.iter().map(|agent| Ok((agent.name().to_string(), agent.observe()?))).collect()
    }

    /// Stops the experiment and waits for the controller to confirm.
    pub async fn end_experiment(&mut self) -> Result<()> {
        self.set_state(ExperimentState::Ending);
        for agent in &mut self.agents {
            agent.halt();
        }
        self.session.send_packet(&ExperimentStopPacket).await?;
        let _: ExperimentStopPacket = self.await_echo().await?;
        self.set_state(ExperimentState::Ended);
        info!("Experiment ended");
        Ok(())
    }

    pub async fn step_experiment(&mut self, actions: &BTreeMap<String, i64>) -> Result<BTreeMap<String, StepResult>> {
        let names = self.agent_names();
        validate_actions(&names, actions)?;
        match self.state {
            ExperimentState::Running | ExperimentState::Ended => {}
            other => {
                return Err(RigError::invalid_argument(format!("cannot step while the experiment is {other}")));
            }
        }

        self.clear_fresh();
        let mut intervals: Vec<Option<Duration>> = vec![None; self.agents.len()];
        let mut pending = vec![false; self.agents.len()];
        for (i, agent) in self.agents.iter_mut().enumerate() {
            let action = actions.get(agent.name()).copied().unwrap_or_default();
            if let Some((command, interval)) = agent.prepare_step(action).await? {
                self.session.send_packet(&command).await?;
                intervals[i] = interval;
                pending[i] = true;
            }
        }

        if pending.iter().any(|p| *p) {
            self.await_observations(pending).await?;
        }

        let mut results = BTreeMap::new();
        for (agent, interval) in self.agents.iter_mut().zip(intervals) {
            let device_failures = self.report.failures.remove(&agent.plant().cart_id()).unwrap_or_default();
            let result = agent.finish_step(device_failures, interval)?;
            results.insert(agent.name().to_string(), result);
        }

        let any_done = self.report.ended || results.values().any(|r| r.done);
        if any_done && self.state == ExperimentState::Running {
            self.end_experiment().await?;
        }
        if any_done {
            for result in results.values_mut() {
                result.done = true;
            }
        }
        Ok(results)
    }
}

#[async_trait::async_trait]
impl<C: ByteChannel> Environment for ExperimentalEnv<C> {
    fn agent_names(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.name().to_string()).collect()
    }

    async fn reset(&mut self) -> Result<BTreeMap<String, Observation>> {
        self.reset_experiment().await
    }

    async fn step(&mut self, actions: &BTreeMap<String, i64>) -> Result<BTreeMap<String, StepResult>> {
        self.step_experiment(actions).await
    }

    fn observe(&self, agent: &str) -> Result<Observation> {
        self.agent(agent)?.observe()
    }

    async fn close(&mut self) -> Result<()> {
        if self.state == ExperimentState::Running {
            self.end_experiment().await?;
        }
        self.session.close().await
    }
}
