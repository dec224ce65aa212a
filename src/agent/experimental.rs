//! Physical plant: state reconstructed from the controller's observations.

use std::collections::VecDeque;
use std::f64::consts::PI;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::plant::Plant;
use crate::error::{Result, RigError};
use crate::protocol::{CartId, ObservationPacket, SetOperation, SetVelocityPacket};
use crate::types::{Action, ExperimentState, PhysicalState};

/// Per-cart settings of a physical agent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentParams {
    pub cart_id: CartId,
    /// Stepper steps per metre of cart travel.
    pub steps_per_metre: f64,
    /// Velocity change commanded by one action, in controller units.
    pub velocity_increment: i16,
    #[serde(with = "micros")]
    pub observation_max_interval: Duration,
    #[serde(with = "micros")]
    pub action_min_interval: Duration,
    #[serde(with = "micros")]
    pub action_max_interval: Duration,
    /// Largest position range (m) over the history that counts as settled.
    pub settled_x_threshold: f64,
    /// Largest angle range (rad) over the history that counts as settled.
    pub settled_theta_threshold: f64,
    /// Observations kept for [`ExperimentalPlant::is_settled`].
    pub history_len: usize,
}

impl Default for ExperimentParams {
    fn default() -> Self {
        Self {
            cart_id: CartId::One,
            steps_per_metre: 10_000.0,
            velocity_increment: 50,
            observation_max_interval: Duration::from_millis(10),
            action_min_interval: Duration::from_millis(3),
            action_max_interval: Duration::from_millis(10),
            settled_x_threshold: 5.0 / 10_000.0,
            settled_theta_threshold: 0.25f64.to_radians(),
            history_len: 10,
        }
    }
}

impl ExperimentParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.steps_per_metre.is_finite() && self.steps_per_metre > 0.0) {
            return Err(RigError::invalid_argument(format!(
                "steps_per_metre must be positive, got {}",
                self.steps_per_metre
            )));
        }
        if self.action_min_interval > self.action_max_interval {
            return Err(RigError::invalid_argument("action_min_interval exceeds action_max_interval"));
        }
        if self.history_len == 0 {
            return Err(RigError::invalid_argument("history_len must be at least 1"));
        }
        Ok(())
    }
}

/// Durations written as integer microseconds.
mod micros {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_micros()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_micros)
    }
}

/// Event rate over a sliding window of ticks.
#[derive(Debug, Clone)]
pub struct FrequencyTicker {
    window: usize,
    ticks: VecDeque<Instant>,
}

impl Default for FrequencyTicker {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl FrequencyTicker {
    pub fn new(window: usize) -> Self {
        Self { window: window.max(1), ticks: VecDeque::new() }
    }

    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    pub fn tick_at(&mut self, at: Instant) {
        if self.ticks.len() == self.window {
            self.ticks.pop_front();
        }
        self.ticks.push_back(at);
    }

    pub fn clear(&mut self) {
        self.ticks.clear();
    }

    /// Ticks per second over the window; zero until time has passed.
    pub fn measure(&self) -> f64 {
        match (self.ticks.front(), self.ticks.back()) {
            (Some(first), Some(last)) if last > first => {
                self.ticks.len() as f64 / last.duration_since(*first).as_secs_f64()
            }
            _ => 0.0,
        }
    }
}

/// Tracks one cart on the physical rig.
#[derive(Debug)]
pub struct ExperimentalPlant {
    params: ExperimentParams,
    state: Option<PhysicalState>,
    last_observation_micros: Option<u32>,
    last_observation_interval: Option<Duration>,
    last_action: Option<Instant>,
    ticker: FrequencyTicker,
    history: VecDeque<PhysicalState>,
    angle_offset: f64,
    fresh: bool,
}

impl ExperimentalPlant {
    pub fn new(params: ExperimentParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            state: None,
            last_observation_micros: None,
            last_observation_interval: None,
            last_action: None,
            ticker: FrequencyTicker::default(),
            history: VecDeque::with_capacity(params.history_len),
            angle_offset: 0.0,
            fresh: false,
        })
    }

    pub fn params(&self) -> &ExperimentParams {
        &self.params
    }

    pub fn cart_id(&self) -> CartId {
        self.params.cart_id
    }

    pub fn angle_offset(&self) -> f64 {
        self.angle_offset
    }

    pub fn last_observation_interval(&self) -> Option<Duration> {
        self.last_observation_interval
    }

    pub fn action_frequency(&self) -> f64 {
        self.ticker.measure()
    }

    /// Forgets everything observed. Called before each experiment reset.
    pub fn clear(&mut self) {
        self.state = None;
        self.last_observation_micros = None;
        self.last_observation_interval = None;
        self.last_action = None;
        self.ticker.clear();
        self.history.clear();
        self.angle_offset = 0.0;
        self.fresh = false;
    }

    /// Folds an observation into the state. Stale timestamps are ignored.
    ///
    /// Returns whether the observation was used.
    pub fn absorb(&mut self, packet: &ObservationPacket, phase: ExperimentState) -> bool {
        let interval = match self.last_observation_micros {
            Some(last) if packet.timestamp_micros <= last => {
                debug!(cart = %self.params.cart_id, t_us = packet.timestamp_micros, "Ignoring stale observation");
                return false;
            }
            Some(last) => Some(Duration::from_micros(u64::from(packet.timestamp_micros - last))),
            None => None,
        };

        if let Some(interval) = interval {
            if interval > self.params.observation_max_interval && !phase.tolerates_gaps() {
                warn!(
                    cart = %self.params.cart_id,
                    interval = ?interval,
                    maximum = ?self.params.observation_max_interval,
                    "Observation interval too long"
                );
            }
        }

        let x = f64::from(packet.position_steps) / self.params.steps_per_metre;
        let theta = f64::from(packet.angle_degrees).to_radians() - self.angle_offset;
        let (x_dot, theta_dot) = match (self.state, interval) {
            (Some(previous), Some(dt)) if !dt.is_zero() => {
                let dt = dt.as_secs_f64();
                ((x - previous.x) / dt, (theta - previous.theta) / dt)
            }
            _ => (0.0, 0.0),
        };

        let state = PhysicalState { x, x_dot, theta, theta_dot };
        self.state = Some(state);
        self.last_observation_micros = Some(packet.timestamp_micros);
        self.last_observation_interval = interval;
        if self.history.len() == self.params.history_len {
            self.history.pop_front();
        }
        self.history.push_back(state);
        self.fresh = true;
        true
    }

    /// Whether an observation arrived since the last call.
    pub fn take_fresh(&mut self) -> bool {
        std::mem::take(&mut self.fresh)
    }

    /// Position and angle have varied less than their thresholds over the
    /// observation history.
    pub fn is_settled(&self) -> bool {
        if self.history.is_empty() {
            return false;
        }
        let range = |f: fn(&PhysicalState) -> f64| {
            let (lo, hi) = self
                .history
                .iter()
                .map(f)
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
            hi - lo
        };
        range(|s| s.x) <= self.params.settled_x_threshold
            && range(|s| s.theta) <= self.params.settled_theta_threshold
    }

    /// Calibrates the hanging pendulum to read exactly π.
    ///
    /// Returns the new offset.
    pub fn set_angle_offset(&mut self) -> Result<f64> {
        let state = self.state.ok_or_else(|| RigError::StateUnavailable { agent: self.params.cart_id.to_string() })?;
        let raw = state.theta + self.angle_offset;
        let offset = raw - PI;
        self.angle_offset = offset;
        self.state = Some(PhysicalState { theta: PI, theta_dot: 0.0, ..state });
        for past in &mut self.history {
            past.theta -= offset - (raw - state.theta);
        }
        Ok(offset)
    }

    /// How far the hanging angle is from π.
    pub fn angle_drift(&self) -> Result<f64> {
        let state = self.state.ok_or_else(|| RigError::StateUnavailable { agent: self.params.cart_id.to_string() })?;
        Ok(state.theta - PI)
    }

    /// Enforces the minimum action interval, sleeping if needed, and records
    /// the action time. Returns the interval since the previous action.
    pub async fn pace_action(&mut self) -> Option<Duration> {
        let interval = self.last_action.map(|last| last.elapsed());
        if let Some(elapsed) = interval {
            if elapsed < self.params.action_min_interval {
                debug!(cart = %self.params.cart_id, "Action frequency too fast, waiting for minimum interval");
                tokio::time::sleep(self.params.action_min_interval - elapsed).await;
            } else if elapsed > self.params.action_max_interval {
                warn!(
                    cart = %self.params.cart_id,
                    interval = ?elapsed,
                    maximum = ?self.params.action_max_interval,
                    "Action frequency too slow"
                );
            }
        }
        let now = Instant::now();
        self.last_action = Some(now);
        self.ticker.tick_at(now);
        interval
    }

    /// Velocity increment implementing `action`.
    pub fn command(&self, action: Action) -> SetVelocityPacket {
        let value = match action {
            Action::Forward => self.params.velocity_increment,
            Action::Backward => self.params.velocity_increment.saturating_neg(),
        };
        SetVelocityPacket::new(SetOperation::Add, self.params.cart_id, value)
    }
}

impl Plant for ExperimentalPlant {
    fn state(&self) -> Option<PhysicalState> {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(t: u32, steps: i32, degrees: f32) -> ObservationPacket {
        ObservationPacket { timestamp_micros: t, cart_id: CartId::One, position_steps: steps, angle_degrees: degrees }
    }

    fn plant() -> ExperimentalPlant {
        ExperimentalPlant::new(ExperimentParams { steps_per_metre: 1000.0, ..ExperimentParams::default() }).unwrap()
    }

    #[test]
    fn converts_units_and_estimates_velocity() {
        let mut plant = plant();
        assert!(plant.absorb(&observation(1_000, 0, 180.0), ExperimentState::Running));
        assert!(plant.absorb(&observation(11_000, 10, 180.0), ExperimentState::Running));
        let state = plant.state().unwrap();
        assert!((state.x - 0.01).abs() < 1e-12);
        assert!((state.x_dot - 1.0).abs() < 1e-9);
        assert!((state.theta - PI).abs() < 1e-6);
        assert_eq!(plant.last_observation_interval(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn stale_observations_are_ignored() {
        let mut plant = plant();
        assert!(plant.absorb(&observation(5_000, 0, 0.0), ExperimentState::Running));
        assert!(plant.take_fresh());
        assert!(!plant.absorb(&observation(5_000, 99, 0.0), ExperimentState::Running));
        assert!(!plant.absorb(&observation(4_000, 99, 0.0), ExperimentState::Running));
        assert!(!plant.take_fresh());
        assert_eq!(plant.state().unwrap().x, 0.0);
    }

    #[test]
    fn angle_offset_calibrates_to_pi() {
        let mut plant = plant();
        plant.absorb(&observation(1, 0, 183.0), ExperimentState::Resetting);
        let offset = plant.set_angle_offset().unwrap();
        assert!((offset - 3.0f64.to_radians()).abs() < 1e-6);
        assert!(plant.angle_drift().unwrap().abs() < 1e-12);

        plant.absorb(&observation(2, 0, 183.0), ExperimentState::Running);
        assert!((plant.state().unwrap().theta - PI).abs() < 1e-6);
    }

    #[test]
    fn offset_needs_an_observation() {
        let mut plant = plant();
        assert!(matches!(plant.set_angle_offset(), Err(RigError::StateUnavailable { .. })));
    }

    #[test]
    fn settled_over_history() {
        let mut plant = plant();
        assert!(!plant.is_settled());
        for t in 1..=5 {
            plant.absorb(&observation(t * 1_000, 0, 180.0), ExperimentState::Resetting);
        }
        assert!(plant.is_settled());
        plant.absorb(&observation(6_000, 50, 180.0), ExperimentState::Resetting);
        assert!(!plant.is_settled());
    }

    #[test]
    fn clear_forgets_everything() {
        let mut plant = plant();
        plant.absorb(&observation(1, 0, 180.0), ExperimentState::Running);
        plant.clear();
        assert!(plant.state().is_none());
        assert!(!plant.is_settled());
        assert!(plant.absorb(&observation(1, 0, 180.0), ExperimentState::Running));
    }

    #[test]
    fn commands_follow_action_sign() {
        let plant = plant();
        assert_eq!(plant.command(Action::Forward).value, 50);
        assert_eq!(plant.command(Action::Backward).value, -50);
        assert_eq!(plant.command(Action::Forward).operation, SetOperation::Add);
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_enforces_minimum_interval() {
        let mut plant = plant();
        assert_eq!(plant.pace_action().await, None);
        let before = Instant::now();
        let interval = plant.pace_action().await.unwrap();
        assert!(interval < Duration::from_millis(3));
        assert!(before.elapsed() >= Duration::from_millis(3) - interval);
        assert!(plant.action_frequency() > 0.0);
    }

    #[test]
    fn ticker_measures_rate() {
        let mut ticker = FrequencyTicker::new(3);
        let start = Instant::now();
        assert_eq!(ticker.measure(), 0.0);
        for i in 0..5 {
            ticker.tick_at(start + Duration::from_millis(100 * i));
        }
        // Window keeps the last three ticks: 200 ms apart end to end.
        assert!((ticker.measure() - 15.0).abs() < 1e-9);
    }
}
