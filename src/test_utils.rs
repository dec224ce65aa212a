//! Test utilities: a scripted stand-in for the rig controller.
//!
//! [`FakeController`] plays the firmware's side of a [`MemoryChannel`]
//! link, or of any other byte stream such as a pseudo-terminal: it prints a boot banner, answers pings, echoes limit finding,
//! jiggle and experiment start/stop, honours realignment requests and emits
//! observations for each cart it drives. Behaviour can be skewed through
//! [`FakeControllerConfig`] to exercise the host's error paths.
//!
//! [`MemoryChannel`]: crate::network::MemoryChannel

#![cfg(any(test, feature = "benchmark"))]

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tokio::time::Interval;
use tracing::debug;

use crate::error::{Result, RigError};
use crate::network::reader::{Endpoint, PacketReader, ReadOutcome};
use crate::protocol::constants::{BOOT_TERMINATOR, LIMIT_FINDING_DONE, REALIGN_MARKER};
use crate::protocol::{
    CartId, DeviceFailure, DoJigglePacket, ExperimentDonePacket, ExperimentInfoPacket,
    ExperimentStartPacket, ExperimentStopPacket, FindLimitsPacket, InfoPacket, InfoSpecifier,
    InfoValue, ObservationPacket, Packet, PongPacket, SetOperation,
};

/// Behaviour knobs for [`FakeController`].
#[derive(Debug, Clone)]
pub struct FakeControllerConfig {
    pub carts: Vec<CartId>,
    /// Send the boot banner as soon as the controller starts.
    pub banner: bool,
    /// Added to every pong's echoed nonce; non-zero simulates a bad echo.
    pub pong_offset: u32,
    /// Raw bytes written in place of the first pong.
    ///
    /// The pong is held back until the host requests realignment.
    pub garbage_before_pong: Option<Vec<u8>>,
    /// Pendulum angle reported while hanging at rest, in degrees.
    pub rest_angle_degrees: f32,
    /// Stepper steps moved per unit of commanded velocity per observation.
    pub steps_per_velocity: i32,
    pub track_length_steps: i32,
    /// Reported as the experiment's failure once a cart passes this position.
    pub failure_position_steps: Option<i32>,
    /// Also stream observations at this period while an experiment runs.
    pub stream_interval: Option<Duration>,
}

impl Default for FakeControllerConfig {
    fn default() -> Self {
        Self {
            carts: vec![CartId::One],
            banner: true,
            pong_offset: 0,
            garbage_before_pong: None,
            rest_angle_degrees: 180.0,
            steps_per_velocity: 1,
            track_length_steps: 10_000,
            failure_position_steps: None,
            stream_interval: None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct CartState {
    position_steps: i32,
    velocity: i32,
}

/// Everything the fake controller received, in order.
#[derive(Debug, Default, Clone)]
pub struct ControllerLog {
    pub received: Vec<Packet>,
}

impl ControllerLog {
    pub fn count<F: Fn(&Packet) -> bool>(&self, predicate: F) -> usize {
        self.received.iter().filter(|p| predicate(p)).count()
    }
}

/// Completes at the next tick, or never without a ticker.
async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

pub struct FakeController<S = DuplexStream> {
    stream: S,
    reader: PacketReader,
    config: FakeControllerConfig,
    carts: BTreeMap<CartId, CartState>,
    running: bool,
    clock_micros: u32,
    held_pong: Option<PongPacket>,
    log: ControllerLog,
}

impl<S> FakeController<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(stream: S, config: FakeControllerConfig) -> Self {
        let carts = config.carts.iter().map(|&cart| (cart, CartState::default())).collect();
        Self {
            stream,
            reader: PacketReader::new(Endpoint::Controller),
            config,
            carts,
            running: false,
            clock_micros: 0,
            held_pong: None,
            log: ControllerLog::default(),
        }
    }

    /// Runs the controller on its own task until the host hangs up.
    pub fn spawn(stream: S, config: FakeControllerConfig) -> JoinHandle<Result<ControllerLog>> {
        tokio::spawn(Self::new(stream, config).run())
    }

    pub async fn run(mut self) -> Result<ControllerLog> {
        if self.config.banner {
            self.write(b"Cartpole controller\nSelf test OK\n").await?;
            self.write(BOOT_TERMINATOR).await?;
        }

        let mut chunk = [0u8; 256];
        let mut ticker = self.config.stream_interval.map(tokio::time::interval);
        loop {
            let running = self.running;
            let n = tokio::select! {
                read = self.stream.read(&mut chunk) => match read {
                    Ok(0) | Err(_) => return Ok(self.log),
                    Ok(n) => n,
                },
                _ = tick(&mut ticker), if running => {
                    self.send_observations(self.config.rest_angle_degrees).await?;
                    continue;
                }
            };
            self.reader.extend(&chunk[..n]);
            loop {
                match self.reader.try_read() {
                    ReadOutcome::Packet(packet) => self.handle(packet).await?,
                    ReadOutcome::Incomplete => break,
                    ReadOutcome::Unknown { id } | ReadOutcome::Malformed { id, .. } => {
                        return Err(RigError::UnknownPacket { id });
                    }
                }
            }
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await.map_err(|e| RigError::io("fake controller write", e))
    }

    async fn send(&mut self, packet: impl Into<Packet>) -> Result<()> {
        let bytes = packet.into().encode()?;
        self.write(&bytes).await
    }

    async fn send_observations(&mut self, angle_degrees: f32) -> Result<()> {
        let carts: Vec<_> = self.carts.iter().map(|(&cart, &state)| (cart, state)).collect();
        for (cart_id, state) in carts {
            self.clock_micros = self.clock_micros.wrapping_add(10_000);
            self.send(ObservationPacket {
                timestamp_micros: self.clock_micros,
                cart_id,
                position_steps: state.position_steps,
                angle_degrees,
            })
            .await?;
        }
        Ok(())
    }

    fn failed_cart(&self) -> Option<(CartId, DeviceFailure)> {
        let limit = self.config.failure_position_steps?;
        self.carts.iter().find_map(|(&cart, state)| {
            if state.position_steps > limit {
                Some((cart, DeviceFailure::PositionRight))
            } else if state.position_steps < -limit {
                Some((cart, DeviceFailure::PositionLeft))
            } else {
                None
            }
        })
    }

    async fn handle(&mut self, packet: Packet) -> Result<()> {
        debug!(packet = ?packet, "Fake controller received");
        self.log.received.push(packet.clone());
        let rest = self.config.rest_angle_degrees;

        match packet {
            Packet::Ping(ping) => {
                let pong = PongPacket { timestamp: ping.timestamp.wrapping_add(self.config.pong_offset) };
                match self.config.garbage_before_pong.take() {
                    Some(garbage) => {
                        self.write(&garbage).await?;
                        self.held_pong = Some(pong);
                    }
                    None => self.send(pong).await?,
                }
            }
            Packet::RequestRealignment(_) => {
                self.write(REALIGN_MARKER).await?;
                if let Some(pong) = self.held_pong.take() {
                    self.send(pong).await?;
                }
            }
            Packet::FindLimits(_) => {
                self.send(InfoPacket::new(LIMIT_FINDING_DONE)).await?;
                self.send(ExperimentInfoPacket {
                    specifier: InfoSpecifier::TrackLengthSteps,
                    cart_id: 0,
                    value: InfoValue::Int(self.config.track_length_steps),
                })
                .await?;
                self.send(FindLimitsPacket).await?;
            }
            Packet::SetVelocity(command) => {
                let stepping = self.running && command.operation == SetOperation::Add;
                let steps = self.config.steps_per_velocity;
                if let Some(state) = self.carts.get_mut(&command.cart_id) {
                    let value = i32::from(command.value);
                    state.velocity = match command.operation {
                        SetOperation::Add => state.velocity + value,
                        SetOperation::Subtract => state.velocity - value,
                        SetOperation::Equal => value,
                        SetOperation::Nul => state.velocity,
                    };
                    if stepping {
                        state.position_steps += state.velocity * steps;
                    }
                }
                if stepping {
                    let last_cart = self.carts.keys().last().copied();
                    if last_cart == Some(command.cart_id) {
                        self.send_observations(rest).await?;
                    }
                    if let Some((cart, failure)) = self.failed_cart() {
                        self.running = false;
                        self.send(ExperimentDonePacket { cart_id: cart.as_u8(), failure }).await?;
                    }
                }
            }
            Packet::ExperimentStart(_) => {
                self.running = true;
                for state in self.carts.values_mut() {
                    *state = CartState::default();
                }
                self.send(ExperimentStartPacket { timestamp: self.clock_micros }).await?;
                self.send_observations(rest).await?;
            }
            Packet::DoJiggle(_) => {
                self.send(DoJigglePacket).await?;
                self.send_observations(rest).await?;
            }
            Packet::ExperimentStop(_) => {
                self.running = false;
                self.send(ExperimentStopPacket).await?;
                self.send(ExperimentDonePacket { cart_id: 0, failure: DeviceFailure::Nul }).await?;
            }
            _ => {}
        }
        Ok(())
    }
}
