//! Session with one controller over one byte channel.
//!
//! [`NetworkSession`] owns the channel's stream, turns bytes into packets
//! ([`digest`](NetworkSession::digest) is the only place this happens) and
//! buffers them for selective retrieval. All writes go through
//! [`send_packet`](NetworkSession::send_packet).
//!
//! ## Waiting
//!
//! Blocking retrievals re-poll the channel until a matching packet arrives.
//! Each wait is bounded by the configured response timeout and races the
//! session's [`CancellationToken`]; a timeout of `None` waits indefinitely.
//!
//! ## Realignment
//!
//! When the front of the inbox holds an unknown id or an undecodable payload,
//! the session asks the controller to emit
//! [`REALIGN_MARKER`], discards everything up to and including it, logs the
//! discarded bytes and yields a [`NullPacket`] in place of the lost read.

use std::collections::HashSet;
use std::time::Duration;

use futures::FutureExt;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{Result, RigError};
use crate::logging::{CONTROLLER_TARGET, OBSERVATION_TARGET};
use crate::protocol::constants::{BOOT_TERMINATOR, REALIGN_MARKER};
use crate::protocol::{
    CartId, ExperimentInfoPacket, FindLimitsPacket, InfoSpecifier, InfoValue, NullPacket,
    Outbound, Packet, PacketType, PingPacket, PongPacket, RequestPacketRealignmentPacket,
    SetOperation, SetVelocityPacket,
};

use super::buffer::PacketBuffer;
use super::channel::ByteChannel;
use super::dump::{dump, hexstr, spaced_ascii};
use super::reader::{Endpoint, PacketReader, ReadOutcome, find};
use super::selectors;

const READ_CHUNK: usize = 512;

/// Timing parameters of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Bound on any blocking wait for a response packet.
    pub response_timeout: Option<Duration>,
    /// How long a partially received packet may wait for its remaining bytes.
    pub read_timeout: Duration,
    /// Bound on waiting for the realignment marker.
    pub realign_timeout: Option<Duration>,
    /// Pause after the boot banner before flushing residual input.
    pub settle_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            response_timeout: Some(Duration::from_secs(30)),
            read_timeout: Duration::from_millis(100),
            realign_timeout: Some(Duration::from_secs(5)),
            settle_delay: Duration::from_millis(25),
        }
    }
}

/// Options for [`NetworkSession::get_packet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetOptions {
    /// Remove the returned packet from the buffer.
    pub pop: bool,
    /// Digest newly arrived bytes before scanning.
    pub digest: bool,
    /// Keep digesting until a match appears. Requires `digest`.
    pub block: bool,
    pub auto_realign: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self { pop: true, digest: true, block: true, auto_realign: true }
    }
}

impl GetOptions {
    /// Scan what is already buffered (after one digest) without waiting.
    pub fn non_blocking() -> Self {
        Self { block: false, ..Self::default() }
    }

    pub fn peek() -> Self {
        Self { pop: false, ..Self::default() }
    }
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    fn after(budget: Option<Duration>) -> Option<Self> {
        budget.map(|budget| Self { at: Instant::now() + budget, budget })
    }
}

/// Owns the channel, the decoder and the packet buffer.
pub struct NetworkSession<C: ByteChannel> {
    channel: C,
    stream: Option<C::Stream>,
    reader: PacketReader,
    buffer: PacketBuffer,
    config: SessionConfig,
    cancel: CancellationToken,
    rng: ChaCha8Rng,
    ready: bool,
    track_length_steps: Option<i32>,
}

impl<C: ByteChannel> std::fmt::Debug for NetworkSession<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkSession")
            .field("channel", &self.channel.describe())
            .field("open", &self.stream.is_some())
            .field("ready", &self.ready)
            .field("buffered", &self.buffer.len())
            .field("in_waiting", &self.reader.in_waiting())
            .finish()
    }
}

impl<C: ByteChannel> NetworkSession<C> {
    pub fn new(channel: C, config: SessionConfig) -> Self {
        Self {
            channel,
            stream: None,
            reader: PacketReader::new(Endpoint::Host),
            buffer: PacketBuffer::new(),
            config,
            cancel: CancellationToken::new(),
            rng: ChaCha8Rng::from_entropy(),
            ready: false,
            track_length_steps: None,
        }
    }

    /// Ties blocking waits to `parent`: cancelling it aborts them.
    pub fn with_cancellation(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    /// Seeds the ping nonce generator.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Whether the bring-up handshake has completed.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Track length reported by the controller during bring-up, if any.
    pub fn track_length_steps(&self) -> Option<i32> {
        self.track_length_steps
    }

    pub fn buffer(&self) -> &PacketBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut PacketBuffer {
        &mut self.buffer
    }

    /// Bytes received but not yet decoded into packets.
    pub fn in_waiting(&self) -> usize {
        self.reader.in_waiting()
    }

    /// Opens the channel. Opening an open session is a no-op.
    pub async fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            debug!("Session already open");
            return Ok(());
        }
        let stream = self.channel.connect().await?;
        info!(channel = %self.channel.describe(), "Session opened");
        self.stream = Some(stream);
        Ok(())
    }

    /// Closes the channel. Closing a closed session is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        self.ready = false;
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        if let Err(e) = stream.shutdown().await {
            warn!(error = %e, "Error shutting down channel");
        }
        info!(channel = %self.channel.describe(), "Session closed");
        Ok(())
    }

    /// Serialises and writes one outbound packet.
    ///
    /// The write is bounded by the response timeout and stops on
    /// cancellation.
    pub async fn send_packet<P: Outbound>(&mut self, packet: &P) -> Result<()> {
        let bytes = packet.to_bytes()?;
        let operation = format!("sending {}", P::KIND.name());
        let deadline = Deadline::after(self.config.response_timeout);
        let stream = self.stream.as_mut().ok_or_else(|| RigError::connection_failed("session is not open"))?;

        let write = async {
            stream.write_all(&bytes).await?;
            stream.flush().await
        };
        let bounded = async {
            match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline.at, write)
                    .await
                    .map_err(|_| RigError::timeout(operation.as_str(), deadline.budget)),
                None => Ok(write.await),
            }
        };

        tokio::select! {
            _ = self.cancel.cancelled() => return Err(RigError::cancelled(operation.as_str())),
            result = bounded => {
                result?.map_err(|e| RigError::connection_failed_with_source("write failed", Box::new(e)))?;
            }
        }
        trace!(packet = P::KIND.name(), bytes = %hexstr(&bytes), "Sent packet");
        Ok(())
    }

    /// Moves every byte that is available right now into the inbox.
    async fn pull_available(&mut self) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or_else(|| RigError::connection_failed("session is not open"))?;
        let mut chunk = [0u8; READ_CHUNK];
        let mut total = 0;
        loop {
            let result = stream.read(&mut chunk).now_or_never();
            match result {
                Some(Ok(0)) => return Err(RigError::connection_failed("channel closed by peer")),
                Some(Ok(n)) => {
                    self.reader.extend(&chunk[..n]);
                    total += n;
                }
                Some(Err(e)) => {
                    return Err(RigError::connection_failed_with_source("read failed", Box::new(e)));
                }
                None => return Ok(total),
            }
        }
    }

    /// Waits for at least one more byte, then pulls whatever else is available.
    async fn wait_for_bytes(&mut self, deadline: Option<Deadline>, operation: &str) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or_else(|| RigError::connection_failed("session is not open"))?;
        let mut chunk = [0u8; READ_CHUNK];

        let read = async {
            match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline.at, stream.read(&mut chunk))
                    .await
                    .map_err(|_| RigError::timeout(operation, deadline.budget)),
                None => Ok(stream.read(&mut chunk).await),
            }
        };

        let n = tokio::select! {
            _ = self.cancel.cancelled() => return Err(RigError::cancelled(operation)),
            result = read => match result? {
                Ok(0) => return Err(RigError::connection_failed("channel closed by peer")),
                Ok(n) => n,
                Err(e) => return Err(RigError::connection_failed_with_source("read failed", Box::new(e))),
            },
        };

        self.reader.extend(&chunk[..n]);
        Ok(n + self.pull_available().await?)
    }

    /// Decodes everything currently in the inbox into `packets`.
    async fn decode_available(&mut self, auto_realign: bool, packets: &mut Vec<Packet>) -> Result<()> {
        loop {
            match self.reader.try_read() {
                ReadOutcome::Packet(packet) => {
                    log_packet(&packet);
                    packets.push(packet);
                }
                ReadOutcome::Incomplete => {
                    let Some(id) = self.reader.peek_id() else {
                        return Ok(());
                    };
                    let deadline = Deadline::after(Some(self.config.read_timeout));
                    match self.wait_for_bytes(deadline, "reading packet payload").await {
                        Ok(_) => continue,
                        Err(RigError::Timeout { .. }) => {
                            let reason = format!(
                                "Payload incomplete after {:?} ({} bytes received)",
                                self.config.read_timeout,
                                self.reader.in_waiting()
                            );
                            packets.push(self.read_failed(id, reason, auto_realign).await?);
                        }
                        Err(e) => return Err(e),
                    }
                }
                ReadOutcome::Unknown { id } => {
                    let reason = "Unknown packet id".to_string();
                    packets.push(self.read_failed(id, reason, auto_realign).await?);
                }
                ReadOutcome::Malformed { id, error } => {
                    packets.push(self.read_failed(id, error.to_string(), auto_realign).await?);
                }
            }
        }
    }

    /// Handles a failed read: realign, or surface a packet read error.
    async fn read_failed(&mut self, id: u8, reason: String, auto_realign: bool) -> Result<Packet> {
        if !auto_realign {
            let remaining = self.reader.take_all();
            return Err(RigError::PacketRead { id, reason, dump: dump(&remaining) });
        }
        warn!(id = %format!("{id:#04x}"), reason = %reason, "Packet read failed, realigning");
        self.realign().await?;
        Ok(Packet::Null(NullPacket))
    }

    /// Requests realignment and discards input through the marker.
    pub async fn realign(&mut self) -> Result<()> {
        self.send_packet(&RequestPacketRealignmentPacket).await?;
        let deadline = Deadline::after(self.config.realign_timeout);
        let discarded = loop {
            if let Some(discarded) = self.reader.discard_through(REALIGN_MARKER) {
                break discarded;
            }
            self.wait_for_bytes(deadline, "packet realignment").await?;
        };
        warn!(
            discarded = discarded.len(),
            hex = %hexstr(&discarded),
            ascii = %spaced_ascii(&discarded),
            "Realigned packet stream"
        );
        Ok(())
    }

    /// Reads all packets decodable from the bytes available now.
    ///
    /// With `block`, keeps waiting until at least one packet is produced.
    pub async fn read_packets(&mut self, block: bool, auto_realign: bool) -> Result<Vec<Packet>> {
        let deadline = Deadline::after(self.config.response_timeout);
        let mut packets = Vec::new();
        loop {
            if self.stream.is_some() {
                self.pull_available().await?;
            }
            self.decode_available(auto_realign, &mut packets).await?;
            if !block || !packets.is_empty() {
                return Ok(packets);
            }
            self.wait_for_bytes(deadline, "reading packets").await?;
        }
    }

    /// Reads all available packets into the buffer. Returns how many arrived.
    pub async fn digest(&mut self, block: bool, auto_realign: bool) -> Result<usize> {
        let packets = self.read_packets(block, auto_realign).await?;
        let count = packets.len();
        self.buffer.extend(packets);
        Ok(count)
    }

    /// Retrieves the first buffered packet of type `T` matching `selector`.
    ///
    /// `on_digest` runs after every digest, before the buffer is scanned, so
    /// the caller can route packets it owns while this call waits. Returns
    /// `None` only when not blocking.
    pub async fn get_packet<T, S, F>(
        &mut self,
        selector: S,
        options: GetOptions,
        on_digest: F,
    ) -> Result<Option<T>>
    where
        T: PacketType,
        S: Fn(&T) -> bool,
        F: FnMut(&mut PacketBuffer),
    {
        let mut exclude = HashSet::new();
        Ok(self.get_packet_excluding(&selector, options, on_digest, &mut exclude).await?.map(|(_, p)| p))
    }

    /// Retrieves every buffered packet of type `T` matching `selector`.
    ///
    /// With `block`, waits until at least one matches. Each packet is
    /// returned once even when `pop` is false.
    pub async fn get_packets<T, S>(&mut self, selector: S, options: GetOptions) -> Result<Vec<T>>
    where
        T: PacketType,
        S: Fn(&T) -> bool,
    {
        let mut exclude = HashSet::new();
        let mut found = Vec::new();
        let mut options = options;
        while let Some((_, packet)) =
            self.get_packet_excluding(&selector, options, |_| {}, &mut exclude).await?
        {
            found.push(packet);
            options = GetOptions { digest: false, block: false, ..options };
        }
        Ok(found)
    }

    async fn get_packet_excluding<T, S, F>(
        &mut self,
        selector: &S,
        options: GetOptions,
        mut on_digest: F,
        exclude: &mut HashSet<u64>,
    ) -> Result<Option<(u64, T)>>
    where
        T: PacketType,
        S: Fn(&T) -> bool,
        F: FnMut(&mut PacketBuffer),
    {
        if options.block && !options.digest {
            return Err(RigError::invalid_argument("cannot block without digesting"));
        }
        let operation = format!("waiting for {}", T::KIND.name());
        let deadline = Deadline::after(self.config.response_timeout);

        loop {
            if options.digest {
                self.digest(false, options.auto_realign).await?;
                on_digest(&mut self.buffer);
            }

            if let Some((seq, packet)) = self.buffer.find::<T, _>(selector, exclude) {
                let packet = packet.clone();
                exclude.insert(seq);
                if options.pop {
                    self.buffer.remove(seq);
                }
                return Ok(Some((seq, packet)));
            }

            if !options.block {
                return Ok(None);
            }
            self.wait_for_bytes(deadline, &operation).await?;
        }
    }

    /// Blocking retrieval with default options and no digest hook.
    pub async fn expect_packet<T, S>(&mut self, selector: S) -> Result<T>
    where
        T: PacketType,
        S: Fn(&T) -> bool,
    {
        self.get_packet(selector, GetOptions::default(), |_| {})
            .await?
            .ok_or_else(|| RigError::connection_failed(format!("no {} received", T::KIND.name())))
    }

    /// Sends a ping with a random nonce and requires the matching pong.
    pub async fn assert_ping_pong(&mut self) -> Result<()> {
        let stale = self.buffer.drain_type::<PongPacket>();
        if !stale.is_empty() {
            debug!(count = stale.len(), "Discarded stale pong packets");
        }

        let nonce: u32 = self.rng.r#gen();
        self.send_packet(&PingPacket { timestamp: nonce }).await?;
        let pong: PongPacket = self.expect_packet(selectors::any).await?;

        if pong.timestamp != nonce {
            return Err(RigError::connection_failed(format!(
                "ping nonce {nonce:#010x} answered with {:#010x}",
                pong.timestamp
            )));
        }
        debug!(nonce, "Ping-pong succeeded");
        Ok(())
    }

    /// Reads the controller's boot banner up to its terminator.
    ///
    /// Any input following the banner is discarded after a short settle
    /// delay. Returns the banner text.
    pub async fn read_initial_output(&mut self) -> Result<String> {
        let deadline = Deadline::after(self.config.response_timeout);
        self.pull_available().await?;
        let end = loop {
            if let Some(position) = find(self.reader.pending(), BOOT_TERMINATOR) {
                break position + BOOT_TERMINATOR.len();
            }
            self.wait_for_bytes(deadline, "reading boot banner").await?;
        };

        let mut pending = self.reader.take_all();
        let residual = pending.split_off(end);
        let banner = String::from_utf8_lossy(&pending).into_owned();
        for line in banner.lines() {
            info!(target: CONTROLLER_TARGET, "{}", line);
        }

        tokio::time::sleep(self.config.settle_delay).await;
        self.pull_available().await?;
        let flushed = residual.len() + self.reader.take_all().len();
        if flushed > 0 {
            debug!(bytes = flushed, "Flushed input after boot banner");
        }
        Ok(banner)
    }

    /// Runs the device bring-up handshake.
    ///
    /// Open → boot banner → ping-pong → limit finding → zero velocity for
    /// each cart → flush messages → ready.
    pub async fn bring_up(&mut self, carts: &[CartId]) -> Result<()> {
        self.open().await?;
        self.read_initial_output().await?;
        self.assert_ping_pong().await?;

        info!("Finding limits");
        self.send_packet(&FindLimitsPacket).await?;
        let _: Option<FindLimitsPacket> =
            self.get_packet(selectors::any, GetOptions::default(), log_messages).await?;
        info!("Limits found");

        for &cart in carts {
            self.send_packet(&SetVelocityPacket::new(SetOperation::Equal, cart, 0)).await?;
        }

        self.digest(false, true).await?;
        log_messages(&mut self.buffer);
        for info in self.buffer.drain_type::<ExperimentInfoPacket>() {
            self.record_info(&info);
        }

        self.ready = true;
        info!("Session ready");
        Ok(())
    }

    fn record_info(&mut self, info: &ExperimentInfoPacket) {
        if let (InfoSpecifier::TrackLengthSteps, InfoValue::Int(steps)) = (info.specifier, info.value) {
            debug!(cart = info.cart_id, steps, "Track length reported");
            self.track_length_steps = Some(steps);
        }
    }

    /// Logs every packet as it arrives.
    ///
    /// With `continuous`, keeps going until cancelled; otherwise logs what is
    /// available now and returns.
    pub async fn dump_packets(&mut self, continuous: bool) -> Result<()> {
        loop {
            match self.read_packets(continuous, true).await {
                Ok(packets) => {
                    for packet in packets {
                        info!(id = %format!("{:#04x}", packet.id()), packet = ?packet, "Packet");
                    }
                }
                Err(RigError::Timeout { .. }) if continuous => continue,
                Err(RigError::Cancelled { .. }) if continuous => return Ok(()),
                Err(e) => return Err(e),
            }
            if !continuous {
                return Ok(());
            }
        }
    }
}

impl<C: ByteChannel> Drop for NetworkSession<C> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Drains message packets from the buffer into the log.
pub fn log_messages(buffer: &mut PacketBuffer) {
    for packet in buffer.drain_where(|p| p.message().is_some()) {
        match packet {
            Packet::Error(p) => warn!(target: CONTROLLER_TARGET, "{}", p.message),
            Packet::Info(p) => info!(target: CONTROLLER_TARGET, "{}", p.message),
            Packet::Debug(p) => debug!(target: CONTROLLER_TARGET, "{}", p.message),
            _ => {}
        }
    }
}

fn log_packet(packet: &Packet) {
    match packet {
        Packet::Observation(p) => trace!(
            target: OBSERVATION_TARGET,
            cart = %p.cart_id,
            t_us = p.timestamp_micros,
            steps = p.position_steps,
            angle = p.angle_degrees,
            "Read observation"
        ),
        Packet::Null(_) => {}
        other => trace!(packet = ?other, "Read packet"),
    }
}
