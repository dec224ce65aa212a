//! Byte channels a [`NetworkSession`](super::NetworkSession) can own.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{debug, info};

use crate::error::{Result, RigError};
use crate::protocol::constants::DEFAULT_BAUD_RATE;

/// Opens the bidirectional byte stream to a controller.
#[async_trait]
pub trait ByteChannel: Send {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    async fn connect(&mut self) -> Result<Self::Stream>;

    /// Human-readable endpoint description for logs.
    fn describe(&self) -> String;
}

/// Serial port to the controller, 8N1 without flow control.
///
/// Reads and writes are non-blocking on the port's file descriptor, so a
/// read that finds nothing never holds up the next write.
pub struct SerialChannel {
    path: PathBuf,
    baud_rate: u32,
    opened: Option<SerialStream>,
}

impl SerialChannel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), baud_rate: DEFAULT_BAUD_RATE, opened: None }
    }

    /// Wraps a port that is already open, such as one end of a
    /// pseudo-terminal pair. The first connect hands it out as is.
    pub fn from_stream(path: impl Into<PathBuf>, stream: SerialStream) -> Self {
        Self { opened: Some(stream), ..Self::new(path) }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

impl std::fmt::Debug for SerialChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialChannel")
            .field("path", &self.path)
            .field("baud_rate", &self.baud_rate)
            .field("preopened", &self.opened.is_some())
            .finish()
    }
}

#[async_trait]
impl ByteChannel for SerialChannel {
    type Stream = SerialStream;

    async fn connect(&mut self) -> Result<Self::Stream> {
        if let Some(stream) = self.opened.take() {
            debug!(path = %self.path.display(), "Using pre-opened serial port");
            return Ok(stream);
        }
        info!(path = %self.path.display(), baud_rate = self.baud_rate, "Opening serial port");
        tokio_serial::new(self.path.to_string_lossy(), self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                RigError::connection_failed_with_source(
                    format!("could not open {}", self.path.display()),
                    Box::new(e),
                )
            })
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.path.display(), self.baud_rate)
    }
}

/// In-process channel backed by a [`DuplexStream`].
///
/// The other end is handed to whoever plays the controller. A memory
/// channel can be connected once.
#[derive(Debug)]
pub struct MemoryChannel {
    stream: Option<DuplexStream>,
}

impl MemoryChannel {
    /// Returns the channel and the peer's end of the stream.
    pub fn pair(capacity: usize) -> (Self, DuplexStream) {
        let (host, peer) = tokio::io::duplex(capacity);
        (Self { stream: Some(host) }, peer)
    }
}

#[async_trait]
impl ByteChannel for MemoryChannel {
    type Stream = DuplexStream;

    async fn connect(&mut self) -> Result<Self::Stream> {
        debug!("Connecting memory channel");
        self.stream
            .take()
            .ok_or_else(|| RigError::connection_failed("memory channel was already connected"))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn memory_channel_connects_once() {
        let (mut channel, mut peer) = MemoryChannel::pair(64);
        let mut stream = channel.connect().await.unwrap();

        stream.write_all(b"ping").await.unwrap();
        let mut received = [0u8; 4];
        peer.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"ping");

        assert!(matches!(channel.connect().await, Err(RigError::Connection { .. })));
    }

    #[tokio::test]
    async fn missing_serial_device_is_a_connection_error() {
        let mut channel = SerialChannel::new("/nonexistent/cartpole-rig-tty");
        let error = channel.connect().await.unwrap_err();
        assert!(matches!(error, RigError::Connection { source: Some(_), .. }));
        assert!(channel.describe().contains("74880"));
    }
}
