//! Incremental packet decoder over an inbox of raw bytes.
//!
//! The reader never blocks: bytes are appended with [`PacketReader::extend`]
//! as they arrive and [`PacketReader::try_read`] reports whether the front
//! of the inbox holds a complete packet, an incomplete one, or garbage.
//! Waiting for more bytes and realignment are the session's job.
//!
//! ```text
//! ReadID ──► Lookup ──► ReadPayload ──► Done
//!               │             │
//!               ▼             ▼
//!           Unknown       Malformed ──► (session) Realign
//! ```

use crate::codec::{DecodeError, Reader};
use crate::protocol::{Packet, PacketRegistry, RegistryEntry};

/// Which end of the link this reader decodes for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Accepts packets the controller may send.
    Host,
    /// Accepts packets the host may send.
    Controller,
}

/// Result of one decode attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    Packet(Packet),
    /// No bytes, or the packet at the front is not fully received yet.
    Incomplete,
    /// The id byte is not a packet this endpoint can receive.
    Unknown { id: u8 },
    /// The payload failed to decode.
    Malformed { id: u8, error: DecodeError },
}

#[derive(Debug)]
pub struct PacketReader {
    inbox: Vec<u8>,
    registry: &'static PacketRegistry,
    endpoint: Endpoint,
}

impl Default for PacketReader {
    fn default() -> Self {
        Self::new(Endpoint::Host)
    }
}

impl PacketReader {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { inbox: Vec::new(), registry: PacketRegistry::standard(), endpoint }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.inbox.extend_from_slice(bytes);
    }

    /// Bytes received but not yet decoded.
    pub fn in_waiting(&self) -> usize {
        self.inbox.len()
    }

    pub fn pending(&self) -> &[u8] {
        &self.inbox
    }

    /// Id byte at the front of the inbox.
    pub fn peek_id(&self) -> Option<u8> {
        self.inbox.first().copied()
    }

    fn lookup(&self, id: u8) -> Option<&'static RegistryEntry> {
        match self.endpoint {
            Endpoint::Host => self.registry.inbound(id),
            Endpoint::Controller => self.registry.outbound(id),
        }
    }

    /// Attempts to decode the packet at the front of the inbox.
    ///
    /// On success the packet's bytes are consumed. On any other outcome the
    /// inbox is left untouched.
    pub fn try_read(&mut self) -> ReadOutcome {
        let Some(id) = self.peek_id() else {
            return ReadOutcome::Incomplete;
        };
        let Some(entry) = self.lookup(id) else {
            return ReadOutcome::Unknown { id };
        };

        let mut reader = Reader::new(&self.inbox[1..]);
        let result = (entry.decode)(&mut reader);
        let consumed = 1 + reader.consumed();

        match result {
            Ok(packet) => {
                self.inbox.drain(..consumed);
                ReadOutcome::Packet(packet)
            }
            Err(DecodeError::ShortRead { .. }) => ReadOutcome::Incomplete,
            Err(error) => ReadOutcome::Malformed { id, error },
        }
    }

    /// Discards everything up to and including the first `marker`.
    ///
    /// Returns the discarded bytes, or `None` if the marker has not been
    /// received yet (nothing is discarded in that case).
    pub fn discard_through(&mut self, marker: &[u8]) -> Option<Vec<u8>> {
        let end = find(&self.inbox, marker)? + marker.len();
        Some(self.inbox.drain(..end).collect())
    }

    /// Empties the inbox, returning its contents.
    pub fn take_all(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.inbox)
    }
}

/// Position of the first occurrence of `needle` in `haystack`.
pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}
