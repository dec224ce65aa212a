//! Host side of the controller link.
//!
//! Bytes flow from a [`ByteChannel`] into a [`PacketReader`], decoded packets
//! land in a [`PacketBuffer`], and callers pull what they need out of the
//! buffer through [`NetworkSession::get_packet`] and the [`selectors`].

pub mod buffer;
pub mod channel;
pub mod dump;
pub mod reader;
pub mod selectors;
mod session;


pub use buffer::{BufferedPacket, PacketBuffer};
pub use channel::{ByteChannel, MemoryChannel, SerialChannel};
pub use reader::{Endpoint, PacketReader, ReadOutcome};
pub use session::{GetOptions, NetworkSession, SessionConfig, log_messages};
