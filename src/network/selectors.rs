//! Payload predicates for [`NetworkSession::get_packet`](super::NetworkSession::get_packet).

use crate::protocol::constants::LIMIT_FINDING_DONE;
use crate::protocol::{
    CartId, DebugPacket, ErrorPacket, ExperimentInfoPacket, InfoPacket, InfoSpecifier,
    ObservationPacket, PongPacket,
};

/// Packets carrying a text message.
pub trait HasMessage {
    fn message(&self) -> &str;
}

impl HasMessage for DebugPacket {
    fn message(&self) -> &str {
        &self.message
    }
}

impl HasMessage for InfoPacket {
    fn message(&self) -> &str {
        &self.message
    }
}

impl HasMessage for ErrorPacket {
    fn message(&self) -> &str {
        &self.message
    }
}

/// Packets addressed to one cart, or to the whole rig (`None`).
pub trait HasCart {
    fn cart(&self) -> Option<CartId>;
}

impl HasCart for ObservationPacket {
    fn cart(&self) -> Option<CartId> {
        Some(self.cart_id)
    }
}

impl HasCart for ExperimentInfoPacket {
    fn cart(&self) -> Option<CartId> {
        ExperimentInfoPacket::cart(self)
    }
}

/// Matches any packet of the requested type.
pub fn any<T>(_: &T) -> bool {
    true
}

pub fn message_startswith<T: HasMessage>(prefix: &str) -> impl Fn(&T) -> bool + '_ {
    move |packet| packet.message().starts_with(prefix)
}

/// The info message sent when limit finding has completed.
pub fn limit_finding_done(packet: &InfoPacket) -> bool {
    packet.message.starts_with(LIMIT_FINDING_DONE)
}

/// Packets for `cart`, including rig-wide ones.
pub fn for_cart<T: HasCart>(cart: CartId) -> impl Fn(&T) -> bool {
    move |packet| packet.cart().is_none_or(|c| c == cart)
}

/// Pong echoing `nonce`.
pub fn nonce(nonce: u32) -> impl Fn(&PongPacket) -> bool {
    move |packet| packet.timestamp == nonce
}

pub fn info_specifier(specifier: InfoSpecifier) -> impl Fn(&ExperimentInfoPacket) -> bool {
    move |packet| packet.specifier == specifier
}
