//! Wire protocol spoken with the rig controller.
//!
//! Every packet starts with one id byte followed by a fixed payload layout
//! (see [`packets`]). The id → type table lives in [`registry`]; firmware
//! constants such as the boot terminator and the realignment marker live in
//! [`constants`].
//!
//! ## Packet Directions
//!
//! | Direction | Examples |
//! |---|---|
//! | Inbound | [`ObservationPacket`], [`ExperimentDonePacket`], [`ExperimentInfoPacket`] |
//! | Outbound | [`SetVelocityPacket`], [`SetPositionPacket`], [`RequestPacketRealignmentPacket`] |
//! | Bidirectional | [`PingPacket`], [`FindLimitsPacket`], [`DoJigglePacket`], messages |
//!
//! Only [`Outbound`] types can be passed to a session's `send_packet`;
//! only ids whose type can be received are accepted by the packet reader.

pub mod constants;
pub mod packets;
pub mod registry;

pub use constants::{
    BOOT_TERMINATOR, CartId, DeviceFailure, InfoSpecifier, REALIGN_MARKER, SetOperation,
};
pub use packets::{
    CheckLimitPacket, DebugPacket, Direction, DoJigglePacket, ErrorPacket, ExperimentDonePacket,
    ExperimentInfoPacket, ExperimentStartPacket, ExperimentStopPacket, FindLimitsPacket,
    GetPositionPacket, Inbound, InfoPacket, InfoValue, NullPacket, ObservationPacket, Outbound,
    Packet, PacketKind, PacketType, Payload, PingPacket, PongPacket,
    RequestPacketRealignmentPacket, SetPositionPacket, SetVelocityPacket,
};
pub use registry::{PacketRegistry, RegistryEntry};
