//! Concrete packet types and the closed [`Packet`] enum.
//!
//! Every packet is a plain value: built once, compared field-wise, never
//! mutated. Each type knows its id byte, its direction capability and how
//! to read and write its payload. The id byte itself is handled by
//! [`Packet::encode`] and the packet reader, never by the payload code.

use crate::codec::{DecodeError, Reader, Value, Writer, pack_into, unpack};
use crate::error::{Result, RigError};

use super::constants::{CartId, DeviceFailure, InfoSpecifier, SetOperation};

/// Which way a packet type may travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Only ever received from the controller.
    Inbound,
    /// Only ever sent to the controller.
    Outbound,
    Bidirectional,
}

impl Direction {
    pub const fn can_receive(self) -> bool {
        matches!(self, Direction::Inbound | Direction::Bidirectional)
    }

    pub const fn can_send(self) -> bool {
        matches!(self, Direction::Outbound | Direction::Bidirectional)
    }
}

/// Payload layout of a packet, excluding the id byte.
pub trait Payload: Sized {
    fn decode_payload(reader: &mut Reader<'_>) -> Result<Self, DecodeError>;
    fn encode_payload(&self, writer: &mut Writer) -> Result<(), DecodeError>;
}

/// A concrete packet type registered in the wire table.
pub trait PacketType: Payload + Into<Packet> + Clone {
    const KIND: PacketKind;

    fn from_packet(packet: Packet) -> Option<Self>;
    fn from_ref(packet: &Packet) -> Option<&Self>;
}

/// Packet types the host may send.
pub trait Outbound: PacketType {
    fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::with_id(Self::KIND.id());
        self.encode_payload(&mut writer)?;
        Ok(writer.finish())
    }
}

/// Packet types the host may receive.
pub trait Inbound: PacketType {
    /// Reads one packet of this type, id byte included, from `source`.
    fn read(source: &mut &[u8]) -> Result<Self> {
        let mut reader = Reader::new(*source);
        let id = reader.u8()?;
        if id != Self::KIND.id() {
            return Err(RigError::PacketRead {
                id,
                reason: format!("expected {}", Self::KIND.name()),
                dump: String::new(),
            });
        }
        let packet = Self::decode_payload(&mut reader)?;
        *source = reader.remaining();
        Ok(packet)
    }
}

macro_rules! packet_table {
    ($( $variant:ident($ty:ident) = $id:literal, $direction:ident; )*) => {
        /// Discriminant of every registered packet type.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum PacketKind {
            $($variant,)*
        }

        impl PacketKind {
            pub const ALL: &'static [PacketKind] = &[$(PacketKind::$variant,)*];

            pub const fn id(self) -> u8 {
                match self {
                    $(PacketKind::$variant => $id,)*
                }
            }

            pub const fn direction(self) -> Direction {
                match self {
                    $(PacketKind::$variant => Direction::$direction,)*
                }
            }

            pub const fn name(self) -> &'static str {
                match self {
                    $(PacketKind::$variant => stringify!($ty),)*
                }
            }
        }

        /// Any packet on the wire.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Packet {
            $($variant($ty),)*
        }

        impl Packet {
            pub fn kind(&self) -> PacketKind {
                match self {
                    $(Packet::$variant(_) => PacketKind::$variant,)*
                }
            }

            /// Serialises the packet regardless of direction capability.
            ///
            /// Direction is enforced where packets enter or leave a session;
            /// this is the raw wire form used by both ends of a link.
            pub fn encode(&self) -> Result<Vec<u8>, DecodeError> {
                let mut writer = Writer::with_id(self.id());
                match self {
                    $(Packet::$variant(p) => p.encode_payload(&mut writer)?,)*
                }
                Ok(writer.finish())
            }
        }

        $(
            impl From<$ty> for Packet {
                fn from(packet: $ty) -> Packet {
                    Packet::$variant(packet)
                }
            }

            impl PacketType for $ty {
                const KIND: PacketKind = PacketKind::$variant;

                fn from_packet(packet: Packet) -> Option<Self> {
                    match packet {
                        Packet::$variant(p) => Some(p),
                        #[allow(unreachable_patterns)]
                        _ => None,
                    }
                }

                fn from_ref(packet: &Packet) -> Option<&Self> {
                    match packet {
                        Packet::$variant(p) => Some(p),
                        #[allow(unreachable_patterns)]
                        _ => None,
                    }
                }
            }

            packet_table!(@direction $direction $ty);
        )*
    };
    (@direction Inbound $ty:ident) => {
        impl Inbound for $ty {}
    };
    (@direction Outbound $ty:ident) => {
        impl Outbound for $ty {}
    };
    (@direction Bidirectional $ty:ident) => {
        impl Inbound for $ty {}
        impl Outbound for $ty {}
    };
}

packet_table! {
    Null(NullPacket) = 0x00, Bidirectional;
    Debug(DebugPacket) = 0x23, Bidirectional;
    Info(InfoPacket) = 0x7E, Bidirectional;
    Error(ErrorPacket) = 0x21, Bidirectional;
    Ping(PingPacket) = 0x70, Bidirectional;
    Pong(PongPacket) = 0x50, Bidirectional;
    SetPosition(SetPositionPacket) = 0x78, Outbound;
    SetVelocity(SetVelocityPacket) = 0x76, Outbound;
    GetPosition(GetPositionPacket) = 0x58, Inbound;
    FindLimits(FindLimitsPacket) = 0x7C, Bidirectional;
    CheckLimit(CheckLimitPacket) = 0x2F, Bidirectional;
    Observation(ObservationPacket) = 0x40, Inbound;
    DoJiggle(DoJigglePacket) = 0xA7, Bidirectional;
    ExperimentStart(ExperimentStartPacket) = 0x02, Bidirectional;
    ExperimentStop(ExperimentStopPacket) = 0x03, Bidirectional;
    ExperimentDone(ExperimentDonePacket) = 0x04, Inbound;
    ExperimentInfo(ExperimentInfoPacket) = 0x49, Inbound;
    RequestRealignment(RequestPacketRealignmentPacket) = 0x52, Outbound;
}

impl Packet {
    pub fn id(&self) -> u8 {
        self.kind().id()
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Message text of debug, info and error packets.
    pub fn message(&self) -> Option<&str> {
        match self {
            Packet::Debug(p) => Some(&p.message),
            Packet::Info(p) => Some(&p.message),
            Packet::Error(p) => Some(&p.message),
            _ => None,
        }
    }

    /// Cart the packet refers to, for cart-addressed packets.
    pub fn cart_id(&self) -> Option<CartId> {
        match self {
            Packet::Observation(p) => Some(p.cart_id),
            Packet::SetPosition(p) => Some(p.cart_id),
            Packet::SetVelocity(p) => Some(p.cart_id),
            Packet::ExperimentInfo(p) => p.cart(),
            Packet::ExperimentDone(p) => CartId::try_from(p.cart_id).ok(),
            _ => None,
        }
    }
}

macro_rules! id_only_packets {
    ($($(#[$meta:meta])* $ty:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
            pub struct $ty;

            impl Payload for $ty {
                fn decode_payload(_reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
                    Ok($ty)
                }

                fn encode_payload(&self, _writer: &mut Writer) -> Result<(), DecodeError> {
                    Ok(())
                }
            }
        )*
    };
}

id_only_packets! {
    /// Placeholder returned for a read that had to be realigned.
    NullPacket,
    /// Starts limit finding; echoed back once both limits are known.
    FindLimitsPacket,
    CheckLimitPacket,
    /// Oscillates the carts so the pendulum settles; echoed back when done.
    DoJigglePacket,
    ExperimentStopPacket,
    /// Asks the controller to emit [`REALIGN_MARKER`](super::constants::REALIGN_MARKER).
    RequestPacketRealignmentPacket,
}

macro_rules! message_packets {
    ($($ty:ident),* $(,)?) => {
        $(
            #[derive(Debug, Clone, PartialEq, Eq)]
            pub struct $ty {
                pub message: String,
            }

            impl $ty {
                pub fn new(message: impl Into<String>) -> Self {
                    Self { message: message.into() }
                }
            }

            impl Payload for $ty {
                fn decode_payload(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
                    let message = reader.string()?;
                    reader.crlf()?;
                    Ok(Self { message })
                }

                fn encode_payload(&self, writer: &mut Writer) -> Result<(), DecodeError> {
                    writer.string(&self.message)?.crlf();
                    Ok(())
                }
            }
        )*
    };
}

message_packets!(DebugPacket, InfoPacket, ErrorPacket);

macro_rules! timestamp_packets {
    ($($ty:ident),* $(,)?) => {
        $(
            #[derive(Debug, Clone, Copy, PartialEq, Eq)]
            pub struct $ty {
                pub timestamp: u32,
            }

            impl Payload for $ty {
                fn decode_payload(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
                    Ok(Self { timestamp: reader.u32()? })
                }

                fn encode_payload(&self, writer: &mut Writer) -> Result<(), DecodeError> {
                    writer.u32(self.timestamp);
                    Ok(())
                }
            }
        )*
    };
}

timestamp_packets!(PingPacket, PongPacket, ExperimentStartPacket);

macro_rules! set_packets {
    ($($ty:ident),* $(,)?) => {
        $(
            #[derive(Debug, Clone, Copy, PartialEq, Eq)]
            pub struct $ty {
                pub operation: SetOperation,
                pub cart_id: CartId,
                pub value: i16,
            }

            impl $ty {
                pub fn new(operation: SetOperation, cart_id: CartId, value: i16) -> Self {
                    Self { operation, cart_id, value }
                }
            }

            impl Payload for $ty {
                fn decode_payload(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
                    let operation = SetOperation::from_char(reader.ascii_char()?)?;
                    let cart_id = CartId::try_from(reader.u8()?)?;
                    let value = reader.i16()?;
                    Ok(Self { operation, cart_id, value })
                }

                fn encode_payload(&self, writer: &mut Writer) -> Result<(), DecodeError> {
                    writer.ascii_char(self.operation.as_char())?;
                    writer.u8(self.cart_id.as_u8()).i16(self.value);
                    Ok(())
                }
            }
        )*
    };
}

set_packets!(SetPositionPacket, SetVelocityPacket);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GetPositionPacket {
    pub steps: i32,
    pub millimetres: f32,
}

impl Payload for GetPositionPacket {
    fn decode_payload(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self { steps: reader.i32()?, millimetres: reader.f32()? })
    }

    fn encode_payload(&self, writer: &mut Writer) -> Result<(), DecodeError> {
        writer.i32(self.steps).f32(self.millimetres);
        Ok(())
    }
}

/// One sample of a cart's stepper position and pendulum angle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObservationPacket {
    pub timestamp_micros: u32,
    pub cart_id: CartId,
    pub position_steps: i32,
    pub angle_degrees: f32,
}

impl Payload for ObservationPacket {
    fn decode_payload(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let timestamp_micros = reader.u32()?;
        let cart_id = CartId::try_from(reader.u8()?)?;
        let position_steps = reader.i32()?;
        let angle_degrees = reader.f32()?;
        Ok(Self { timestamp_micros, cart_id, position_steps, angle_degrees })
    }

    fn encode_payload(&self, writer: &mut Writer) -> Result<(), DecodeError> {
        writer
            .u32(self.timestamp_micros)
            .u8(self.cart_id.as_u8())
            .i32(self.position_steps)
            .f32(self.angle_degrees);
        Ok(())
    }
}

/// Sent by the controller when an experiment ends. Cart 0 means all carts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExperimentDonePacket {
    pub cart_id: u8,
    pub failure: DeviceFailure,
}

impl Payload for ExperimentDonePacket {
    fn decode_payload(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let cart_id = reader.u8()?;
        let failure = DeviceFailure::from_code(reader.i8()?)?;
        Ok(Self { cart_id, failure })
    }

    fn encode_payload(&self, writer: &mut Writer) -> Result<(), DecodeError> {
        writer.u8(self.cart_id).u8(self.failure.code() as u8);
        Ok(())
    }
}

/// Value carried by an [`ExperimentInfoPacket`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InfoValue {
    Int(i32),
    Float(f32),
}

impl InfoValue {
    pub fn as_f64(self) -> f64 {
        match self {
            InfoValue::Int(v) => f64::from(v),
            InfoValue::Float(v) => f64::from(v),
        }
    }

    fn to_value(self) -> Value {
        match self {
            InfoValue::Int(v) => Value::I32(v),
            InfoValue::Float(v) => Value::F32(v),
        }
    }
}

/// Calibration data reported by the controller, keyed by specifier.
///
/// Rig-wide values such as the track length are sent with cart 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExperimentInfoPacket {
    pub specifier: InfoSpecifier,
    pub cart_id: u8,
    pub value: InfoValue,
}

impl ExperimentInfoPacket {
    /// Cart the value belongs to, or `None` for a rig-wide value.
    pub fn cart(&self) -> Option<CartId> {
        CartId::try_from(self.cart_id).ok()
    }
}

impl Payload for ExperimentInfoPacket {
    fn decode_payload(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let specifier = InfoSpecifier::from_code(reader.u8()?)?;
        let cart_id = reader.u8()?;

        let format = specifier.format();
        let mut cursor = reader.remaining();
        let value = match unpack(format, &mut cursor)? {
            Value::I32(v) => InfoValue::Int(v),
            Value::F32(v) => InfoValue::Float(v),
            other => return Err(DecodeError::FormatMismatch { format, value: other }),
        };
        reader.take(format.size_of(&value.to_value()))?;

        Ok(Self { specifier, cart_id, value })
    }

    fn encode_payload(&self, writer: &mut Writer) -> Result<(), DecodeError> {
        let mut value = Vec::new();
        pack_into(self.specifier.format(), &self.value.to_value(), &mut value)?;
        writer.u8(self.specifier.code()).u8(self.cart_id);
        for byte in value {
            writer.u8(byte);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn decode_any(bytes: &[u8]) -> Packet {
        let mut reader = Reader::new(bytes);
        let id = reader.u8().unwrap();
        let kind = PacketKind::ALL.iter().copied().find(|k| k.id() == id).unwrap();
        crate::protocol::registry::PacketRegistry::standard()
            .get(kind.id())
            .map(|entry| (entry.decode)(&mut reader).unwrap())
            .unwrap()
    }

    #[test]
    fn observation_layout_is_fixed() {
        let packet = ObservationPacket {
            timestamp_micros: 0x0102_0304,
            cart_id: CartId::Two,
            position_steps: -1,
            angle_degrees: 0.0,
        };
        let bytes = Packet::from(packet).encode().unwrap();
        assert_eq!(bytes, vec![0x40, 0x04, 0x03, 0x02, 0x01, 0x02, 0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 0]);
        assert_eq!(ObservationPacket::read(&mut bytes.as_slice()).unwrap(), packet);
    }

    #[test]
    fn set_velocity_bytes() {
        let bytes = SetVelocityPacket::new(SetOperation::Add, CartId::One, -50).to_bytes().unwrap();
        assert_eq!(bytes, vec![0x76, b'+', 0x01, 0xCE, 0xFF]);
    }

    #[test]
    fn message_packets_end_with_crlf() {
        let bytes = InfoPacket::new("hi").to_bytes().unwrap();
        assert_eq!(bytes, vec![0x7E, 2, 0, 0, 0, b'h', b'i', b'\r', b'\n']);
    }

    #[test]
    fn message_without_crlf_is_rejected() {
        let mut bytes = DebugPacket::new("hi").to_bytes().unwrap();
        let last = bytes.len() - 1;
        bytes[last] = b'X';
        assert!(matches!(
            DebugPacket::read(&mut bytes.as_slice()),
            Err(RigError::Decode(DecodeError::InvalidTerminator { .. }))
        ));
    }

    #[test]
    fn short_payload_is_a_decode_error() {
        let bytes = [0x70, 0x01, 0x02];
        assert!(matches!(
            PingPacket::read(&mut bytes.as_slice()),
            Err(RigError::Decode(DecodeError::ShortRead { needed: 4, available: 2 }))
        ));
    }

    #[test]
    fn read_consumes_exactly_one_packet() {
        let mut bytes = PongPacket { timestamp: 7 }.to_bytes().unwrap();
        bytes.extend_from_slice(&[0xAB, 0xCD]);
        let mut cursor = bytes.as_slice();
        assert_eq!(PongPacket::read(&mut cursor).unwrap(), PongPacket { timestamp: 7 });
        assert_eq!(cursor, &[0xABu8, 0xCD][..]);
    }

    #[test]
    fn experiment_info_value_follows_specifier() {
        let packet = ExperimentInfoPacket {
            specifier: InfoSpecifier::AngleDrift,
            cart_id: 1,
            value: InfoValue::Float(1.5),
        };
        let bytes = Packet::from(packet).encode().unwrap();
        assert_eq!(bytes.len(), 1 + 1 + 1 + 4);
        assert_eq!(decode_any(&bytes), Packet::ExperimentInfo(packet));

        let mismatched = ExperimentInfoPacket { value: InfoValue::Int(3), ..packet };
        assert!(Packet::from(mismatched).encode().is_err());
    }

    #[test]
    fn rig_wide_track_length_decodes() {
        let bytes = [0x49, 0x00, 0x00, 0x39, 0x30, 0x00, 0x00];
        let packet = ExperimentInfoPacket::read(&mut bytes.as_slice()).unwrap();
        assert_eq!(packet.specifier, InfoSpecifier::TrackLengthSteps);
        assert_eq!(packet.cart_id, 0);
        assert_eq!(packet.cart(), None);
        assert_eq!(packet.value, InfoValue::Int(12345));
        assert_eq!(Packet::from(packet).cart_id(), None);
        assert_eq!(Packet::from(packet).encode().unwrap(), bytes);
    }

    #[test]
    fn experiment_done_carries_signed_failure() {
        let packet = ExperimentDonePacket { cart_id: 0, failure: DeviceFailure::PositionLeft };
        let bytes = Packet::from(packet).encode().unwrap();
        assert_eq!(bytes, vec![0x04, 0x00, 0xFF]);
        assert_eq!(ExperimentDonePacket::read(&mut bytes.as_slice()).unwrap(), packet);
    }

    #[test]
    fn directions_match_table() {
        assert!(!PacketKind::Observation.direction().can_send());
        assert!(!PacketKind::SetVelocity.direction().can_receive());
        assert!(PacketKind::Ping.direction().can_send());
        assert!(PacketKind::Ping.direction().can_receive());
    }

    #[test]
    fn typed_extraction() {
        let packet = Packet::from(PingPacket { timestamp: 3 });
        assert_eq!(PingPacket::from_ref(&packet), Some(&PingPacket { timestamp: 3 }));
        assert_eq!(PongPacket::from_ref(&packet), None);
        assert_eq!(PingPacket::from_packet(packet), Some(PingPacket { timestamp: 3 }));
    }

    fn cart_id() -> impl Strategy<Value = CartId> {
        prop_oneof![Just(CartId::One), Just(CartId::Two)]
    }

    fn bidirectional_packet() -> impl Strategy<Value = Packet> {
        prop_oneof![
            Just(Packet::Null(NullPacket)),
            "[ -~]{0,64}".prop_map(|m| Packet::Debug(DebugPacket::new(m))),
            "[ -~]{0,64}".prop_map(|m| Packet::Info(InfoPacket::new(m))),
            "[ -~]{0,64}".prop_map(|m| Packet::Error(ErrorPacket::new(m))),
            any::<u32>().prop_map(|timestamp| Packet::Ping(PingPacket { timestamp })),
            any::<u32>().prop_map(|timestamp| Packet::Pong(PongPacket { timestamp })),
            Just(Packet::FindLimits(FindLimitsPacket)),
            Just(Packet::CheckLimit(CheckLimitPacket)),
            Just(Packet::DoJiggle(DoJigglePacket)),
            any::<u32>()
                .prop_map(|timestamp| Packet::ExperimentStart(ExperimentStartPacket { timestamp })),
            Just(Packet::ExperimentStop(ExperimentStopPacket)),
        ]
    }

    proptest! {
        #[test]
        fn bidirectional_packets_round_trip(packet in bidirectional_packet()) {
            prop_assert_eq!(packet.kind().direction(), Direction::Bidirectional);
            let bytes = packet.encode().unwrap();
            prop_assert_eq!(bytes[0], packet.id());
            prop_assert_eq!(decode_any(&bytes), packet);
        }

        #[test]
        fn observations_round_trip(
            timestamp_micros in any::<u32>(),
            cart_id in cart_id(),
            position_steps in any::<i32>(),
            angle_degrees in -360.0f32..360.0,
        ) {
            let packet = ObservationPacket { timestamp_micros, cart_id, position_steps, angle_degrees };
            let bytes = Packet::from(packet).encode().unwrap();
            prop_assert_eq!(ObservationPacket::read(&mut bytes.as_slice()).unwrap(), packet);
        }

        #[test]
        fn truncated_packets_never_decode(packet in bidirectional_packet(), cut in 1usize..8) {
            let bytes = packet.encode().unwrap();
            prop_assume!(bytes.len() > 1 && cut < bytes.len());
            let truncated = &bytes[..bytes.len() - cut];
            let mut reader = Reader::new(truncated);
            reader.u8().unwrap();
            let entry = crate::protocol::registry::PacketRegistry::standard().get(packet.id()).unwrap();
            prop_assert!((entry.decode)(&mut reader).is_err());
        }
    }
}
