//! Static id → packet-type table.
//!
//! The standard table is assembled at compile time; a duplicated id is a
//! const-evaluation panic and therefore a build failure. Tables built at
//! runtime with [`PacketRegistry::from_entries`] report duplicates as
//! [`RigError::DuplicatePacketId`].

use crate::codec::{DecodeError, Reader};
use crate::error::{Result, RigError};

use super::packets::*;

/// Decodes a packet payload (the id byte already consumed).
pub type DecodeFn = for<'a> fn(&mut Reader<'a>) -> Result<Packet, DecodeError>;

/// One row of the wire table.
#[derive(Clone, Copy)]
pub struct RegistryEntry {
    pub kind: PacketKind,
    pub decode: DecodeFn,
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("id", &format_args!("{:#04x}", self.kind.id()))
            .field("kind", &self.kind)
            .finish()
    }
}

fn decode_as<P: PacketType>(reader: &mut Reader<'_>) -> Result<Packet, DecodeError> {
    P::decode_payload(reader).map(Into::into)
}

/// Table row for packet type `P`.
pub const fn entry<P: PacketType>() -> RegistryEntry {
    RegistryEntry { kind: P::KIND, decode: decode_as::<P> }
}

/// Every packet type the host understands.
pub const STANDARD_ENTRIES: [RegistryEntry; 18] = [
    entry::<NullPacket>(),
    entry::<DebugPacket>(),
    entry::<InfoPacket>(),
    entry::<ErrorPacket>(),
    entry::<PingPacket>(),
    entry::<PongPacket>(),
    entry::<SetPositionPacket>(),
    entry::<SetVelocityPacket>(),
    entry::<GetPositionPacket>(),
    entry::<FindLimitsPacket>(),
    entry::<CheckLimitPacket>(),
    entry::<ObservationPacket>(),
    entry::<DoJigglePacket>(),
    entry::<ExperimentStartPacket>(),
    entry::<ExperimentStopPacket>(),
    entry::<ExperimentDonePacket>(),
    entry::<ExperimentInfoPacket>(),
    entry::<RequestPacketRealignmentPacket>(),
];

static STANDARD: PacketRegistry = PacketRegistry::build(&STANDARD_ENTRIES);

/// Lookup table indexed by id byte.
#[derive(Debug, Clone)]
pub struct PacketRegistry {
    slots: [Option<RegistryEntry>; 256],
}

impl PacketRegistry {
    const fn build(entries: &[RegistryEntry]) -> Self {
        let mut slots = [None; 256];
        let mut i = 0;
        while i < entries.len() {
            let id = entries[i].kind.id() as usize;
            if slots[id].is_some() {
                panic!("duplicate packet id in standard registry");
            }
            slots[id] = Some(entries[i]);
            i += 1;
        }
        Self { slots }
    }

    /// The compile-time checked table of every known packet type.
    pub fn standard() -> &'static PacketRegistry {
        &STANDARD
    }

    /// Builds a table at runtime, rejecting duplicate ids.
    pub fn from_entries(entries: &[RegistryEntry]) -> Result<Self> {
        let mut slots: [Option<RegistryEntry>; 256] = [None; 256];
        for entry in entries {
            let slot = &mut slots[entry.kind.id() as usize];
            if let Some(existing) = slot {
                return Err(RigError::DuplicatePacketId {
                    id: entry.kind.id(),
                    first: existing.kind.name(),
                    second: entry.kind.name(),
                });
            }
            *slot = Some(*entry);
        }
        Ok(Self { slots })
    }

    /// Any registered type with this id.
    pub fn get(&self, id: u8) -> Option<&RegistryEntry> {
        self.slots[id as usize].as_ref()
    }

    /// A registered type with this id that may be received by the host.
    pub fn inbound(&self, id: u8) -> Option<&RegistryEntry> {
        self.get(id).filter(|entry| entry.kind.direction().can_receive())
    }

    /// A registered type with this id that the host may send.
    ///
    /// This is the view of a peer reading what the host wrote.
    pub fn outbound(&self, id: u8) -> Option<&RegistryEntry> {
        self.get(id).filter(|entry| entry.kind.direction().can_send())
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.slots.iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_covers_every_kind() {
        let registry = PacketRegistry::standard();
        assert_eq!(registry.len(), PacketKind::ALL.len());
        for kind in PacketKind::ALL {
            assert_eq!(registry.get(kind.id()).map(|e| e.kind), Some(*kind));
        }
    }

    #[test]
    fn inbound_view_hides_outbound_only_types() {
        let registry = PacketRegistry::standard();
        assert!(registry.inbound(PacketKind::SetVelocity.id()).is_none());
        assert!(registry.inbound(PacketKind::RequestRealignment.id()).is_none());
        assert!(registry.inbound(PacketKind::Observation.id()).is_some());
        assert!(registry.outbound(PacketKind::Observation.id()).is_none());
        assert!(registry.get(0x3F).is_none());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        // Two rows claiming the same id, as a copy-pasted packet type would.
        let entries = [entry::<SetVelocityPacket>(), entry::<PingPacket>(), entry::<SetVelocityPacket>()];
        match PacketRegistry::from_entries(&entries) {
            Err(RigError::DuplicatePacketId { id, first, second }) => {
                assert_eq!(id, 0x76);
                assert_eq!(first, "SetVelocityPacket");
                assert_eq!(second, "SetVelocityPacket");
            }
            other => panic!("expected duplicate id error, got {other:?}"),
        }
    }

    #[test]
    fn runtime_table_matches_standard() {
        let registry = PacketRegistry::from_entries(&STANDARD_ENTRIES).unwrap();
        assert_eq!(registry.len(), STANDARD_ENTRIES.len());
    }
}
