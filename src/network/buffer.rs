//! Ordered store of decoded packets awaiting selective consumption.

use std::collections::{HashSet, VecDeque};

use crate::protocol::{Packet, PacketType};

/// A packet plus its arrival sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedPacket {
    pub seq: u64,
    pub packet: Packet,
}

/// Append-only at the tail; matching queries remove from anywhere.
///
/// Sequence numbers are unique for the lifetime of the buffer, so callers
/// can exclude packets they have already seen without holding references.
#[derive(Debug, Default)]
pub struct PacketBuffer {
    packets: VecDeque<BufferedPacket>,
    next_seq: u64,
}

impl PacketBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, packet: Packet) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.packets.push_back(BufferedPacket { seq, packet });
        seq
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BufferedPacket> {
        self.packets.iter()
    }

    /// First packet of type `T` accepted by `selector`, skipping `exclude`.
    pub fn find<T, S>(&self, selector: S, exclude: &HashSet<u64>) -> Option<(u64, &T)>
    where
        T: PacketType,
        S: Fn(&T) -> bool,
    {
        self.packets.iter().find_map(|buffered| {
            if exclude.contains(&buffered.seq) {
                return None;
            }
            T::from_ref(&buffered.packet).filter(|p| selector(*p)).map(|p| (buffered.seq, p))
        })
    }

    /// Removes the packet with sequence number `seq`.
    pub fn remove(&mut self, seq: u64) -> Option<Packet> {
        let index = self.packets.iter().position(|buffered| buffered.seq == seq)?;
        self.packets.remove(index).map(|buffered| buffered.packet)
    }

    /// Removes and returns the first packet of type `T` matching `selector`.
    pub fn pop<T, S>(&mut self, selector: S) -> Option<T>
    where
        T: PacketType,
        S: Fn(&T) -> bool,
    {
        let (seq, _) = self.find::<T, S>(selector, &HashSet::new())?;
        self.remove(seq).and_then(T::from_packet)
    }

    /// Removes every packet matching `predicate`, in arrival order.
    pub fn drain_where<F>(&mut self, mut predicate: F) -> Vec<Packet>
    where
        F: FnMut(&Packet) -> bool,
    {
        let mut drained = Vec::new();
        let mut kept = VecDeque::with_capacity(self.packets.len());
        for buffered in self.packets.drain(..) {
            if predicate(&buffered.packet) {
                drained.push(buffered.packet);
            } else {
                kept.push_back(buffered);
            }
        }
        self.packets = kept;
        drained
    }

    /// Removes every packet of type `T`, in arrival order.
    pub fn drain_type<T: PacketType>(&mut self) -> Vec<T> {
        self.drain_where(|packet| packet.kind() == T::KIND)
            .into_iter()
            .filter_map(T::from_packet)
            .collect()
    }

    pub fn clear(&mut self) {
        self.packets.clear();
    }
}

impl Extend<Packet> for PacketBuffer {
    fn extend<I: IntoIterator<Item = Packet>>(&mut self, iter: I) {
        for packet in iter {
            self.push(packet);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{InfoPacket, PingPacket, PongPacket};

    fn buffer_with(packets: Vec<Packet>) -> PacketBuffer {
        let mut buffer = PacketBuffer::new();
        buffer.extend(packets);
        buffer
    }

    #[test]
    fn pop_returns_first_match_in_arrival_order() {
        let mut buffer = buffer_with(vec![
            PongPacket { timestamp: 1 }.into(),
            PingPacket { timestamp: 2 }.into(),
            PongPacket { timestamp: 3 }.into(),
        ]);

        assert_eq!(buffer.pop::<PongPacket, _>(|_| true), Some(PongPacket { timestamp: 1 }));
        assert_eq!(buffer.pop::<PongPacket, _>(|_| true), Some(PongPacket { timestamp: 3 }));
        assert_eq!(buffer.pop::<PongPacket, _>(|_| true), None);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn selector_filters_payload() {
        let mut buffer = buffer_with(vec![
            PongPacket { timestamp: 1 }.into(),
            PongPacket { timestamp: 2 }.into(),
        ]);
        assert_eq!(
            buffer.pop::<PongPacket, _>(|p| p.timestamp == 2),
            Some(PongPacket { timestamp: 2 })
        );
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn exclusion_skips_already_seen_packets() {
        let buffer = buffer_with(vec![
            PongPacket { timestamp: 1 }.into(),
            PongPacket { timestamp: 1 }.into(),
        ]);
        let mut seen = HashSet::new();
        let (first, _) = buffer.find::<PongPacket, _>(|_| true, &seen).unwrap();
        seen.insert(first);
        let (second, _) = buffer.find::<PongPacket, _>(|_| true, &seen).unwrap();
        assert_ne!(first, second);
        seen.insert(second);
        assert!(buffer.find::<PongPacket, _>(|_| true, &seen).is_none());
    }

    #[test]
    fn drain_keeps_order_of_remaining_packets() {
        let mut buffer = buffer_with(vec![
            InfoPacket::new("a").into(),
            PingPacket { timestamp: 1 }.into(),
            InfoPacket::new("b").into(),
            PingPacket { timestamp: 2 }.into(),
        ]);
        let infos = buffer.drain_type::<InfoPacket>();
        assert_eq!(infos, vec![InfoPacket::new("a"), InfoPacket::new("b")]);

        let remaining: Vec<_> = buffer.iter().map(|b| b.packet.clone()).collect();
        assert_eq!(
            remaining,
            vec![Packet::from(PingPacket { timestamp: 1 }), Packet::from(PingPacket { timestamp: 2 })]
        );
    }

    #[test]
    fn sequence_numbers_survive_removal() {
        let mut buffer = PacketBuffer::new();
        let a = buffer.push(PingPacket { timestamp: 1 }.into());
        let b = buffer.push(PingPacket { timestamp: 2 }.into());
        assert!(buffer.remove(a).is_some());
        assert!(buffer.remove(a).is_none());
        let c = buffer.push(PingPacket { timestamp: 3 }.into());
        assert!(b < c);
    }
}
