use super::Micros;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PacketId(u64);

impl PacketId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// A frame travelling through the emulator.
///
/// The payload is owned. Whoever holds the packet owns the buffer, and fan-out
/// or duplication always makes a deep copy through `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub id: PacketId,
    // Clock reading when the packet was handed to the engine, used for latency
    pub created_at: Micros,
    pub data: Vec<u8>,
}

impl Packet {
    pub fn new(id: PacketId, data: Vec<u8>, created_at: Micros) -> Self {
        Self { id, created_at, data }
    }

    /// Zero filled packet of `size` bytes, what the traffic generators send.
    pub fn zeroed(id: PacketId, size: usize, created_at: Micros) -> Self {
        Self::new(id, vec![0; size], created_at)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn sojourn(&self, now: Micros) -> Micros {
        now.saturating_sub(self.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_are_independent_buffers() {
        let original = Packet::new(PacketId::new(1), vec![1, 2, 3], 10);
        let mut copy = original.clone();
        copy.data[0] = 9;
        assert_eq!(original.data, vec![1, 2, 3]);
        assert_eq!(copy.len(), 3);
    }

    #[test]
    fn sojourn_saturates() {
        let packet = Packet::zeroed(PacketId::new(2), 64, 500);
        assert_eq!(packet.sojourn(1_500), 1_000);
        assert_eq!(packet.sojourn(100), 0);
    }
}
