// RX side of a link: holds accepted copies until their propagation delay is up.

use super::QueuedPacket;
use crate::network::{Micros, Packet};
use std::collections::VecDeque;

#[derive(Debug)]
struct Delayed {
    due: Micros,
    entry: QueuedPacket,
}

#[derive(Debug, Default)]
pub struct DelayQueue {
    queue: VecDeque<Delayed>,
}

impl DelayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Queues `packet` for delivery at `now + delay`. Returns true on the idle
    /// to active transition.
    pub fn push(&mut self, packet: Packet, now: Micros, delay: Micros) -> bool {
        let first = self.queue.is_empty();
        self.queue.push_back(Delayed {
            due: now + delay,
            entry: QueuedPacket::new(packet, now),
        });
        first
    }

    /// Head of the queue, if it is due. FIFO, so a later packet never overtakes
    /// an earlier one even when its delay is shorter.
    pub fn pop_due(&mut self, now: Micros) -> Option<Packet> {
        if self.queue.front()?.due > now {
            return None;
        }
        self.queue.pop_front().map(|d| d.entry.packet)
    }

    pub fn next_due(&self) -> Option<Micros> {
        self.queue.front().map(|d| d.due)
    }

    pub fn drain(&mut self) -> usize {
        let n = self.queue.len();
        self.queue.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::PacketId;

    fn packet(id: u64) -> Packet {
        Packet::zeroed(PacketId::new(id), 32, 0)
    }

    #[test]
    fn releases_in_order_once_due() {
        let mut q = DelayQueue::new();
        assert!(q.push(packet(1), 0, 500));
        assert!(!q.push(packet(2), 100, 500));
        assert_eq!(q.next_due(), Some(500));

        assert_eq!(q.pop_due(499), None);
        assert_eq!(q.pop_due(500).map(|p| p.id), Some(PacketId::new(1)));
        assert_eq!(q.pop_due(500), None);
        assert_eq!(q.pop_due(600).map(|p| p.id), Some(PacketId::new(2)));
        assert!(q.is_empty());
    }

    #[test]
    fn head_blocks_shorter_delays_behind_it() {
        let mut q = DelayQueue::new();
        q.push(packet(1), 0, 1_000);
        q.push(packet(2), 0, 10);
        assert_eq!(q.pop_due(500), None);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn drain_empties() {
        let mut q = DelayQueue::new();
        q.push(packet(1), 0, 1);
        q.push(packet(2), 0, 1);
        assert_eq!(q.drain(), 2);
        assert_eq!(q.next_due(), None);
    }
}
