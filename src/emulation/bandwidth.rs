// TX side of a link: paces egress to the configured bit rate, adds jitter and
// occasionally duplicates the frame at the head of the queue.

use super::config::LinkConfig;
use super::jitter::JitterSampler;
use super::random::UniformSource;
use super::QueuedPacket;
use crate::network::{transmission_delay, Micros, Packet};
use std::collections::VecDeque;

/// What a due queue head turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Release {
    /// A copy of the head. The head itself stays queued.
    Duplicate(Packet),
    /// The head, now removed from the queue.
    Original(Packet),
}

/// Per-link pacing parameters, borrowed from the live configuration.
#[derive(Debug, Clone, Copy)]
pub struct Pacer<'a> {
    bandwidth: u32,
    jitter: u32,
    duplication: u32,
    sampler: &'a JitterSampler,
}

impl<'a> Pacer<'a> {
    pub fn new(config: &LinkConfig, sampler: &'a JitterSampler) -> Self {
        Self {
            bandwidth: config.bandwidth,
            jitter: config.jitter,
            duplication: config.duplication,
            sampler,
        }
    }

    pub fn is_paced(&self) -> bool {
        self.bandwidth != 0 || self.jitter != 0
    }

    pub fn interval(&self, len: usize, source: &mut dyn UniformSource) -> Micros {
        transmission_delay(self.bandwidth, len) + self.sampler.sample(source, self.jitter)
    }

    pub fn duplicates(&self, source: &mut dyn UniformSource) -> bool {
        self.duplication != 0 && source.next_u32() % 1000 < self.duplication
    }
}

#[derive(Debug, Default)]
pub struct BandwidthQueue {
    queue: VecDeque<QueuedPacket>,
    // Deadline of the queue head
    due: Micros,
}

impl BandwidthQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn due(&self) -> Micros {
        self.due
    }

    /// Appends a packet. Returns true when this was the idle to active
    /// transition, in which case the head deadline has been set from `now`.
    pub fn push(
        &mut self,
        packet: Packet,
        now: Micros,
        pacer: &Pacer<'_>,
        source: &mut dyn UniformSource,
    ) -> bool {
        let first = self.queue.is_empty();
        if first {
            self.due = if pacer.is_paced() {
                now + pacer.interval(packet.len(), source)
            } else {
                now
            };
        }
        self.queue.push_back(QueuedPacket::new(packet, now));
        first
    }

    /// Releases the head if its deadline has passed.
    ///
    /// NOTE: a duplicated head is *not* advanced. The copy goes out, the
    /// deadline moves on by the head's own length, and the very same frame is
    /// tried again later where it may be duplicated once more. Only a cycle
    /// that doesn't duplicate removes it, and the engine ends its pass over the
    /// link after a duplicate. Callers depend on this asymmetry, so leave it
    /// alone.
    pub fn poll(
        &mut self,
        now: Micros,
        pacer: &Pacer<'_>,
        source: &mut dyn UniformSource,
    ) -> Option<Release> {
        let head = self.queue.front()?;
        if now < self.due {
            return None;
        }

        if pacer.duplicates(source) {
            let copy = head.packet.clone();
            if pacer.is_paced() {
                self.due += pacer.interval(head.packet.len(), source);
            }
            return Some(Release::Duplicate(copy));
        }

        let sent = self.queue.pop_front()?;
        if let Some(next) = self.queue.front() {
            if pacer.is_paced() {
                self.due += pacer.interval(next.packet.len(), source);
            }
        }
        Some(Release::Original(sent.packet))
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
    use crate::emulation::random::SequenceSource;
    use crate::network::PacketId;

    fn packet(id: u64, len: usize) -> Packet {
        Packet::zeroed(PacketId::new(id), len, 0)
    }

    #[test]
    fn first_packet_waits_its_own_transmission_time() {
        let sampler = JitterSampler::default();
        let cfg = LinkConfig::default().with_bandwidth(8_000);
        let pacer = Pacer::new(&cfg, &sampler);
        let mut source = SequenceSource::constant(0);
        let mut q = BandwidthQueue::new();

        assert!(q.push(packet(1, 1_000), 500, &pacer, &mut source));
        assert!(!q.push(packet(2, 500), 600, &pacer, &mut source));
        assert_eq!(q.due(), 1_000_500);

        assert_eq!(q.poll(1_000_499, &pacer, &mut source), None);
        assert_eq!(
            q.poll(1_000_500, &pacer, &mut source),
            Some(Release::Original(packet(1, 1_000)))
        );
        // next deadline counts from the previous one, sized by the new head
        assert_eq!(q.due(), 1_500_500);
        assert_eq!(q.poll(1_200_000, &pacer, &mut source), None);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn duplicate_leaves_head_in_place() {
        let sampler = JitterSampler::default();
        let cfg = LinkConfig::default().with_bandwidth(8_000).with_duplication(500);
        let pacer = Pacer::new(&cfg, &sampler);
        // 100 % 1000 < 500 duplicates, 900 doesn't
        let mut source = SequenceSource::new(vec![100, 900]);
        let mut q = BandwidthQueue::new();

        q.push(packet(7, 100), 0, &pacer, &mut source);
        assert_eq!(q.due(), 100_000);

        assert_eq!(
            q.poll(100_000, &pacer, &mut source),
            Some(Release::Duplicate(packet(7, 100)))
        );
        assert_eq!(q.len(), 1);
        assert_eq!(q.due(), 200_000);

        assert_eq!(
            q.poll(200_000, &pacer, &mut source),
            Some(Release::Original(packet(7, 100)))
        );
        assert!(q.is_empty());
    }

    #[test]
    fn unpaced_queue_releases_immediately() {
        let sampler = JitterSampler::default();
        let cfg = LinkConfig::default().with_duplication(10);
        let pacer = Pacer::new(&cfg, &sampler);
        let mut source = SequenceSource::constant(999);
        let mut q = BandwidthQueue::new();

        q.push(packet(1, 64), 10, &pacer, &mut source);
        q.push(packet(2, 64), 10, &pacer, &mut source);
        assert_eq!(q.due(), 10);
        assert!(matches!(q.poll(10, &pacer, &mut source), Some(Release::Original(_))));
        assert!(matches!(q.poll(10, &pacer, &mut source), Some(Release::Original(_))));
        assert_eq!(q.poll(10, &pacer, &mut source), None);
    }

    #[test]
    fn jitter_extends_deadline() {
        let sampler = JitterSampler::default();
        let cfg = LinkConfig::default().with_jitter(sampler.mean());
        let pacer = Pacer::new(&cfg, &sampler);
        // top byte 0 selects range (20, 100): 20 + 50 % 80 = 70
        let mut source = SequenceSource::constant(50);
        let mut q = BandwidthQueue::new();

        q.push(packet(1, 64), 1_000, &pacer, &mut source);
        assert_eq!(q.due(), 1_070);
    }

    #[test]
    fn drain_counts_discards() {
        let sampler = JitterSampler::default();
        let cfg = LinkConfig::default().with_bandwidth(1_000);
        let pacer = Pacer::new(&cfg, &sampler);
        let mut source = SequenceSource::constant(0);
        let mut q = BandwidthQueue::new();
        for id in 0..5 {
            q.push(packet(id, 10), 0, &pacer, &mut source);
        }
        assert_eq!(q.drain(), 5);
        assert!(q.is_empty());
    }
}
