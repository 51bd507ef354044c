pub mod logger;

use crate::emulation::{Egress, EngineStats};
use crate::network::{LinkId, Micros, Packet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use parking_lot::RwLock;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: f64,
    pub offered: u64,
    pub delivered: u64,
    pub backpressured: u64,
    pub duplicated: u64,
    pub ber_drops: u64,
    pub unroutable: u64,
    pub discarded: u64,
    pub throughput_bps: f64,
    pub avg_latency_ms: f64,
    /// Share of offered packets refused by a full TX queue.
    pub loss_rate: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LinkCounters {
    pub delivered: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct MetricsCollector {
    inner: Arc<RwLock<MetricsInner>>,
    start_time: Instant,
}

#[derive(Debug, Default)]
struct MetricsInner {
    offered: u64,
    backpressured: u64,
    delivered: u64,
    delivered_bytes: u64,
    per_link: HashMap<LinkId, LinkCounters>,
    total_latency_us: u64,
    latency_samples: u64,
    snapshots: Vec<MetricsSnapshot>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MetricsInner::default())),
            start_time: Instant::now(),
        }
    }

    pub fn packet_offered(&self) {
        self.inner.write().offered += 1;
    }

    pub fn packet_backpressured(&self) {
        self.inner.write().backpressured += 1;
    }

    pub fn packet_delivered(&self, link: LinkId, packet: &Packet, now: Micros) {
        let mut inner = self.inner.write();
        inner.delivered += 1;
        inner.delivered_bytes += packet.len() as u64;

        let counters = inner.per_link.entry(link).or_default();
        counters.delivered += 1;
        counters.bytes += packet.len() as u64;

        // Stamped by another clock, keep it out of the average
        if now < packet.created_at {
            warn!("{:?} delivered before it was created, ignoring latency sample", packet.id);
            return;
        }
        inner.total_latency_us += packet.sojourn(now);
        inner.latency_samples += 1;
    }

    pub fn offered(&self) -> u64 {
        self.inner.read().offered
    }

    pub fn delivered(&self) -> u64 {
        self.inner.read().delivered
    }

    pub fn per_link(&self) -> BTreeMap<LinkId, LinkCounters> {
        self.inner
            .read()
            .per_link
            .iter()
            .map(|(link, counters)| (*link, *counters))
            .collect()
    }

    /// Current totals, with the engine's own counters folded in.
    pub fn snapshot(&self, engine: &EngineStats) -> MetricsSnapshot {
        let inner = self.inner.read();

        let elapsed = self.start_time.elapsed().as_secs_f64();

        let throughput_bps = if elapsed > 0.0 {
            inner.delivered_bytes as f64 * 8.0 / elapsed
        } else {
            0.0
        };

        let avg_latency_ms = if inner.latency_samples > 0 {
            inner.total_latency_us as f64 / inner.latency_samples as f64 / 1000.0
        } else {
            0.0
        };

        let loss_rate = if inner.offered > 0 {
            inner.backpressured as f64 / inner.offered as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            timestamp: elapsed,
            offered: inner.offered,
            delivered: inner.delivered,
            backpressured: inner.backpressured,
            duplicated: engine.duplicated,
            ber_drops: engine.ber_drops,
            unroutable: engine.unroutable,
            discarded: engine.discarded,
            throughput_bps,
            avg_latency_ms,
            loss_rate,
        }
    }

    pub fn save_snapshot(&self, engine: &EngineStats) -> MetricsSnapshot {
        let snapshot = self.snapshot(engine);
        self.inner.write().snapshots.push(snapshot.clone());
        snapshot
    }

    pub fn get_snapshots(&self) -> Vec<MetricsSnapshot> {
        self.inner.read().snapshots.clone()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Egress that only counts. The packet ends here.
#[derive(Debug, Clone)]
pub struct MetricsEgress {
    metrics: MetricsCollector,
}

impl MetricsEgress {
    pub fn new(metrics: MetricsCollector) -> Self {
        Self { metrics }
    }
}

impl Egress for MetricsEgress {
    fn transmit(&mut self, link: LinkId, packet: Packet, now: Micros) {
        self.metrics.packet_delivered(link, &packet, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::PacketId;

    #[test]
    fn latency_and_per_link_totals() {
        let metrics = MetricsCollector::new();
        let mut egress = MetricsEgress::new(metrics.clone());

        metrics.packet_offered();
        metrics.packet_offered();
        egress.transmit(LinkId(1), Packet::zeroed(PacketId::new(0), 100, 1_000), 3_000);
        egress.transmit(LinkId(2), Packet::zeroed(PacketId::new(1), 50, 1_000), 5_000);

        let snapshot = metrics.snapshot(&EngineStats::default());
        assert_eq!(snapshot.offered, 2);
        assert_eq!(snapshot.delivered, 2);
        assert!((snapshot.avg_latency_ms - 3.0).abs() < 1e-9);
        assert_eq!(snapshot.loss_rate, 0.0);

        let per_link = metrics.per_link();
        assert_eq!(per_link[&LinkId(1)].bytes, 100);
        assert_eq!(per_link[&LinkId(2)].delivered, 1);
    }

    #[test]
    fn loss_rate_counts_backpressure() {
        let metrics = MetricsCollector::new();
        for _ in 0..4 {
            metrics.packet_offered();
        }
        metrics.packet_backpressured();

        let stats = EngineStats { ber_drops: 7, ..Default::default() };
        let snapshot = metrics.save_snapshot(&stats);
        assert_eq!(snapshot.loss_rate, 0.25);
        assert_eq!(snapshot.ber_drops, 7);
        assert_eq!(metrics.get_snapshots().len(), 1);
    }

    #[test]
    fn clock_skew_is_not_a_latency() {
        let metrics = MetricsCollector::new();
        metrics.packet_delivered(LinkId(0), &Packet::zeroed(PacketId::new(0), 10, 500), 100);
        assert_eq!(metrics.delivered(), 1);
        assert_eq!(metrics.snapshot(&EngineStats::default()).avg_latency_ms, 0.0);
    }
}
