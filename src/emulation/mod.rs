pub mod bandwidth;
pub mod ber;
pub mod config;
pub mod delay;
pub mod jitter;
pub mod random;
pub mod routing;

pub use bandwidth::{BandwidthQueue, Pacer, Release};
pub use ber::ProbabilityTable;
pub use config::{Ber, ConfigError, Destination, LinkConfig};
pub use delay::DelayQueue;
pub use jitter::{JitterRange, JitterSampler};
pub use random::{SequenceSource, UniformSource};
pub use routing::RoutingTable;

use crate::network::{Epid, LinkId, Micros, Packet};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace};

/// Where packets leave the engine: the output side of a destination link.
pub trait Egress: Send {
    fn transmit(&mut self, link: LinkId, packet: Packet, now: Micros);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub link: LinkId,
    pub packet: Packet,
    pub at: Micros,
}

// Collecting egress, handy for tools and tests
impl Egress for Vec<Delivery> {
    fn transmit(&mut self, link: LinkId, packet: Packet, now: Micros) {
        self.push(Delivery { link, packet, at: now });
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedPacket {
    pub packet: Packet,
    pub enqueued_at: Micros,
}

impl QueuedPacket {
    pub fn new(packet: Packet, enqueued_at: Micros) -> Self {
        Self { packet, enqueued_at }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("TX queue of {link} is full ({limit} packets), packet dropped")]
    Backpressure { link: LinkId, limit: u32 },
    #[error("unknown link {0}")]
    UnknownLink(LinkId),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("{0} is already connected")]
    LinkExists(LinkId),
    #[error("unknown link {0}")]
    UnknownLink(LinkId),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Handed to a destination link's output.
    pub delivered: u64,
    /// Skipped the bandwidth queue entirely.
    pub bypassed: u64,
    pub duplicated: u64,
    pub backpressure_drops: u64,
    pub ber_drops: u64,
    /// Copies addressed to an EPID nobody owns.
    pub unroutable: u64,
    /// Thrown away by link teardown.
    pub discarded: u64,
}

/// Runtime state of one connected link.
#[derive(Debug)]
pub struct LinkState {
    id: LinkId,
    config: LinkConfig,
    bandwidth: BandwidthQueue,
    delay: DelayQueue,
}

impl LinkState {
    fn new(id: LinkId) -> Self {
        Self {
            id,
            config: LinkConfig::default(),
            bandwidth: BandwidthQueue::new(),
            delay: DelayQueue::new(),
        }
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn bandwidth_queued(&self) -> usize {
        self.bandwidth.len()
    }

    pub fn delay_queued(&self) -> usize {
        self.delay.len()
    }

    pub fn next_tx_due(&self) -> Option<Micros> {
        (!self.bandwidth.is_empty()).then(|| self.bandwidth.due())
    }
}

#[derive(Default)]
pub struct EngineBuilder {
    source: Option<Box<dyn UniformSource>>,
    jitter: Option<JitterSampler>,
    table: Option<Arc<ProbabilityTable>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(mut self, source: impl UniformSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn seed(self, seed: u64) -> Self {
        self.source(StdRng::seed_from_u64(seed))
    }

    pub fn jitter(mut self, sampler: JitterSampler) -> Self {
        self.jitter = Some(sampler);
        self
    }

    /// Share an already built table instead of computing a fresh one.
    pub fn table(mut self, table: Arc<ProbabilityTable>) -> Self {
        self.table = Some(table);
        self
    }

    pub fn build<E: Egress>(self, egress: E) -> Engine<E> {
        Engine {
            links: HashMap::new(),
            routing: RoutingTable::new(),
            bandwidth_active: BTreeSet::new(),
            delay_active: BTreeSet::new(),
            table: self.table.unwrap_or_else(|| Arc::new(ProbabilityTable::build())),
            jitter: self.jitter.unwrap_or_default(),
            source: self
                .source
                .unwrap_or_else(|| Box::new(StdRng::from_entropy())),
            egress,
            stats: EngineStats::default(),
            fanout: Vec::new(),
            sweep: Vec::new(),
        }
    }
}

/// The link emulator.
///
/// Not internally synchronised: every call runs to completion and the owner
/// must serialise ingress, configuration and ticks (see `scheduler`).
pub struct Engine<E: Egress> {
    links: HashMap<LinkId, LinkState>,
    routing: RoutingTable,
    // Links with a non-empty TX queue / delay queue. The tick only visits these.
    bandwidth_active: BTreeSet<LinkId>,
    delay_active: BTreeSet<LinkId>,
    table: Arc<ProbabilityTable>,
    jitter: JitterSampler,
    source: Box<dyn UniformSource>,
    egress: E,
    stats: EngineStats,
    // Scratch buffers reused across calls
    fanout: Vec<(LinkId, Micros)>,
    sweep: Vec<LinkId>,
}

impl<E: Egress> Engine<E> {
    pub fn new(egress: E) -> Self {
        EngineBuilder::default().build(egress)
    }

    pub fn on_link_connect(&mut self, link: LinkId) -> Result<&LinkState, EngineError> {
        if self.links.contains_key(&link) {
            return Err(EngineError::LinkExists(link));
        }
        debug!("{} connected", link);
        Ok(self.links.entry(link).or_insert_with(|| LinkState::new(link)))
    }

    /// Tears a link down, discarding whatever both of its queues still hold.
    /// Returns the number of discarded packets.
    pub fn on_link_disconnect(&mut self, link: LinkId) -> Result<usize, EngineError> {
        let mut state = self.links.remove(&link).ok_or(EngineError::UnknownLink(link))?;

        let discarded = state.bandwidth.drain() + state.delay.drain();
        self.bandwidth_active.remove(&link);
        self.delay_active.remove(&link);
        if let Some(epid) = state.config.local_epid {
            self.routing.unmap(epid);
        }

        self.stats.discarded += discarded as u64;
        debug!("{} disconnected, {} queued packets discarded", link, discarded);
        Ok(discarded)
    }

    pub fn disconnect_all(&mut self) -> usize {
        let ids: Vec<LinkId> = self.links.keys().copied().collect();
        ids.into_iter()
            .filter_map(|id| self.on_link_disconnect(id).ok())
            .sum()
    }

    pub fn get_config(&self, link: LinkId) -> Result<LinkConfig, EngineError> {
        self.links
            .get(&link)
            .map(|state| state.config.clone())
            .ok_or(EngineError::UnknownLink(link))
    }

    /// Replaces a link's configuration. Nothing changes unless the whole config
    /// is acceptable; on success the old EPID is unmapped before the new one is
    /// mapped.
    pub fn set_config(&mut self, link: LinkId, config: LinkConfig) -> Result<(), ConfigError> {
        config.validate()?;
        if let Some(epid) = config.local_epid {
            if let Some(owner) = self.routing.lookup(epid) {
                if owner != link {
                    return Err(ConfigError::EpidInUse { epid, owner });
                }
            }
        }
        let state = self.links.get_mut(&link).ok_or(ConfigError::UnknownLink(link))?;

        if let Some(old) = state.config.local_epid {
            self.routing.unmap(old);
        }
        state.config = config;
        if let Some(epid) = state.config.local_epid {
            self.routing.map(epid, link);
        }

        let cfg = &state.config;
        info!(
            "{} configured: epid {:?}, {} bps, qlim {}, jitter {}us, dup {}, {} destinations",
            link,
            cfg.local_epid.map(|e| e.0),
            cfg.bandwidth,
            cfg.queue_limit,
            cfg.jitter,
            cfg.duplication,
            cfg.destinations.len()
        );
        Ok(())
    }

    pub fn on_packet_in(
        &mut self,
        link: LinkId,
        packet: Packet,
        now: Micros,
    ) -> Result<(), PacketError> {
        let state = self.links.get_mut(&link).ok_or(PacketError::UnknownLink(link))?;

        let limit = state.config.queue_limit;
        if state.bandwidth.len() >= limit as usize {
            self.stats.backpressure_drops += 1;
            trace!("{} TX queue full, dropping packet {:?}", link, packet.id);
            return Err(PacketError::Backpressure { link, limit });
        }

        if state.config.is_passthrough() && state.bandwidth.is_empty() {
            self.stats.bypassed += 1;
            self.route(link, packet, now);
            return Ok(());
        }

        let pacer = Pacer::new(&state.config, &self.jitter);
        if state.bandwidth.push(packet, now, &pacer, self.source.as_mut()) {
            self.bandwidth_active.insert(link);
        } else {
            // Keep pacing current under bursts instead of waiting for the tick
            self.drain_bandwidth(link, now);
        }
        Ok(())
    }

    /// One scheduler tick: flush everything due on the active links.
    pub fn on_tick(&mut self, now: Micros) {
        let mut sweep = std::mem::take(&mut self.sweep);

        sweep.clear();
        sweep.extend(self.bandwidth_active.iter().copied());
        for &link in &sweep {
            self.drain_bandwidth(link, now);
        }

        sweep.clear();
        sweep.extend(self.delay_active.iter().copied());
        for &link in &sweep {
            self.drain_delay(link, now);
        }

        self.sweep = sweep;
    }

    fn drain_bandwidth(&mut self, link: LinkId, now: Micros) {
        while let Some(state) = self.links.get_mut(&link) {
            let pacer = Pacer::new(&state.config, &self.jitter);
            let release = state.bandwidth.poll(now, &pacer, self.source.as_mut());
            match release {
                None => break,
                Some(Release::Duplicate(copy)) => {
                    self.stats.duplicated += 1;
                    self.route(link, copy, now);
                    // The head stays queued; it gets another go on a later pass
                    break;
                }
                Some(Release::Original(packet)) => self.route(link, packet, now),
            }
        }

        if self.links.get(&link).is_none_or(|s| s.bandwidth.is_empty()) {
            self.bandwidth_active.remove(&link);
        }
    }

    /// Fans a released packet out to every destination of `src`. Each accepted
    /// destination gets its own copy; the original is dropped here.
    fn route(&mut self, src: LinkId, packet: Packet, now: Micros) {
        let mut targets = std::mem::take(&mut self.fanout);
        targets.clear();

        if let Some(state) = self.links.get(&src) {
            for dst in &state.config.destinations {
                let Some(dst_link) = self.routing.lookup(dst.epid) else {
                    self.stats.unroutable += 1;
                    continue;
                };
                if dst.ber.is_lossy()
                    && !self.table.survives(
                        dst.ber.exponent,
                        dst.ber.mantissa,
                        packet.len(),
                        self.source.as_mut(),
                    )
                {
                    self.stats.ber_drops += 1;
                    trace!("bit errors: {:?} from {} lost towards {}", packet.id, src, dst.epid);
                    continue;
                }
                targets.push((dst_link, dst.delay_micros()));
            }
        }

        for &(dst_link, delay) in &targets {
            self.enqueue_delayed(dst_link, packet.clone(), now, delay);
        }
        self.fanout = targets;
    }

    fn enqueue_delayed(&mut self, link: LinkId, packet: Packet, now: Micros, delay: Micros) {
        if delay == 0 {
            self.stats.delivered += 1;
            self.egress.transmit(link, packet, now);
            return;
        }
        let Some(state) = self.links.get_mut(&link) else {
            return;
        };
        if state.delay.push(packet, now, delay) {
            self.delay_active.insert(link);
        } else {
            self.drain_delay(link, now);
        }
    }

    fn drain_delay(&mut self, link: LinkId, now: Micros) {
        let Some(state) = self.links.get_mut(&link) else {
            self.delay_active.remove(&link);
            return;
        };
        while let Some(packet) = state.delay.pop_due(now) {
            self.stats.delivered += 1;
            self.egress.transmit(link, packet, now);
        }
        if state.delay.is_empty() {
            self.delay_active.remove(&link);
        }
    }

    pub fn link(&self, link: LinkId) -> Option<&LinkState> {
        self.links.get(&link)
    }

    pub fn links(&self) -> impl Iterator<Item = &LinkState> {
        self.links.values()
    }

    pub fn lookup(&self, epid: Epid) -> Option<LinkId> {
        self.routing.lookup(epid)
    }

    pub fn active_bandwidth(&self) -> impl Iterator<Item = LinkId> {
        self.bandwidth_active.iter().copied()
    }

    pub fn active_delay(&self) -> impl Iterator<Item = LinkId> {
        self.delay_active.iter().copied()
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn table(&self) -> &ProbabilityTable {
        &self.table
    }

    pub fn jitter(&self) -> &JitterSampler {
        &self.jitter
    }

    pub fn egress(&self) -> &E {
        &self.egress
    }

    pub fn egress_mut(&mut self) -> &mut E {
        &mut self.egress
    }

    pub fn into_egress(self) -> E {
        self.egress
    }
}
