//! Property tests for the queueing and loss model.

use proptest::prelude::*;
use rfee::emulation::ber::{BER_E_MAX, BER_M_MAX, BER_PLEN_MAX, ONE};
use rfee::emulation::jitter::DEFAULT_JITTER_TABLE;
use rfee::emulation::{PacketError, SequenceSource};
use rfee::prelude::*;
use std::sync::{Arc, OnceLock};

fn table() -> Arc<ProbabilityTable> {
    static TABLE: OnceLock<Arc<ProbabilityTable>> = OnceLock::new();
    TABLE.get_or_init(|| Arc::new(ProbabilityTable::build())).clone()
}

fn engine(source: SequenceSource) -> Engine<Vec<Delivery>> {
    EngineBuilder::new()
        .source(source)
        .table(table())
        .build(Vec::<Delivery>::new())
}

proptest! {
    /// The TX queue never grows past its limit, and everything past the
    /// limit is refused with backpressure rather than silently dropped.
    #[test]
    fn tx_queue_respects_limit(
        limit in 1u32..=64,
        bandwidth in 1_000u32..=1_000_000,
        offered in 0usize..200,
        len in 1usize..=1500,
    ) {
        let mut engine = engine(SequenceSource::constant(0));
        engine.on_link_connect(LinkId(0)).unwrap();
        engine.on_link_connect(LinkId(1)).unwrap();
        let cfg = LinkConfig::default()
            .with_epid(1)
            .with_bandwidth(bandwidth)
            .with_queue_limit(limit)
            .with_destination(Destination::new(2));
        engine.set_config(LinkId(0), cfg).unwrap();
        engine.set_config(LinkId(1), LinkConfig::default().with_epid(2)).unwrap();

        let mut refused = 0usize;
        for id in 0..offered {
            let packet = Packet::zeroed(PacketId::new(id as u64), len, 0);
            match engine.on_packet_in(LinkId(0), packet, 0) {
                Ok(()) => {}
                Err(PacketError::Backpressure { limit: l, .. }) => {
                    prop_assert_eq!(l, limit);
                    refused += 1;
                }
                Err(e) => prop_assert!(false, "unexpected {:?}", e),
            }
            let queued = engine.link(LinkId(0)).unwrap().bandwidth_queued();
            prop_assert!(queued <= limit as usize);
        }

        // nothing can leave at t=0 on a paced link
        let accepted = offered.min(limit as usize);
        prop_assert_eq!(refused, offered - accepted);
        prop_assert_eq!(engine.stats().backpressure_drops as usize, refused);
        prop_assert!(engine.egress().is_empty());
    }

    /// Longer frames never survive more often, and neither do higher error rates.
    #[test]
    fn survival_is_monotone(
        exponent in 0u8..BER_E_MAX as u8,
        mantissa in 1u8..=BER_M_MAX as u8,
        len in 0usize..BER_PLEN_MAX,
    ) {
        let table = table();
        let p = table.survival_probability(exponent, mantissa, len);
        prop_assert!(p <= ONE);
        prop_assert!(table.survival_probability(exponent, mantissa, len + 1) <= p);
        if mantissa < BER_M_MAX as u8 {
            prop_assert!(table.survival_probability(exponent, mantissa + 1, len) <= p);
        }
        if exponent > 0 {
            // a smaller exponent is a larger error rate
            prop_assert!(table.survival_probability(exponent - 1, mantissa, len) <= p);
        }
    }

    /// Scaled jitter stays inside the scaled table bounds.
    #[test]
    fn jitter_sample_is_bounded(draw in any::<u32>(), average in 1u32..100_000) {
        let sampler = JitterSampler::default();
        let lo = DEFAULT_JITTER_TABLE.iter().map(|r| r.lo).min().unwrap() as u64;
        let hi = DEFAULT_JITTER_TABLE.iter().map(|r| r.hi).max().unwrap() as u64;
        let mean = sampler.mean() as u64;

        let sample = sampler.sample(&mut SequenceSource::constant(draw), average);
        prop_assert!(sample >= lo * average as u64 / mean);
        prop_assert!(sample < hi * average as u64 / mean + 1);
    }

    /// A passthrough link hands one copy to every mapped destination.
    #[test]
    fn fanout_copies_once_per_destination(targets in 1u32..16, packets in 1u64..20) {
        let mut engine = engine(SequenceSource::constant(0));
        let mut cfg = LinkConfig::default().with_epid(0);
        for t in 1..=targets {
            engine.on_link_connect(LinkId(t)).unwrap();
            engine.set_config(LinkId(t), LinkConfig::default().with_epid(t)).unwrap();
            cfg = cfg.with_destination(Destination::new(t));
        }
        engine.on_link_connect(LinkId(0)).unwrap();
        engine.set_config(LinkId(0), cfg).unwrap();

        for id in 0..packets {
            engine.on_packet_in(LinkId(0), Packet::zeroed(PacketId::new(id), 32, id), id).unwrap();
        }
        prop_assert_eq!(engine.egress().len() as u64, targets as u64 * packets);
        prop_assert_eq!(engine.stats().bypassed, packets);
        for t in 1..=targets {
            let n = engine.egress().iter().filter(|d| d.link == LinkId(t)).count() as u64;
            prop_assert_eq!(n, packets);
        }
    }
}
