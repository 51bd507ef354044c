// Traffic generator for one link. Stands in for the host side of a link in
// simulations: builds packets on a schedule and feeds them to the engine.

use crate::emulation::{Egress, PacketError};
use crate::metrics::MetricsCollector;
use crate::network::{LinkId, Packet, PacketId};
use crate::scheduler::{Clock, SharedEngine};
use anyhow::{Result, bail};
use rand::thread_rng;
use rand_distr::{Distribution, Exp};
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, interval};
use tracing::{debug, info, warn};

// Gap between the packets of one burst
const BURST_SPACING: Duration = Duration::from_micros(100);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrafficPattern {
    Constant { rate_pps: f64 },
    Bursty { avg_rate_pps: f64, burst_size: u32 },
    Poisson { lambda: f64 },
    PeakTraffic { base_rate: f64, peak_rate: f64, peak_duration_s: f64 },
}

pub struct Agent<E: Egress> {
    link: LinkId,
    engine: SharedEngine<E>,
    clock: Clock,
    metrics: MetricsCollector,
    traffic_pattern: TrafficPattern,
    packet_size: usize,
    sent: u64,
}

impl<E: Egress> Agent<E> {
    pub fn new(
        link: LinkId,
        engine: SharedEngine<E>,
        clock: Clock,
        metrics: MetricsCollector,
        traffic_pattern: TrafficPattern,
        packet_size: usize,
    ) -> Self {
        Self {
            link,
            engine,
            clock,
            metrics,
            traffic_pattern,
            packet_size,
            sent: 0,
        }
    }

    /// Generates traffic until the task is dropped or the link goes away.
    pub async fn run(mut self) -> Result<()> {
        info!("{} sending {:?}", self.link, self.traffic_pattern);

        match self.traffic_pattern.clone() {
            TrafficPattern::Constant { rate_pps } => self.run_constant(rate_pps).await,
            TrafficPattern::Bursty { avg_rate_pps, burst_size } => {
                self.run_bursty(avg_rate_pps, burst_size).await
            }
            TrafficPattern::Poisson { lambda } => self.run_poisson(lambda).await,
            TrafficPattern::PeakTraffic { base_rate, peak_rate, peak_duration_s } => {
                self.run_peak_traffic(base_rate, peak_rate, peak_duration_s).await
            }
        }
    }

    async fn run_constant(&mut self, rate_pps: f64) -> Result<()> {
        let mut tick = interval(period(rate_pps)?);
        loop {
            tick.tick().await;
            self.send_packet()?;
        }
    }

    async fn run_bursty(&mut self, avg_rate_pps: f64, burst_size: u32) -> Result<()> {
        if burst_size == 0 {
            bail!("burst_size must be positive");
        }
        let mut tick = interval(period(avg_rate_pps / burst_size as f64)?);
        loop {
            tick.tick().await;
            for _ in 0..burst_size {
                self.send_packet()?;
                tokio::time::sleep(BURST_SPACING).await;
            }
        }
    }

    async fn run_poisson(&mut self, lambda: f64) -> Result<()> {
        let exp_dist = Exp::new(lambda)
            .map_err(|e| anyhow::anyhow!("poisson lambda {}: {}", lambda, e))?;
        loop {
            // ThreadRng is not Send, don't hold it across the sleep
            let wait_time = exp_dist.sample(&mut thread_rng());
            tokio::time::sleep(Duration::from_secs_f64(wait_time)).await;
            self.send_packet()?;
        }
    }

    async fn run_peak_traffic(
        &mut self,
        base_rate: f64,
        peak_rate: f64,
        peak_duration_s: f64,
    ) -> Result<()> {
        let peak = period(peak_rate)?;
        let base = period(base_rate)?;
        let start = tokio::time::Instant::now();
        let peak_duration = Duration::from_secs_f64(peak_duration_s.max(0.0));

        loop {
            let wait = if start.elapsed() < peak_duration { peak } else { base };
            tokio::time::sleep(wait).await;
            self.send_packet()?;
        }
    }

    fn send_packet(&mut self) -> Result<()> {
        // Unique across links so traces can tell sources apart
        let id = PacketId::new(((self.link.0 as u64) << 40) | self.sent);
        self.sent += 1;

        let now = self.clock.now();
        let packet = Packet::zeroed(id, self.packet_size, now);
        self.metrics.packet_offered();

        let result = self.engine.lock().on_packet_in(self.link, packet, now);
        match result {
            Ok(()) => Ok(()),
            Err(PacketError::Backpressure { .. }) => {
                self.metrics.packet_backpressured();
                debug!("{} backpressured packet {}", self.link, id.value());
                Ok(())
            }
            Err(e @ PacketError::UnknownLink(_)) => {
                warn!("{} stopped sending: {}", self.link, e);
                Err(e.into())
            }
        }
    }
}

fn period(rate_pps: f64) -> Result<Duration> {
    if !(rate_pps.is_finite() && rate_pps > 0.0) {
        bail!("packet rate must be positive, got {}", rate_pps);
    }
    Ok(Duration::from_secs_f64(1.0 / rate_pps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulation::{Delivery, Destination, EngineBuilder, LinkConfig};
    use crate::scheduler::shared;

    #[test]
    fn period_rejects_nonsense_rates() {
        assert_eq!(period(4.0).unwrap(), Duration::from_millis(250));
        assert!(period(0.0).is_err());
        assert!(period(f64::NAN).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn constant_source_feeds_engine() {
        let engine = shared(EngineBuilder::new().seed(3).build(Vec::<Delivery>::new()));
        {
            let mut e = engine.lock();
            e.on_link_connect(LinkId(0)).unwrap();
            e.on_link_connect(LinkId(1)).unwrap();
            let cfg = LinkConfig::default().with_epid(1).with_destination(Destination::new(2));
            e.set_config(LinkId(0), cfg).unwrap();
            e.set_config(LinkId(1), LinkConfig::default().with_epid(2)).unwrap();
        }
        let metrics = MetricsCollector::new();
        let agent = Agent::new(
            LinkId(0),
            engine.clone(),
            Clock::new(),
            metrics.clone(),
            TrafficPattern::Constant { rate_pps: 100.0 },
            64,
        );

        let _ = tokio::time::timeout(Duration::from_millis(95), agent.run()).await;

        // first tick fires immediately, then every 10 ms
        assert_eq!(metrics.offered(), 10);
        let e = engine.lock();
        assert_eq!(e.egress().len(), 10);
        assert!(e.egress().iter().all(|d| d.link == LinkId(1) && d.packet.len() == 64));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_link_ends_the_agent() {
        let engine = shared(EngineBuilder::new().seed(3).build(Vec::<Delivery>::new()));
        let agent = Agent::new(
            LinkId(9),
            engine,
            Clock::new(),
            MetricsCollector::new(),
            TrafficPattern::Constant { rate_pps: 10.0 },
            64,
        );
        assert!(agent.run().await.is_err());
    }
}
