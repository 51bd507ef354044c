pub mod config;
pub use config::{LinkSpec, SimConfig};

use crate::agent::Agent;
use crate::emulation::{EngineBuilder, EngineStats};
use crate::metrics::logger::{MetricsLogger, write_link_totals};
use crate::metrics::{MetricsCollector, MetricsEgress, MetricsSnapshot};
use crate::network::LinkId;
use crate::scheduler::{Clock, Scheduler, SharedEngine, shared};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// What a finished run looked like, also written out as the JSON summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimReport {
    pub name: String,
    pub duration_secs: u64,
    pub seed: Option<u64>,
    pub engine: EngineStats,
    pub final_snapshot: MetricsSnapshot,
    pub links: Vec<LinkTotals>,
    /// Packets still queued when the links were torn down.
    pub discarded_on_shutdown: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkTotals {
    pub link: LinkId,
    pub delivered: u64,
    pub bytes: u64,
}

pub struct Simulation {
    config: SimConfig,
    output_dir: PathBuf,
    pub metrics: MetricsCollector,
}

impl Simulation {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            output_dir: PathBuf::from("results"),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Engine with every scenario link connected and configured.
    pub fn build_engine(&self) -> Result<SharedEngine<MetricsEgress>> {
        let mut builder = EngineBuilder::new();
        if let Some(seed) = self.config.seed {
            builder = builder.seed(seed);
        }
        let mut engine = builder.build(MetricsEgress::new(self.metrics.clone()));

        for spec in &self.config.links {
            engine.on_link_connect(spec.id)?;
        }
        for spec in &self.config.links {
            engine
                .set_config(spec.id, spec.config.clone())
                .with_context(|| format!("configuring {}", spec.id))?;
        }
        Ok(shared(engine))
    }

    pub async fn run(&mut self) -> Result<SimReport> {
        info!("Starting simulation: {}", self.config.name);
        info!("Duration: {:?}", self.config.duration());
        info!("Links: {}, tick every {:?}", self.config.links.len(), self.config.tick_interval());

        self.config.check()?;
        let engine = self.build_engine()?;
        let clock = Clock::new();
        let cancel_token = CancellationToken::new();

        let scheduler = Scheduler::spawn(
            engine.clone(),
            clock,
            self.config.tick_interval(),
            cancel_token.clone(),
        );

        let mut agent_handles = Vec::new();
        for spec in &self.config.links {
            let Some(pattern) = spec.traffic.clone() else {
                continue;
            };
            let agent = Agent::new(
                spec.id,
                engine.clone(),
                clock,
                self.metrics.clone(),
                pattern,
                spec.packet_size,
            );
            let link = spec.id;
            let cancel = cancel_token.clone();

            agent_handles.push(tokio::spawn(async move {
                tokio::select! {
                    result = agent.run() => {
                        if let Err(e) = result {
                            error!("{} traffic error: {}", link, e);
                        }
                    }
                    _ = cancel.cancelled() => {}
                }
            }));
        }

        let pb = ProgressBar::new(self.config.duration_secs);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.orange/yellow} {pos}/{len}s {msg}")?
                .progress_chars("█▓░"),
        );

        let mut tick = interval(Duration::from_secs(1));
        tick.tick().await;
        for _ in 0..self.config.duration_secs {
            tick.tick().await;
            let stats = *engine.lock().stats();
            let snapshot = self.metrics.save_snapshot(&stats);
            pb.inc(1);
            pb.set_message(format!(
                "Delivered: {} | Backpressure: {:.2}% | BER drops: {}",
                snapshot.delivered,
                snapshot.loss_rate * 100.0,
                snapshot.ber_drops
            ));
        }

        pb.finish_with_message("Simulation complete");

        info!("Shutting down simulation..");
        cancel_token.cancel();

        for handle in agent_handles {
            let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
        }
        let ticks = scheduler.await.context("scheduler task panicked")?;
        info!("Scheduler ran {} ticks", ticks);

        let (discarded, stats) = {
            let mut engine = engine.lock();
            let discarded = engine.disconnect_all();
            (discarded, *engine.stats())
        };
        info!("{} packets still queued were discarded", discarded);

        let report = SimReport {
            name: self.config.name.clone(),
            duration_secs: self.config.duration_secs,
            seed: self.config.seed,
            engine: stats,
            final_snapshot: self.metrics.snapshot(&stats),
            links: self
                .metrics
                .per_link()
                .into_iter()
                .map(|(link, c)| LinkTotals { link, delivered: c.delivered, bytes: c.bytes })
                .collect(),
            discarded_on_shutdown: discarded,
        };

        self.save_results(&report)?;
        Ok(report)
    }

    fn save_results(&self, report: &SimReport) -> Result<()> {
        let snapshots = self.metrics.get_snapshots();
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");

        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("cannot create {}", self.output_dir.display()))?;
        let stem = format!("{}_{}", self.config.name, timestamp);

        let csv_path = self.output_dir.join(format!("{}.csv", stem));
        let mut logger = MetricsLogger::create(&csv_path)?;
        logger.log_batch(&snapshots)?;
        info!("Results saved to: {}", csv_path.display());

        let links_path = self.output_dir.join(format!("{}_links.csv", stem));
        write_link_totals(&links_path, &self.metrics.per_link())?;

        let json_path = self.output_dir.join(format!("{}_summary.json", stem));
        std::fs::write(&json_path, serde_json::to_string_pretty(report)?)?;
        info!("Summary saved to: {}", json_path.display());

        let last = &report.final_snapshot;
        info!("Throughput: {:.3} Mbps", last.throughput_bps / 1_000_000.0);
        info!("Avg Latency: {:.2} ms", last.avg_latency_ms);
        info!("Backpressure loss: {:.2}%", last.loss_rate * 100.0);
        info!(
            "Duplicated: {}, BER drops: {}, unroutable: {}",
            report.engine.duplicated, report.engine.ber_drops, report.engine.unroutable
        );

        Ok(())
    }
}
