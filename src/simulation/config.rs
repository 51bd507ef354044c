use crate::agent::TrafficPattern;
use crate::emulation::{Destination, LinkConfig};
use crate::network::LinkId;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// A scenario: which links exist, how each is configured and what it sends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    pub name: String,
    pub duration_secs: u64,
    #[serde(default = "default_tick_us")]
    pub tick_interval_us: u64,
    /// Fixes every random decision of the engine. Traffic timing stays random.
    #[serde(default)]
    pub seed: Option<u64>,
    pub links: Vec<LinkSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSpec {
    pub id: LinkId,
    #[serde(default)]
    pub config: LinkConfig,
    /// Links without traffic only receive.
    #[serde(default)]
    pub traffic: Option<TrafficPattern>,
    #[serde(default = "default_packet_size")]
    pub packet_size: usize,
}

fn default_tick_us() -> u64 {
    1_000
}

fn default_packet_size() -> usize {
    1500
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            name: "default_sim".to_string(),
            duration_secs: 10,
            tick_interval_us: default_tick_us(),
            seed: None,
            links: Vec::new(),
        }
    }
}

impl LinkSpec {
    pub fn new(id: u32, config: LinkConfig) -> Self {
        Self {
            id: LinkId(id),
            config,
            traffic: None,
            packet_size: default_packet_size(),
        }
    }

    pub fn with_traffic(mut self, pattern: TrafficPattern) -> Self {
        self.traffic = Some(pattern);
        self
    }

    pub fn with_packet_size(mut self, bytes: usize) -> Self {
        self.packet_size = bytes;
        self
    }
}

impl SimConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read scenario {}", path.display()))?;
        let config: SimConfig = serde_json::from_str(&raw)
            .with_context(|| format!("malformed scenario {}", path.display()))?;
        config.check()?;
        Ok(config)
    }

    /// Scenario level sanity checks. Per link configs are validated by the
    /// engine when applied.
    pub fn check(&self) -> Result<()> {
        if self.tick_interval_us == 0 {
            bail!("tick_interval_us must be positive");
        }
        let mut seen = HashSet::new();
        for link in &self.links {
            if !seen.insert(link.id) {
                bail!("{} is listed twice", link.id);
            }
        }
        Ok(())
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros(self.tick_interval_us)
    }

    pub fn with_link(mut self, link: LinkSpec) -> Self {
        self.links.push(link);
        self
    }

    /// Two hosts talking over a slow, lossy, jittery pair of links.
    pub fn example() -> Self {
        let a = LinkConfig::default()
            .with_epid(1)
            .with_bandwidth(1_000_000)
            .with_jitter(500)
            .with_duplication(5)
            .with_destination(Destination::new(2).with_delay(200).with_ber(1, 4));
        let b = LinkConfig::default()
            .with_epid(2)
            .with_bandwidth(2_000_000)
            .with_destination(Destination::new(1).with_delay(200));

        SimConfig {
            name: "two_hosts".to_string(),
            ..Default::default()
        }
        .with_link(LinkSpec::new(0, a).with_traffic(TrafficPattern::Poisson { lambda: 60.0 }))
        .with_link(
            LinkSpec::new(1, b)
                .with_traffic(TrafficPattern::Constant { rate_pps: 100.0 })
                .with_packet_size(512),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_survives_json() {
        let json = serde_json::to_string_pretty(&SimConfig::example()).unwrap();
        let back: SimConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.links.len(), 2);
        assert_eq!(back.links[0].config, SimConfig::example().links[0].config);
        assert!(back.check().is_ok());
    }

    #[test]
    fn minimal_scenario_uses_defaults() {
        let json = r#"{
            "name": "tiny",
            "duration_secs": 1,
            "links": [ { "id": 3 } ]
        }"#;
        let config: SimConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.tick_interval(), Duration::from_millis(1));
        assert_eq!(config.links[0].packet_size, 1500);
        assert_eq!(config.links[0].config, LinkConfig::default());
        assert!(config.links[0].traffic.is_none());
    }

    #[test]
    fn duplicate_link_ids_are_refused() {
        let config = SimConfig::default()
            .with_link(LinkSpec::new(1, LinkConfig::default()))
            .with_link(LinkSpec::new(1, LinkConfig::default()));
        assert!(config.check().is_err());
    }
}
