use super::ber::{BER_E_MAX, BER_M_MAX};
use crate::network::{Epid, LinkId, MAX_LINK_EPIDS, MAX_TOTAL_EPIDS};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_TX_QLIM: u32 = 64;

/// Duplication probability is in 0.1% steps; anything above 50% is refused.
pub const DUP_MAX: u32 = 500;

/// Bit error rate `mantissa * 10^-(exponent + 1)`. A zero mantissa means no loss.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ber {
    pub mantissa: u8,
    pub exponent: u8,
}

impl Ber {
    pub const NONE: Ber = Ber { mantissa: 0, exponent: 0 };

    pub fn new(mantissa: u8, exponent: u8) -> Self {
        Self { mantissa, exponent }
    }

    pub fn is_lossy(&self) -> bool {
        self.mantissa != 0
    }

    pub fn as_f64(&self) -> f64 {
        self.mantissa as f64 * 10f64.powi(-(self.exponent as i32 + 1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub epid: Epid,
    /// Propagation delay in tenths of a millisecond.
    #[serde(default)]
    pub delay: u16,
    #[serde(default)]
    pub ber: Ber,
}

impl Destination {
    pub fn new(epid: u32) -> Self {
        Self { epid: Epid(epid), delay: 0, ber: Ber::NONE }
    }

    pub fn with_delay(mut self, tenths_ms: u16) -> Self {
        self.delay = tenths_ms;
        self
    }

    pub fn with_ber(mut self, mantissa: u8, exponent: u8) -> Self {
        self.ber = Ber::new(mantissa, exponent);
        self
    }

    pub fn delay_micros(&self) -> u64 {
        self.delay as u64 * 100
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// `None` until the host assigns the link an address.
    #[serde(default)]
    pub local_epid: Option<Epid>,
    /// TX bandwidth in bit/s, 0 for unlimited.
    #[serde(default)]
    pub bandwidth: u32,
    /// TX queue limit in packets.
    #[serde(default = "default_queue_limit")]
    pub queue_limit: u32,
    /// Average TX jitter in microseconds.
    #[serde(default)]
    pub jitter: u32,
    /// TX duplication probability in 0.1% steps.
    #[serde(default)]
    pub duplication: u32,
    #[serde(default)]
    pub destinations: Vec<Destination>,
}

fn default_queue_limit() -> u32 {
    DEFAULT_TX_QLIM
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            local_epid: None,
            bandwidth: 0,
            queue_limit: DEFAULT_TX_QLIM,
            jitter: 0,
            duplication: 0,
            destinations: Vec::new(),
        }
    }
}

impl LinkConfig {
    pub fn with_epid(mut self, epid: u32) -> Self {
        self.local_epid = Some(Epid(epid));
        self
    }

    pub fn with_bandwidth(mut self, bps: u32) -> Self {
        self.bandwidth = bps;
        self
    }

    pub fn with_queue_limit(mut self, packets: u32) -> Self {
        self.queue_limit = packets;
        self
    }

    pub fn with_jitter(mut self, micros: u32) -> Self {
        self.jitter = micros;
        self
    }

    pub fn with_duplication(mut self, tenths_percent: u32) -> Self {
        self.duplication = tenths_percent;
        self
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destinations.push(destination);
        self
    }

    /// Packets on this link go straight to routing unless something is queued.
    pub fn is_passthrough(&self) -> bool {
        self.bandwidth == 0 && self.jitter == 0 && self.duplication == 0
    }

    pub fn is_paced(&self) -> bool {
        self.bandwidth != 0 || self.jitter != 0
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(epid) = self.local_epid {
            if !epid.is_valid() {
                return Err(ConfigError::InvalidEpid(epid));
            }
        }
        if self.queue_limit == 0 {
            return Err(ConfigError::ZeroQueueLimit);
        }
        if self.duplication > DUP_MAX {
            return Err(ConfigError::Duplication(self.duplication));
        }
        if self.destinations.len() > MAX_LINK_EPIDS {
            return Err(ConfigError::TooManyDestinations(self.destinations.len()));
        }

        for dst in &self.destinations {
            if !dst.epid.is_valid() {
                return Err(ConfigError::InvalidEpid(dst.epid));
            }
            if Some(dst.epid) == self.local_epid {
                return Err(ConfigError::SelfDestination(dst.epid));
            }
            if dst.ber.mantissa as usize > BER_M_MAX || dst.ber.exponent as usize >= BER_E_MAX {
                return Err(ConfigError::Ber {
                    epid: dst.epid,
                    mantissa: dst.ber.mantissa,
                    exponent: dst.ber.exponent,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown link {0}")]
    UnknownLink(LinkId),
    #[error("EPID {0} out of range, must be below {MAX_TOTAL_EPIDS}")]
    InvalidEpid(Epid),
    #[error("EPID {epid} already belongs to {owner}")]
    EpidInUse { epid: Epid, owner: LinkId },
    #[error("destination EPID {0} is the link's own address")]
    SelfDestination(Epid),
    #[error("queue limit must be at least one packet")]
    ZeroQueueLimit,
    #[error("duplication probability {0} exceeds {DUP_MAX}")]
    Duplication(u32),
    #[error("invalid BER (mantissa {mantissa}, exponent {exponent}) for EPID {epid}")]
    Ber { epid: Epid, mantissa: u8, exponent: u8 },
    #[error("{0} destinations exceed the per-link maximum of {MAX_LINK_EPIDS}")]
    TooManyDestinations(usize),
}
