pub mod packet;

pub use packet::{Packet, PacketId};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonic time in microseconds. Every engine operation takes one of these.
pub type Micros = u64;

pub const MICROS_PER_SEC: Micros = 1_000_000;

/// Highest EPID count the routing table can hold. Valid EPIDs are `0..MAX_TOTAL_EPIDS`.
pub const MAX_TOTAL_EPIDS: u32 = 10_000;

pub const MAX_LINK_EPIDS: usize = 2048;

/// Identifies a virtual link attached to the engine. Chosen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkId(pub u32);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link{}", self.0)
    }
}

/// Endpoint identifier, the address other links use to reach a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Epid(pub u32);

impl Epid {
    pub fn is_valid(self) -> bool {
        self.0 < MAX_TOTAL_EPIDS
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Epid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Time needed to clock `len` bytes onto a link of `bandwidth_bps`.
/// Zero bandwidth means unlimited.
pub fn transmission_delay(bandwidth_bps: u32, len: usize) -> Micros {
    if bandwidth_bps == 0 {
        return 0;
    }
    len as u64 * 8 * MICROS_PER_SEC / bandwidth_bps as u64
}
