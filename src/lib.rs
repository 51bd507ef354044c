pub mod agent;
pub mod emulation;
pub mod metrics;
pub mod network;
pub mod scheduler;
pub mod simulation;

pub use agent::Agent;
pub use emulation::{Egress, Engine, EngineBuilder};
pub use scheduler::{Clock, Scheduler, SharedEngine};
pub use simulation::{SimConfig, Simulation};
pub use metrics::MetricsCollector;

pub mod prelude {
    pub use crate::agent::{Agent, TrafficPattern};
    pub use crate::emulation::{
        Ber, ConfigError, Delivery, Destination, Egress, Engine, EngineBuilder, EngineStats,
        JitterSampler, LinkConfig, PacketError, ProbabilityTable,
    };
    pub use crate::metrics::{MetricsCollector, MetricsEgress, MetricsSnapshot};
    pub use crate::network::{Epid, LinkId, Micros, Packet, PacketId};
    pub use crate::scheduler::{Clock, DEFAULT_TICK, Scheduler, SharedEngine, shared};
    pub use crate::simulation::{LinkSpec, SimConfig, SimReport, Simulation};
}
