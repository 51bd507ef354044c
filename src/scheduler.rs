use crate::emulation::{Egress, Engine};
use crate::network::Micros;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Period of the queue flush when nothing else is configured.
pub const DEFAULT_TICK: Duration = Duration::from_millis(1);

/// The engine behind its single-writer lock. Ingress, reconfiguration and
/// ticks all go through this mutex, one at a time.
pub type SharedEngine<E> = Arc<Mutex<Engine<E>>>;

pub fn shared<E: Egress>(engine: Engine<E>) -> SharedEngine<E> {
    Arc::new(Mutex::new(engine))
}

/// Monotonic microsecond clock. Traffic sources and the scheduler share one so
/// timestamps handed to the engine are comparable.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    start: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    pub fn now(&self) -> Micros {
        self.start.elapsed().as_micros() as Micros
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Scheduler;

impl Scheduler {
    /// Starts the periodic flush. Each tick samples the clock once and hands
    /// that same instant to every queue it drains. Runs until `cancel` fires.
    pub fn spawn<E: Egress + 'static>(
        engine: SharedEngine<E>,
        clock: Clock,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<u64> {
        tokio::spawn(async move {
            let mut tick = interval(period);
            // A late tick flushes everything due anyway, no need to catch up
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Scheduler running every {:?}", period);

            let mut ticks = 0u64;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        let now = clock.now();
                        engine.lock().on_tick(now);
                        ticks += 1;
                    }
                }
            }

            debug!("Scheduler stopped after {} ticks", ticks);
            ticks
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulation::{Delivery, Destination, EngineBuilder, LinkConfig};
    use crate::network::{LinkId, Packet, PacketId};

    #[tokio::test(start_paused = true)]
    async fn delayed_packet_drains_without_new_arrivals() {
        let engine = shared(EngineBuilder::new().seed(1).build(Vec::<Delivery>::new()));
        let clock = Clock::new();
        {
            let mut e = engine.lock();
            e.on_link_connect(LinkId(0)).unwrap();
            e.on_link_connect(LinkId(1)).unwrap();
            let cfg = LinkConfig::default()
                .with_epid(1)
                .with_destination(Destination::new(2).with_delay(50));
            e.set_config(LinkId(0), cfg).unwrap();
            e.set_config(LinkId(1), LinkConfig::default().with_epid(2)).unwrap();
            e.on_packet_in(LinkId(0), Packet::zeroed(PacketId::new(1), 64, 0), clock.now())
                .unwrap();
            assert!(e.egress().is_empty());
        }

        let cancel = CancellationToken::new();
        let handle = Scheduler::spawn(engine.clone(), clock, DEFAULT_TICK, cancel.clone());

        // 5 ms delay, give it a few ticks of slack
        tokio::time::sleep(Duration::from_millis(8)).await;
        cancel.cancel();
        let ticks = handle.await.unwrap();
        assert!(ticks >= 5);

        let e = engine.lock();
        assert_eq!(e.egress().len(), 1);
        assert_eq!(e.egress()[0].link, LinkId(1));
        assert!(e.egress()[0].at >= 5_000);
        assert_eq!(e.active_delay().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn clock_follows_tokio_time() {
        let clock = Clock::new();
        tokio::time::advance(Duration::from_millis(3)).await;
        assert!(clock.now() >= 3_000);
    }
}
