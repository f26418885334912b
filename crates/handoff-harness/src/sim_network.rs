//! Simulated network with fault injection.
//!
//! Every machine has an uplink queue to the server and a downlink queue from
//! it. Frames travel as encoded bytes so each delivery exercises the wire
//! codec. Within one queue delivery is FIFO, which preserves per-sender order;
//! across queues the next delivery is picked by a seeded RNG.
//!
//! Faults are applied when a frame is enqueued: it may be dropped, duplicated,
//! or discarded because either end is partitioned.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use handoff_core::{BroadcastLink, LinkError, ServerLink};
use handoff_proto::{Frame, ParticipantId, ProtocolError};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Probabilities of per-delivery faults.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FaultConfig {
    /// Chance a frame is lost, `0.0..=1.0`
    pub drop_rate: f64,
    /// Chance a frame is delivered twice, `0.0..=1.0`
    pub duplicate_rate: f64,
}

impl FaultConfig {
    /// Reliable delivery.
    pub fn none() -> Self {
        Self::default()
    }

    /// Whether no fault can ever fire.
    pub fn is_reliable(&self) -> bool {
        self.drop_rate <= 0.0 && self.duplicate_rate <= 0.0
    }
}

/// Frames a controller or server handed to its link, waiting to be moved onto
/// the network.
#[derive(Debug, Default)]
pub struct Outbox {
    frames: VecDeque<Frame>,
}

impl Outbox {
    /// Take every queued frame in send order.
    pub fn drain(&mut self) -> Vec<Frame> {
        self.frames.drain(..).collect()
    }

    /// Number of queued frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl ServerLink for Outbox {
    fn call_server(&mut self, frame: Frame) -> Result<(), LinkError> {
        self.frames.push_back(frame);
        Ok(())
    }
}

impl BroadcastLink for Outbox {
    fn broadcast(&mut self, frame: Frame) -> Result<(), LinkError> {
        self.frames.push_back(frame);
        Ok(())
    }
}

/// Direction and endpoint of a queued frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Route {
    /// From the machine controlling this participant to the server
    ToServer(ParticipantId),
    /// From the server to the machine controlling this participant
    ToMachine(ParticipantId),
}

/// A frame taken off the network for delivery.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Where it goes
    pub route: Route,
    /// Encoded frame
    pub bytes: Vec<u8>,
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStats {
    /// Frames handed to the network, per recipient
    pub sent: u64,
    /// Frames lost to drops or partitions
    pub dropped: u64,
    /// Extra copies enqueued
    pub duplicated: u64,
    /// Frames taken off the network
    pub delivered: u64,
}

/// Deterministic simulated network.
#[derive(Debug)]
pub struct SimNetwork {
    rng: ChaCha8Rng,
    faults: FaultConfig,
    queues: BTreeMap<Route, VecDeque<Vec<u8>>>,
    machines: BTreeSet<ParticipantId>,
    partitioned: BTreeSet<ParticipantId>,
    stats: NetworkStats,
}

impl SimNetwork {
    /// Create a network whose fault and ordering decisions follow `seed`.
    pub fn new(seed: u64, faults: FaultConfig) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            faults,
            queues: BTreeMap::new(),
            machines: BTreeSet::new(),
            partitioned: BTreeSet::new(),
            stats: NetworkStats::default(),
        }
    }

    /// Connect the machine controlling `machine`.
    pub fn attach(&mut self, machine: ParticipantId) {
        self.machines.insert(machine);
    }

    /// Disconnect a machine and discard everything queued to or from it.
    pub fn detach(&mut self, machine: ParticipantId) {
        self.machines.remove(&machine);
        self.partitioned.remove(&machine);
        for route in [Route::ToServer(machine), Route::ToMachine(machine)] {
            if let Some(queue) = self.queues.remove(&route) {
                self.stats.dropped += queue.len() as u64;
            }
        }
    }

    /// Current fault probabilities.
    pub fn faults(&self) -> FaultConfig {
        self.faults
    }

    /// Change fault probabilities for frames enqueued from now on.
    pub fn set_faults(&mut self, faults: FaultConfig) {
        self.faults = faults;
    }

    /// Cut `machine` off; frames to or from it are lost until healed.
    pub fn partition(&mut self, machine: ParticipantId) {
        self.partitioned.insert(machine);
    }

    /// Reconnect a partitioned machine.
    pub fn heal(&mut self, machine: ParticipantId) {
        self.partitioned.remove(&machine);
    }

    /// Reconnect every partitioned machine.
    pub fn heal_all(&mut self) {
        self.partitioned.clear();
    }

    /// Whether `machine` is partitioned.
    pub fn is_partitioned(&self, machine: ParticipantId) -> bool {
        self.partitioned.contains(&machine)
    }

    /// Delivery counters.
    pub fn stats(&self) -> NetworkStats {
        self.stats
    }

    /// Frames waiting for delivery.
    pub fn in_flight(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    /// Whether nothing is waiting for delivery.
    pub fn is_idle(&self) -> bool {
        self.in_flight() == 0
    }

    /// Queue a directed call from `from` to the server.
    ///
    /// # Errors
    ///
    /// - `ProtocolError` if the frame cannot be encoded
    pub fn send_to_server(&mut self, from: ParticipantId, frame: &Frame) -> Result<(), ProtocolError> {
        let bytes = frame.to_vec()?;
        self.enqueue(Route::ToServer(from), bytes);
        Ok(())
    }

    /// Queue a server broadcast to every attached machine.
    ///
    /// Faults are rolled independently per recipient.
    ///
    /// # Errors
    ///
    /// - `ProtocolError` if the frame cannot be encoded
    pub fn broadcast(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        let bytes = frame.to_vec()?;
        let machines: Vec<ParticipantId> = self.machines.iter().copied().collect();
        for machine in machines {
            self.enqueue(Route::ToMachine(machine), bytes.clone());
        }
        Ok(())
    }

    /// Frames waiting on `route`.
    pub fn queued(&self, route: Route) -> usize {
        self.queues.get(&route).map_or(0, VecDeque::len)
    }

    /// Lose the frame at `position` in the queue of `route`, as if it had
    /// been dropped in transit. Returns whether there was one.
    pub fn drop_queued(&mut self, route: Route, position: usize) -> bool {
        let Some(queue) = self.queues.get_mut(&route) else {
            return false;
        };
        if queue.remove(position).is_none() {
            return false;
        }

        tracing::trace!(?route, position, "queued frame dropped");
        self.stats.dropped += 1;
        true
    }

    /// Take the next frame off the network, or `None` if idle.
    ///
    /// The queue is chosen at random; within a queue order is FIFO.
    pub fn next(&mut self) -> Option<Envelope> {
        let ready: Vec<Route> = self
            .queues
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(route, _)| *route)
            .collect();

        if ready.is_empty() {
            return None;
        }

        let route = ready[self.rng.gen_range(0..ready.len())];
        let bytes = self.queues.get_mut(&route)?.pop_front()?;
        self.stats.delivered += 1;
        Some(Envelope { route, bytes })
    }

    fn enqueue(&mut self, route: Route, bytes: Vec<u8>) {
        self.stats.sent += 1;

        let machine = match route {
            Route::ToServer(machine) | Route::ToMachine(machine) => machine,
        };

        if !self.machines.contains(&machine) || self.partitioned.contains(&machine) {
            self.stats.dropped += 1;
            return;
        }

        if self.roll(self.faults.drop_rate) {
            tracing::trace!(?route, "frame dropped");
            self.stats.dropped += 1;
            return;
        }

        let duplicate = self.roll(self.faults.duplicate_rate);
        let queue = self.queues.entry(route).or_default();
        if duplicate {
            queue.push_back(bytes.clone());
            self.stats.duplicated += 1;
        }
        queue.push_back(bytes);
    }

    fn roll(&mut self, rate: f64) -> bool {
        rate > 0.0 && self.rng.gen_bool(rate.min(1.0))
    }
}
