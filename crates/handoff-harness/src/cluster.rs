//! Simulated cluster for convergence testing.
//!
//! One server and one machine per participant. Every machine holds a replica
//! of every participant (local for its own, remote for the others), a mirror
//! of the ledger, and its own view of the shared items. All traffic goes
//! through a [`SimNetwork`], so delivery order and faults follow the seed.
//!
//! Operations only enqueue traffic; call [`Cluster::step`] or
//! [`Cluster::run_until_quiescent`] to deliver it.

use std::time::Duration;

use handoff_client::{Controller, ControllerConfig, ControllerError, Lock, Participant};
use handoff_core::{DeviceId, Environment};
use handoff_proto::{Frame, ItemRef, ParticipantId};
use handoff_server::{Server, ServerAction, ServerConfig, ServerDriver, ServerError, ServerEvent};

use crate::{
    invariants::{MachineSnapshot, SystemSnapshot},
    model::{ObservableState, Operation, OperationResult, WorldShape},
    sim_env::SimEnv,
    sim_item::{RecordingHooks, SimItemDirectory},
    sim_network::{FaultConfig, Outbox, Route, SimNetwork},
};

/// Controller type every simulated machine runs.
pub type SimController = Controller<Outbox, RecordingHooks>;

/// Upper bound on deliveries in one [`Cluster::run_until_quiescent`] call.
const MAX_STEPS: usize = 100_000;

/// Cluster configuration
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Participants, devices and items
    pub shape: WorldShape,
    /// Seed for delivery order and faults
    pub seed: u64,
    /// Network faults
    pub faults: FaultConfig,
    /// Server configuration
    pub server: ServerConfig,
    /// Configuration shared by every controller
    pub controller: ControllerConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            shape: WorldShape { participants: 3, devices: 2, items: 4 },
            seed: 0,
            faults: FaultConfig::none(),
            server: ServerConfig::default(),
            controller: ControllerConfig::default(),
        }
    }
}

/// One simulated machine.
pub struct Machine {
    participant: ParticipantId,
    controller: SimController,
    items: SimItemDirectory,
    departed: bool,
}

impl Machine {
    /// Participant this machine controls.
    pub fn participant(&self) -> ParticipantId {
        self.participant
    }

    /// The machine's controller.
    pub fn controller(&self) -> &SimController {
        &self.controller
    }

    /// The machine's items.
    pub fn items(&self) -> &SimItemDirectory {
        &self.items
    }

    /// Local replica of the controlled participant.
    pub fn local(&self) -> Option<&Participant<RecordingHooks>> {
        self.controller.participant(self.participant)
    }

    /// Replica of `participant` on this machine.
    pub fn replica(&self, participant: ParticipantId) -> Option<&Participant<RecordingHooks>> {
        self.controller.participant(participant)
    }

    /// Whether the participant left the session.
    pub fn has_departed(&self) -> bool {
        self.departed
    }

    fn snapshot(&self) -> Option<MachineSnapshot> {
        let local = self.local()?;

        Some(MachineSnapshot {
            participant: self.participant,
            mirror: self.controller.mirror().iter().collect(),
            slots: local.slots().iter().map(|slot| (slot.device(), slot.item())).collect(),
            controlled: local
                .finalizer()
                .map(|finalizer| finalizer.controlled().collect())
                .unwrap_or_default(),
            driven: self.items.driven(),
            pending: local.pending_count(),
            unresolved: self.controller.unresolved().collect(),
        })
    }
}

/// Simulated server, machines and network.
pub struct Cluster {
    shape: WorldShape,
    env: SimEnv,
    server: Server<SimEnv, Outbox>,
    machines: Vec<Machine>,
    network: SimNetwork,
    handle_log: Vec<ServerAction>,
    server_errors: Vec<ServerError>,
    client_errors: Vec<(ParticipantId, ControllerError)>,
}

impl Cluster {
    /// Build a cluster with every participant joined and every item
    /// registered.
    pub fn new(config: ClusterConfig) -> Result<Self, String> {
        let ClusterConfig { shape, seed, faults, server: server_config, controller: controller_config } =
            config;

        let env = SimEnv::new();
        let mut server = Server::new(env.clone(), server_config, Outbox::default());
        for item in shape.all_items() {
            server.driver_mut().register_item(item);
        }

        let mut network = SimNetwork::new(seed, faults);
        let mut machines = Vec::with_capacity(shape.participants);

        for index in 0..shape.participants {
            let participant = WorldShape::participant_id(index);
            let devices: Vec<DeviceId> =
                (0..shape.devices).map(|device| WorldShape::device_id(index, device)).collect();

            let mut controller = Controller::new(Outbox::default(), controller_config);
            for other in 0..shape.participants {
                let id = WorldShape::participant_id(other);
                if other == index {
                    let hooks =
                        devices.first().copied().map(RecordingHooks::with_main).unwrap_or_default();
                    let mut local = Participant::local(id, hooks);
                    local
                        .initialize(server.driver_mut().registry_mut(), devices.iter().copied())
                        .map_err(|e| format!("initialize {id}: {e}"))?;
                    controller.insert_participant(local);
                } else {
                    controller.insert_participant(Participant::remote(id, RecordingHooks::default()));
                }
            }

            network.attach(participant);
            machines.push(Machine {
                participant,
                controller,
                items: SimItemDirectory::with_items(shape.all_items()),
                departed: false,
            });
        }

        Ok(Self {
            shape,
            env,
            server,
            machines,
            network,
            handle_log: Vec::new(),
            server_errors: Vec::new(),
            client_errors: Vec::new(),
        })
    }

    /// Shape of the simulated world.
    pub fn shape(&self) -> WorldShape {
        self.shape
    }

    /// Virtual clock shared with the server.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// The server driver.
    pub fn server(&self) -> &ServerDriver<SimEnv> {
        self.server.driver()
    }

    /// Machine at `index`.
    pub fn machine(&self, index: usize) -> Option<&Machine> {
        self.machines.get(index)
    }

    /// Every machine, in participant order.
    pub fn machines(&self) -> &[Machine] {
        &self.machines
    }

    /// The simulated network.
    pub fn network(&self) -> &SimNetwork {
        &self.network
    }

    /// Mutable network, for faults and partitions.
    pub fn network_mut(&mut self) -> &mut SimNetwork {
        &mut self.network
    }

    /// Every handle action the server produced, in order.
    pub fn handle_log(&self) -> &[ServerAction] {
        &self.handle_log
    }

    /// Errors the server returned while processing deliveries.
    pub fn server_errors(&self) -> &[ServerError] {
        &self.server_errors
    }

    /// Errors machines returned while processing broadcasts.
    pub fn client_errors(&self) -> &[(ParticipantId, ControllerError)] {
        &self.client_errors
    }

    /// Equip `item` on device `device` of the participant at `index`.
    pub fn equip(
        &mut self,
        index: usize,
        device: usize,
        item: ItemRef,
        replace_if_occupied: bool,
    ) -> Result<(), ControllerError> {
        let device = WorldShape::device_id(index, device);
        self.act(index, |controller, id| controller.equip(id, device, item, replace_if_occupied))
    }

    /// Equip `item` on the main device of the participant at `index`.
    pub fn equip_main(
        &mut self,
        index: usize,
        item: ItemRef,
        replace_if_occupied: bool,
    ) -> Result<(), ControllerError> {
        self.act(index, |controller, id| controller.equip_main(id, item, replace_if_occupied))
    }

    /// Unequip `item` for the participant at `index`.
    pub fn unequip(&mut self, index: usize, item: ItemRef) -> Result<(), ControllerError> {
        self.act(index, |controller, id| controller.unequip(id, item))
    }

    /// Unequip everything the participant at `index` has bound.
    pub fn unequip_all(&mut self, index: usize) -> Result<Vec<ItemRef>, ControllerError> {
        self.act(index, SimController::unequip_all)
    }

    /// Unequip whatever device `device` of the participant at `index` holds.
    pub fn unequip_from(
        &mut self,
        index: usize,
        device: usize,
    ) -> Result<Option<ItemRef>, ControllerError> {
        let device = WorldShape::device_id(index, device);
        self.act(index, |controller, id| controller.unequip_from(id, device))
    }

    /// Set a lock flag of the participant at `index`.
    pub fn set_lock(&mut self, index: usize, lock: Lock, locked: bool) -> Result<(), ControllerError> {
        self.act(index, |controller, id| controller.set_lock(id, lock, locked))
    }

    /// Ask the server for a snapshot on behalf of the machine at `index`.
    pub fn request_resync(&mut self, index: usize) -> Result<(), ControllerError> {
        self.act(index, |controller, _| controller.request_resync())
    }

    /// Ask for a snapshot from every connected machine.
    pub fn resync_all(&mut self) -> Result<(), ControllerError> {
        for index in 0..self.machines.len() {
            if !self.machines[index].departed {
                self.request_resync(index)?;
            }
        }
        Ok(())
    }

    /// Unequip everything on the way out; the machine stays connected until
    /// [`Cluster::disconnect`].
    pub fn leave(&mut self, index: usize) -> Result<Vec<ItemRef>, ControllerError> {
        self.act(index, SimController::leave)
    }

    /// Tell the server the participant at `index` is gone and cut its machine
    /// off the network.
    pub fn disconnect(&mut self, index: usize) -> Result<(), ServerError> {
        let participant = WorldShape::participant_id(index);
        if let Some(machine) = self.machines.get_mut(index) {
            machine.departed = true;
        }
        self.network.detach(participant);

        let actions = self.server.process(ServerEvent::ParticipantLeft { participant })?;
        self.handle_log.extend(actions);
        self.flush_server();
        Ok(())
    }

    /// Make `item` unresolvable on the machine at `index`.
    pub fn hide_item(&mut self, index: usize, item: ItemRef) {
        if let Some(machine) = self.machines.get_mut(index) {
            machine.items.hide(item);
        }
    }

    /// Make `item` resolvable again on the machine at `index`.
    pub fn reveal_item(&mut self, index: usize, item: ItemRef) {
        if let Some(machine) = self.machines.get_mut(index) {
            machine.items.reveal(item);
        }
    }

    /// Cut the machine at `index` off the network.
    pub fn partition(&mut self, index: usize) {
        self.network.partition(WorldShape::participant_id(index));
    }

    /// Reconnect every machine and stop injecting faults.
    pub fn restore_network(&mut self) {
        self.network.heal_all();
        self.network.set_faults(FaultConfig::none());
    }

    /// Move the virtual clock and let the server expire reclaims.
    pub fn advance_time(&mut self, by: Duration) -> Vec<ServerAction> {
        self.env.advance(by);

        match self.server.process(ServerEvent::Tick) {
            Ok(actions) => {
                self.handle_log.extend(actions.iter().cloned());
                self.flush_server();
                actions
            },
            Err(e) => {
                tracing::warn!(error = %e, "tick failed");
                self.server_errors.push(e);
                Vec::new()
            },
        }
    }

    /// Deliver one frame. Returns `false` if nothing was in flight.
    pub fn step(&mut self) -> bool {
        let Some(envelope) = self.network.next() else {
            return false;
        };

        let frame = match Frame::decode(&envelope.bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(route = ?envelope.route, error = %e, "undecodable frame on the wire");
                return true;
            },
        };

        match envelope.route {
            Route::ToServer(from) => self.deliver_to_server(from, frame),
            Route::ToMachine(to) => self.deliver_to_machine(to, &frame),
        }
        true
    }

    /// Deliver until nothing is in flight. Returns the number of deliveries.
    pub fn run_until_quiescent(&mut self) -> usize {
        let mut steps = 0;
        while steps < MAX_STEPS && self.step() {
            steps += 1;
        }
        if steps == MAX_STEPS {
            tracing::warn!(steps, in_flight = self.network.in_flight(), "step limit reached");
        }
        steps
    }

    /// Apply a model operation to the real system.
    ///
    /// Only the local outcome is returned; traffic is left in flight.
    pub fn apply(&mut self, op: &Operation) -> OperationResult {
        let shape = self.shape;
        match *op {
            Operation::Equip { participant, device, item, replace } => self
                .equip(
                    shape.participant_index(participant),
                    shape.device_index(device),
                    shape.item(item),
                    replace,
                )
                .into(),
            Operation::EquipMain { participant, item, replace } => {
                self.equip_main(shape.participant_index(participant), shape.item(item), replace).into()
            },
            Operation::Unequip { participant, item } => {
                self.unequip(shape.participant_index(participant), shape.item(item)).into()
            },
            Operation::UnequipAll { participant } => {
                self.unequip_all(shape.participant_index(participant)).into()
            },
            Operation::UnequipFrom { participant, device } => self
                .unequip_from(shape.participant_index(participant), shape.device_index(device))
                .into(),
            Operation::SetLock { participant, locked } => {
                self.set_lock(shape.participant_index(participant), Lock::EquipChange, locked).into()
            },
        }
    }

    /// Extract state comparable with [`crate::ModelWorld::observable_state`].
    pub fn observable_state(&self) -> ObservableState {
        let slots = self
            .machines
            .iter()
            .map(|machine| {
                machine
                    .local()
                    .map(|local| local.slots().iter().map(|slot| slot.item()).collect())
                    .unwrap_or_default()
            })
            .collect();

        let ledger = self.server.driver().ledger();
        let holders = self.shape.all_items().map(|item| (item, ledger.holder(item))).collect();

        ObservableState { slots, holders }
    }

    /// Observable state for invariant checks.
    pub fn snapshot(&self) -> SystemSnapshot {
        SystemSnapshot {
            quiescent: self.network.is_idle(),
            ledger: self.server.driver().ledger().iter().collect(),
            machines: self
                .machines
                .iter()
                .filter(|machine| !machine.departed)
                .filter_map(Machine::snapshot)
                .collect(),
        }
    }

    fn act<T>(
        &mut self,
        index: usize,
        op: impl FnOnce(&mut SimController, ParticipantId) -> Result<T, ControllerError>,
    ) -> Result<T, ControllerError> {
        let machine = self
            .machines
            .get_mut(index)
            .filter(|machine| !machine.departed)
            .ok_or(ControllerError::UnknownParticipant(WorldShape::participant_id(index)))?;

        let result = op(&mut machine.controller, machine.participant);
        self.flush_machine(index);
        result
    }

    fn deliver_to_server(&mut self, from: ParticipantId, frame: Frame) {
        match self.server.process(ServerEvent::FrameReceived { from, frame }) {
            Ok(actions) => self.handle_log.extend(actions),
            Err(e) => {
                tracing::debug!(participant = %from, error = %e, "server refused frame");
                self.server_errors.push(e);
            },
        }
        self.flush_server();
    }

    fn deliver_to_machine(&mut self, to: ParticipantId, frame: &Frame) {
        let Some(index) = self.machines.iter().position(|m| m.participant == to && !m.departed)
        else {
            return;
        };

        let Machine { controller, items, .. } = &mut self.machines[index];
        if let Err(e) = controller.handle_frame(frame, items) {
            tracing::debug!(participant = %to, error = %e, "machine refused frame");
            self.client_errors.push((to, e));
        }
        self.flush_machine(index);
    }

    fn flush_machine(&mut self, index: usize) {
        let Some(machine) = self.machines.get_mut(index) else {
            return;
        };

        let participant = machine.participant;
        for frame in machine.controller.link_mut().drain() {
            if let Err(e) = self.network.send_to_server(participant, &frame) {
                tracing::error!(participant = %participant, error = %e, "cannot encode request");
            }
        }
    }

    fn flush_server(&mut self) {
        for frame in self.server.link_mut().drain() {
            if let Err(e) = self.network.broadcast(&frame) {
                tracing::error!(error = %e, "cannot encode broadcast");
            }
        }
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("shape", &self.shape)
            .field("now", &self.env.now())
            .field("machines", &self.machines.len())
            .field("in_flight", &self.network.in_flight())
            .finish_non_exhaustive()
    }
}
