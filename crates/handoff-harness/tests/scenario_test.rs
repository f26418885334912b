//! End-to-end handoff scenarios on a simulated cluster.
//!
//! Each scenario drives real controllers and a real server driver over the
//! simulated network, then checks the ledger, every machine's mirror and the
//! callbacks the items received.

use std::time::Duration;

use handoff_client::{ControllerError, Lock};
use handoff_core::AuthorityState;
use handoff_harness::{
    Cluster, ClusterConfig, FaultConfig, HookEvent, InvariantRegistry, ItemCall, Route, WorldShape,
};
use handoff_proto::{ItemRef, ParticipantId};
use handoff_server::{ConflictPolicy, ReclaimReason, ServerAction, ServerConfig};

const A: usize = 0;
const B: usize = 1;
const SWORD: ItemRef = ItemRef(1);
const SHIELD: ItemRef = ItemRef(2);

fn id(index: usize) -> ParticipantId {
    WorldShape::participant_id(index)
}

fn config() -> ClusterConfig {
    ClusterConfig {
        shape: WorldShape { participants: 2, devices: 2, items: 3 },
        ..Default::default()
    }
}

fn cluster() -> Cluster {
    Cluster::new(config()).expect("cluster")
}

fn item_calls(cluster: &Cluster, machine: usize, item: ItemRef) -> Vec<ItemCall> {
    cluster.machine(machine).unwrap().items().get(item).unwrap().calls().to_vec()
}

fn bound_device(cluster: &Cluster, machine: usize, item: ItemRef) -> Option<usize> {
    let local = cluster.machine(machine).unwrap().local().unwrap();
    local.slots().iter().position(|slot| slot.item() == Some(item))
}

fn assert_converged(cluster: &Cluster, context: &str) {
    InvariantRegistry::standard().assert_all(&cluster.snapshot(), context);
}

fn assign(item: ItemRef, index: usize) -> ServerAction {
    ServerAction::AssignAuthority { item, participant: id(index) }
}

fn reclaim(item: ItemRef, index: usize, reason: ReclaimReason) -> ServerAction {
    ServerAction::ReclaimAuthority { item, participant: id(index), reason }
}

#[test]
fn equip_binds_optimistically_then_takes_control() {
    let mut cluster = cluster();
    let main = WorldShape::device_id(A, 0);

    cluster.equip_main(A, SWORD, false).unwrap();

    // Bound before the server has answered, but not yet driven.
    assert_eq!(bound_device(&cluster, A, SWORD), Some(0));
    assert!(item_calls(&cluster, A, SWORD).is_empty());
    assert_eq!(cluster.machine(A).unwrap().controller().mirror().holder(SWORD), None);

    cluster.run_until_quiescent();

    let ledger = cluster.server().ledger();
    assert_eq!(ledger.state(SWORD), AuthorityState::Owned(id(A)));
    assert_eq!(ledger.revision(SWORD), 1);

    for machine in cluster.machines() {
        assert_eq!(machine.controller().mirror().state(SWORD), AuthorityState::Owned(id(A)));
    }

    assert_eq!(item_calls(&cluster, A, SWORD), vec![
        ItemCall::Equip { holder: id(A), device: main },
        ItemCall::TakeControl,
    ]);
    assert!(item_calls(&cluster, B, SWORD).is_empty());

    let holder_hooks = cluster.machine(A).unwrap().local().unwrap().hooks().events().to_vec();
    assert_eq!(holder_hooks, vec![HookEvent::Equipped { device: Some(main), item: SWORD }]);

    let remote_hooks =
        cluster.machine(B).unwrap().replica(id(A)).unwrap().hooks().events().to_vec();
    assert_eq!(remote_hooks, vec![HookEvent::Equipped { device: None, item: SWORD }]);

    assert_eq!(cluster.handle_log(), [assign(SWORD, A)]);
    assert_converged(&cluster, "after equip");
}

#[test]
fn takeover_revokes_previous_holder() {
    let mut cluster = cluster();
    let registry = InvariantRegistry::standard();

    cluster.equip(A, 0, SWORD, false).unwrap();
    cluster.run_until_quiescent();

    cluster.equip(B, 1, SWORD, true).unwrap();
    while cluster.step() {
        registry.assert_all(&cluster.snapshot(), "during takeover");
    }

    let ledger = cluster.server().ledger();
    assert_eq!(ledger.holder(SWORD), Some(id(B)));
    assert_eq!(ledger.revision(SWORD), 3);

    assert_eq!(bound_device(&cluster, A, SWORD), None);
    assert_eq!(bound_device(&cluster, B, SWORD), Some(1));
    assert_eq!(item_calls(&cluster, A, SWORD), vec![
        ItemCall::Equip { holder: id(A), device: WorldShape::device_id(A, 0) },
        ItemCall::TakeControl,
        ItemCall::Unequip,
        ItemCall::Release,
    ]);
    assert_eq!(item_calls(&cluster, B, SWORD), vec![
        ItemCall::Equip { holder: id(B), device: WorldShape::device_id(B, 1) },
        ItemCall::TakeControl,
    ]);

    // The new holder's handle waited for the old holder's confirmation.
    assert_eq!(cluster.handle_log(), [
        assign(SWORD, A),
        reclaim(SWORD, A, ReclaimReason::Confirmed),
        assign(SWORD, B),
    ]);
    assert!(cluster.advance_time(Duration::from_secs(10)).is_empty());
    assert_converged(&cluster, "after takeover");
}

#[test]
fn unequip_of_unbound_item_makes_no_call() {
    let mut cluster = cluster();

    let err = cluster.unequip(A, SWORD).unwrap_err();

    assert!(matches!(err, ControllerError::NotEquipped(item) if item == SWORD));
    assert_eq!(cluster.network().stats().sent, 0);
    assert!(cluster.network().is_idle());
}

#[test]
fn equip_unequip_equip_in_separate_rounds() {
    let mut cluster = cluster();

    cluster.equip_main(A, SWORD, false).unwrap();
    cluster.run_until_quiescent();
    cluster.unequip(A, SWORD).unwrap();
    cluster.run_until_quiescent();

    assert_eq!(cluster.server().ledger().holder(SWORD), None);
    assert_eq!(bound_device(&cluster, A, SWORD), None);
    assert_converged(&cluster, "after unequip");

    cluster.equip_main(A, SWORD, false).unwrap();
    cluster.run_until_quiescent();

    assert_eq!(cluster.server().ledger().holder(SWORD), Some(id(A)));
    assert_eq!(cluster.server().ledger().revision(SWORD), 3);
    assert_eq!(item_calls(&cluster, A, SWORD), vec![
        ItemCall::Equip { holder: id(A), device: WorldShape::device_id(A, 0) },
        ItemCall::TakeControl,
        ItemCall::Unequip,
        ItemCall::Release,
        ItemCall::Equip { holder: id(A), device: WorldShape::device_id(A, 0) },
        ItemCall::TakeControl,
    ]);
    assert_eq!(cluster.handle_log(), [
        assign(SWORD, A),
        reclaim(SWORD, A, ReclaimReason::Confirmed),
        assign(SWORD, A),
    ]);
    assert_converged(&cluster, "after re-equip");
}

#[test]
fn rapid_equip_unequip_equip_converges_on_last_intent() {
    let mut cluster = cluster();

    cluster.equip_main(A, SWORD, false).unwrap();
    cluster.unequip(A, SWORD).unwrap();
    cluster.equip_main(A, SWORD, false).unwrap();
    cluster.run_until_quiescent();

    assert_eq!(cluster.server().ledger().holder(SWORD), Some(id(A)));
    assert_eq!(bound_device(&cluster, A, SWORD), Some(0));
    assert!(cluster.machine(A).unwrap().items().get(SWORD).unwrap().is_driven());
    assert_eq!(cluster.machine(A).unwrap().local().unwrap().pending_count(), 0);
    assert_converged(&cluster, "after rapid rounds");
}

#[test]
fn unequip_all_runs_one_round_per_item() {
    let mut cluster = cluster();

    cluster.equip(A, 0, SWORD, false).unwrap();
    cluster.equip(A, 1, SHIELD, false).unwrap();
    cluster.run_until_quiescent();

    let released = cluster.unequip_all(A).unwrap();
    assert_eq!(released, vec![SWORD, SHIELD]);
    assert_eq!(cluster.network().in_flight(), 2);

    cluster.run_until_quiescent();

    let ledger = cluster.server().ledger();
    for item in [SWORD, SHIELD] {
        assert_eq!(ledger.holder(item), None);
        assert_eq!(ledger.revision(item), 2);
    }
    assert!(cluster.machine(A).unwrap().items().driven().is_empty());
    assert_converged(&cluster, "after unequip all");
}

#[test]
fn lost_unequip_round_does_not_block_the_other() {
    let mut cluster = cluster();

    cluster.equip(A, 0, SWORD, false).unwrap();
    cluster.equip(A, 1, SHIELD, false).unwrap();
    cluster.run_until_quiescent();

    assert_eq!(cluster.unequip_all(A).unwrap(), vec![SWORD, SHIELD]);
    assert!(cluster.network_mut().drop_queued(Route::ToServer(id(A)), 1));
    cluster.run_until_quiescent();

    let ledger = cluster.server().ledger();
    assert_eq!(ledger.state(SWORD), AuthorityState::Unowned);
    assert_eq!(ledger.state(SHIELD), AuthorityState::Owned(id(A)));
    for machine in [A, B] {
        let mirror = cluster.machine(machine).unwrap().controller().mirror();
        assert_eq!(mirror.state(SWORD), AuthorityState::Unowned);
        assert_eq!(mirror.state(SHIELD), AuthorityState::Owned(id(A)));
    }

    // A's resync carries a watermark past the lost request, so the grant
    // it still holds is handed back.
    cluster.resync_all().unwrap();
    cluster.run_until_quiescent();

    assert_eq!(cluster.server().ledger().state(SHIELD), AuthorityState::Unowned);
    assert_eq!(cluster.machine(A).unwrap().local().unwrap().pending_count(), 0);
    assert!(cluster.server_errors().is_empty());
    assert_converged(&cluster, "after lost unequip");
}

#[test]
fn unequip_from_empty_slot_is_a_no_op() {
    let mut cluster = cluster();

    assert_eq!(cluster.unequip_from(A, 1).unwrap(), None);
    assert!(cluster.network().is_idle());

    cluster.equip(A, 1, SHIELD, false).unwrap();
    cluster.run_until_quiescent();
    assert_eq!(cluster.unequip_from(A, 1).unwrap(), Some(SHIELD));
    cluster.run_until_quiescent();

    assert_eq!(cluster.server().ledger().holder(SHIELD), None);
    assert_converged(&cluster, "after unequip from");
}

#[test]
fn replace_if_occupied_swaps_items() {
    let mut cluster = cluster();

    cluster.equip(A, 0, SWORD, false).unwrap();
    cluster.run_until_quiescent();

    let err = cluster.equip(A, 0, SHIELD, false).unwrap_err();
    assert!(matches!(err, ControllerError::SlotOccupied { current, .. } if current == SWORD));
    assert!(cluster.network().is_idle());

    cluster.equip(A, 0, SHIELD, true).unwrap();
    cluster.run_until_quiescent();

    let ledger = cluster.server().ledger();
    assert_eq!(ledger.holder(SWORD), None);
    assert_eq!(ledger.holder(SHIELD), Some(id(A)));
    assert_eq!(bound_device(&cluster, A, SHIELD), Some(0));
    assert_converged(&cluster, "after swap");
}

#[test]
fn locked_participant_cannot_change_equipment() {
    let mut cluster = cluster();

    cluster.equip_main(A, SWORD, false).unwrap();
    cluster.run_until_quiescent();
    cluster.set_lock(A, Lock::EquipChange, true).unwrap();

    assert!(matches!(cluster.equip(A, 1, SHIELD, false), Err(ControllerError::Locked(_))));
    assert!(matches!(cluster.unequip(A, SWORD), Err(ControllerError::Locked(_))));
    assert!(matches!(cluster.unequip_all(A), Err(ControllerError::Locked(_))));
    assert!(cluster.network().is_idle());

    // The lock gates local intents only; the server can still take the item.
    cluster.equip_main(B, SWORD, false).unwrap();
    cluster.run_until_quiescent();

    assert_eq!(cluster.server().ledger().holder(SWORD), Some(id(B)));
    assert_eq!(bound_device(&cluster, A, SWORD), None);
    assert_converged(&cluster, "after takeover of locked holder");

    cluster.set_lock(A, Lock::EquipChange, false).unwrap();
    cluster.equip(A, 1, SHIELD, false).unwrap();
    cluster.run_until_quiescent();
    assert_eq!(cluster.server().ledger().holder(SHIELD), Some(id(A)));
}

#[test]
fn first_come_first_served_rolls_back_competitor() {
    let mut config = config();
    config.server =
        ServerConfig { conflict_policy: ConflictPolicy::FirstComeFirstServed, ..Default::default() };
    let mut cluster = Cluster::new(config).unwrap();

    cluster.equip_main(A, SWORD, false).unwrap();
    cluster.run_until_quiescent();

    cluster.equip_main(B, SWORD, false).unwrap();
    assert_eq!(bound_device(&cluster, B, SWORD), Some(0));
    cluster.run_until_quiescent();

    assert_eq!(cluster.server().ledger().holder(SWORD), Some(id(A)));
    assert_eq!(cluster.server().ledger().revision(SWORD), 1);
    assert_eq!(bound_device(&cluster, B, SWORD), None);
    assert!(item_calls(&cluster, B, SWORD).is_empty());
    assert!(cluster.client_errors().is_empty());
    assert_converged(&cluster, "after rejection");
}

#[test]
fn missing_item_requests_resync_and_recovers() {
    let mut cluster = cluster();
    cluster.hide_item(B, SWORD);

    cluster.equip_main(A, SWORD, false).unwrap();
    cluster.run_until_quiescent();

    let machine = cluster.machine(B).unwrap();
    assert_eq!(machine.controller().mirror().revision(SWORD), 0);
    assert_eq!(machine.controller().unresolved().collect::<Vec<_>>(), vec![SWORD]);
    assert!(
        cluster
            .client_errors()
            .iter()
            .any(|(p, e)| *p == id(B) && matches!(e, ControllerError::MissingItem(item) if *item == SWORD))
    );
    // Unresolved items are excluded until a resync succeeds.
    assert_converged(&cluster, "while item is missing");

    cluster.reveal_item(B, SWORD);
    cluster.request_resync(B).unwrap();
    cluster.run_until_quiescent();

    let machine = cluster.machine(B).unwrap();
    assert_eq!(machine.controller().mirror().state(SWORD), AuthorityState::Owned(id(A)));
    assert_eq!(machine.controller().unresolved().count(), 0);
    assert_converged(&cluster, "after resync");
}

#[test]
fn resync_of_large_ledger_recovers_missing_item() {
    let mut cluster = Cluster::new(ClusterConfig {
        shape: WorldShape { participants: 2, devices: 1, items: 4000 },
        ..Default::default()
    })
    .expect("cluster");
    cluster.hide_item(B, SWORD);

    cluster.equip_main(A, SWORD, false).unwrap();
    cluster.run_until_quiescent();
    let unresolved: Vec<ItemRef> = cluster.machine(B).unwrap().controller().unresolved().collect();
    assert_eq!(unresolved, vec![SWORD]);

    cluster.reveal_item(B, SWORD);
    cluster.request_resync(B).unwrap();
    cluster.run_until_quiescent();

    let machine = cluster.machine(B).unwrap();
    assert_eq!(machine.controller().mirror().state(SWORD), AuthorityState::Owned(id(A)));
    assert_eq!(machine.controller().unresolved().count(), 0);
    assert!(cluster.server_errors().is_empty());
    assert_converged(&cluster, "after large resync");
}

#[test]
fn departure_releases_held_items() {
    let mut cluster = cluster();

    cluster.equip_main(A, SWORD, false).unwrap();
    cluster.run_until_quiescent();
    cluster.disconnect(A).unwrap();
    cluster.run_until_quiescent();

    assert_eq!(cluster.server().ledger().holder(SWORD), None);
    assert_eq!(cluster.handle_log().last(), Some(&reclaim(SWORD, A, ReclaimReason::HolderDeparted)));
    assert_eq!(
        cluster.machine(B).unwrap().controller().mirror().state(SWORD),
        AuthorityState::Unowned
    );
    assert!(cluster.equip_main(A, SHIELD, false).is_err());

    // Nothing left to wait for; the handle goes straight to the next holder.
    cluster.equip_main(B, SWORD, false).unwrap();
    cluster.run_until_quiescent();
    assert_eq!(cluster.handle_log().last(), Some(&assign(SWORD, B)));
    assert_converged(&cluster, "after departure");
}

#[test]
fn leave_unequips_before_disconnect() {
    let mut cluster = cluster();

    cluster.equip(A, 0, SWORD, false).unwrap();
    cluster.equip(A, 1, SHIELD, false).unwrap();
    cluster.run_until_quiescent();

    cluster.set_lock(A, Lock::EquipChange, true).unwrap();
    assert_eq!(cluster.leave(A).unwrap(), vec![SWORD, SHIELD]);
    cluster.run_until_quiescent();

    assert_eq!(cluster.server().ledger().items_held_by(id(A)).count(), 0);
    let log_len = cluster.handle_log().len();

    cluster.disconnect(A).unwrap();
    assert_eq!(cluster.handle_log().len(), log_len);
    assert_converged(&cluster, "after leave");
}

#[test]
fn lost_confirmation_reclaims_on_timeout() {
    let mut cluster = cluster();

    cluster.equip_main(A, SWORD, false).unwrap();
    cluster.run_until_quiescent();

    cluster.partition(A);
    cluster.equip_main(B, SWORD, false).unwrap();
    cluster.run_until_quiescent();

    assert_eq!(cluster.server().ledger().holder(SWORD), Some(id(B)));
    assert_eq!(cluster.server().handles().reclaiming(), 1);
    assert!(cluster.advance_time(Duration::from_secs(1)).is_empty());

    let actions = cluster.advance_time(Duration::from_secs(1));
    assert_eq!(actions, vec![reclaim(SWORD, A, ReclaimReason::TimedOut), assign(SWORD, B)]);

    // The partitioned machine still drives the item until it hears otherwise.
    assert!(cluster.machine(A).unwrap().items().get(SWORD).unwrap().is_driven());

    cluster.restore_network();
    cluster.resync_all().unwrap();
    cluster.run_until_quiescent();

    assert!(!cluster.machine(A).unwrap().items().get(SWORD).unwrap().is_driven());
    assert_eq!(bound_device(&cluster, A, SWORD), None);
    assert_eq!(cluster.server().handles().assigned(SWORD), Some(id(B)));
    assert_converged(&cluster, "after partition heals");
}

#[test]
fn duplicated_frames_change_nothing() {
    let mut config = config();
    config.faults = FaultConfig { drop_rate: 0.0, duplicate_rate: 1.0 };
    let mut cluster = Cluster::new(config).unwrap();

    cluster.equip_main(A, SWORD, false).unwrap();
    cluster.run_until_quiescent();
    cluster.equip_main(B, SWORD, false).unwrap();
    cluster.run_until_quiescent();

    assert!(cluster.network().stats().duplicated > 0);
    assert_eq!(cluster.server().ledger().holder(SWORD), Some(id(B)));
    assert_eq!(cluster.server().ledger().revision(SWORD), 3);
    assert_eq!(item_calls(&cluster, A, SWORD).len(), 4);
    assert_eq!(item_calls(&cluster, B, SWORD).len(), 2);
    assert_eq!(cluster.handle_log(), [
        assign(SWORD, A),
        reclaim(SWORD, A, ReclaimReason::Confirmed),
        assign(SWORD, B),
    ]);
    assert_converged(&cluster, "after duplicated delivery");
}
