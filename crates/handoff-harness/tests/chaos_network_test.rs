//! Convergence under a lossy, duplicating, partitioned network.
//!
//! Random operations run while frames are dropped, duplicated and reordered
//! across senders. Slot uniqueness must hold at every delivery. Once the
//! network is restored and every machine has resynchronised, the full
//! invariant registry must pass.

use std::time::Duration;

use handoff_harness::{Cluster, ClusterConfig, FaultConfig, InvariantRegistry, Operation, WorldShape};
use handoff_server::{ConflictPolicy, ServerConfig};
use proptest::prelude::*;

const RELEASE_TIMEOUT: Duration = Duration::from_millis(500);

/// One scheduling decision between operations.
#[derive(Debug, Clone, Copy)]
enum Disruption {
    None,
    Partition(u8),
    Heal,
    Tick,
}

fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        4 => (any::<u8>(), any::<u8>(), any::<u8>(), any::<bool>())
            .prop_map(|(participant, device, item, replace)| Operation::Equip { participant, device, item, replace }),
        2 => (any::<u8>(), any::<u8>(), any::<bool>())
            .prop_map(|(participant, item, replace)| Operation::EquipMain { participant, item, replace }),
        3 => (any::<u8>(), any::<u8>())
            .prop_map(|(participant, item)| Operation::Unequip { participant, item }),
        1 => any::<u8>().prop_map(|participant| Operation::UnequipAll { participant }),
        1 => (any::<u8>(), any::<u8>())
            .prop_map(|(participant, device)| Operation::UnequipFrom { participant, device }),
        1 => (any::<u8>(), prop::bool::weighted(0.3))
            .prop_map(|(participant, locked)| Operation::SetLock { participant, locked }),
    ]
}

fn disruption_strategy() -> impl Strategy<Value = Disruption> {
    prop_oneof![
        8 => Just(Disruption::None),
        1 => any::<u8>().prop_map(Disruption::Partition),
        1 => Just(Disruption::Heal),
        2 => Just(Disruption::Tick),
    ]
}

fn policy_strategy() -> impl Strategy<Value = ConflictPolicy> {
    prop_oneof![Just(ConflictPolicy::LastWriteWins), Just(ConflictPolicy::FirstComeFirstServed)]
}

fn chaos_cluster(seed: u64, faults: FaultConfig, policy: ConflictPolicy) -> Cluster {
    Cluster::new(ClusterConfig {
        shape: WorldShape { participants: 3, devices: 2, items: 3 },
        seed,
        faults,
        server: ServerConfig {
            conflict_policy: policy,
            release_timeout: RELEASE_TIMEOUT,
            ..Default::default()
        },
        ..Default::default()
    })
    .expect("cluster")
}

/// Heal the network, resynchronise everyone and let pending reclaims expire.
fn recover(cluster: &mut Cluster) {
    cluster.restore_network();
    cluster.run_until_quiescent();
    cluster.resync_all().expect("resync");
    cluster.run_until_quiescent();
    cluster.advance_time(RELEASE_TIMEOUT);
    cluster.run_until_quiescent();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_converges_after_faults(
        seed in any::<u64>(),
        drop_rate in 0.0..0.3f64,
        duplicate_rate in 0.0..0.3f64,
        policy in policy_strategy(),
        schedule in prop::collection::vec(
            (operation_strategy(), 0..6usize, disruption_strategy()),
            1..60,
        ),
    ) {
        let mut cluster = chaos_cluster(seed, FaultConfig { drop_rate, duplicate_rate }, policy);
        let registry = InvariantRegistry::standard();
        let participants = cluster.shape().participants;

        for (i, (op, deliveries, disruption)) in schedule.iter().enumerate() {
            let _ = cluster.apply(op);

            for _ in 0..*deliveries {
                cluster.step();
                let result = registry.check_all(&cluster.snapshot());
                prop_assert!(result.is_ok(), "step after op {} {:?}: {:?}", i, op, result);
            }

            match *disruption {
                Disruption::None => {},
                Disruption::Partition(raw) => cluster.partition(usize::from(raw) % participants),
                Disruption::Heal => cluster.network_mut().heal_all(),
                Disruption::Tick => {
                    cluster.advance_time(RELEASE_TIMEOUT / 2);
                },
            }
        }

        recover(&mut cluster);

        prop_assert!(cluster.network().is_idle());
        let result = registry.check_all(&cluster.snapshot());
        prop_assert!(result.is_ok(), "after recovery: {:?}", result);
    }

    #[test]
    fn prop_same_seed_same_outcome(
        seed in any::<u64>(),
        ops in prop::collection::vec(operation_strategy(), 1..40),
    ) {
        let faults = FaultConfig { drop_rate: 0.1, duplicate_rate: 0.1 };
        let run = |ops: &[Operation]| {
            let mut cluster = chaos_cluster(seed, faults, ConflictPolicy::LastWriteWins);
            for op in ops {
                let _ = cluster.apply(op);
                cluster.step();
            }
            cluster.run_until_quiescent();
            (cluster.observable_state(), cluster.network().stats(), cluster.handle_log().to_vec())
        };

        prop_assert_eq!(run(&ops), run(&ops));
    }
}

#[test]
fn heavy_loss_still_converges() {
    let faults = FaultConfig { drop_rate: 0.5, duplicate_rate: 0.2 };
    let mut cluster = chaos_cluster(0xC0FFEE, faults, ConflictPolicy::LastWriteWins);

    for round in 0..30u8 {
        let _ = cluster.apply(&Operation::Equip {
            participant: round,
            device: round / 3,
            item: round / 2,
            replace: true,
        });
        cluster.step();
    }

    recover(&mut cluster);

    assert!(cluster.network().stats().dropped > 0);
    InvariantRegistry::standard().assert_all(&cluster.snapshot(), "after heavy loss");
}

#[test]
fn partitioned_holder_rejoins_consistent() {
    let mut cluster = chaos_cluster(3, FaultConfig::none(), ConflictPolicy::LastWriteWins);
    let sword = WorldShape::item_at(0);

    cluster.equip_main(0, sword, false).unwrap();
    cluster.run_until_quiescent();

    cluster.partition(0);
    cluster.equip_main(1, sword, false).unwrap();
    cluster.equip_main(2, sword, false).unwrap();
    cluster.run_until_quiescent();

    // Partitioned intents are lost without a trace on the server.
    cluster.unequip(0, sword).unwrap();
    cluster.run_until_quiescent();

    recover(&mut cluster);

    assert_eq!(cluster.server().ledger().holder(sword), Some(WorldShape::participant_id(2)));
    let local = cluster.machine(0).unwrap().local().unwrap();
    assert_eq!(local.pending_count(), 0);
    assert!(!local.slots().is_item_bound(sword));
    InvariantRegistry::standard().assert_all(&cluster.snapshot(), "after partition");
}
