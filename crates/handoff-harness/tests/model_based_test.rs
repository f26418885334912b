//! Model-based property tests.
//!
//! These tests generate random operation sequences and verify that the real
//! controllers and server behave identically to the sequential reference
//! model.
//!
//! # Architecture
//!
//! ```text
//! proptest generates: Vec<Operation>
//!                          │
//!           ┌──────────────┼──────────────┐
//!           ▼              ▼              ▼
//!      ModelWorld       Cluster        Compare
//!      (reference)   (run to quiet)    results + state
//! ```
//!
//! Delivery is reliable and the cluster runs to quiescence after every
//! operation, so each round completes before the next one starts.

use handoff_harness::{
    Cluster, ClusterConfig, InvariantRegistry, ModelWorld, Operation, OperationError,
    OperationResult, WorldShape,
};
use proptest::prelude::*;

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

fn shape_strategy() -> impl Strategy<Value = WorldShape> {
    (2..4usize, 1..3usize, 1..5usize)
        .prop_map(|(participants, devices, items)| WorldShape { participants, devices, items })
}

fn real_world(shape: WorldShape, seed: u64) -> Cluster {
    Cluster::new(ClusterConfig { shape, seed, ..Default::default() }).expect("cluster")
}

proptest! {
    /// Operation results and observable state match the model after every
    /// operation.
    #[test]
    fn prop_model_matches_real(
        seed in any::<u64>(),
        shape in shape_strategy(),
        ops in prop::collection::vec(operation_strategy(), 0..50),
    ) {
        let mut model = ModelWorld::new(shape);
        let mut real = real_world(shape, seed);
        let registry = InvariantRegistry::standard();

        for (i, op) in ops.iter().enumerate() {
            let model_result = model.apply(op);
            let real_result = real.apply(op);
            real.run_until_quiescent();

            prop_assert_eq!(
                &model_result,
                &real_result,
                "Divergence at operation {}: {:?}",
                i, op
            );

            prop_assert_eq!(
                model.observable_state(),
                real.observable_state(),
                "State divergence after operation {}: {:?}",
                i, op
            );

            let invariants = registry.check_all(&real.snapshot());
            prop_assert!(invariants.is_ok(), "after operation {} {:?}: {:?}", i, op, invariants);
        }

        prop_assert!(real.server_errors().is_empty(), "server errors: {:?}", real.server_errors());
        prop_assert!(real.client_errors().is_empty(), "client errors: {:?}", real.client_errors());
    }

    /// The model never binds an item twice or holds an item nobody binds.
    #[test]
    fn prop_model_invariants(
        shape in shape_strategy(),
        ops in prop::collection::vec(operation_strategy(), 0..100),
    ) {
        let mut model = ModelWorld::new(shape);

        for op in &ops {
            let _ = model.apply(op);
        }

        let state = model.observable_state();
        for (item, holder) in &state.holders {
            let binders: Vec<usize> = state
                .slots
                .iter()
                .enumerate()
                .filter(|(_, slots)| slots.contains(&Some(*item)))
                .map(|(index, _)| index)
                .collect();

            match holder {
                Some(holder) => prop_assert_eq!(
                    binders.iter().map(|&index| WorldShape::participant_id(index)).collect::<Vec<_>>(),
                    vec![*holder],
                    "{} held by {} but bound by {:?}", item, holder, binders
                ),
                None => prop_assert!(binders.is_empty(), "{} unheld but bound by {:?}", item, binders),
            }
        }
    }

    /// A locked participant's equipment only changes through other
    /// participants' takeovers.
    #[test]
    fn prop_lock_blocks_local_changes(
        shape in shape_strategy(),
        participant in any::<u8>(),
        ops in prop::collection::vec(operation_strategy(), 0..30),
    ) {
        let mut model = ModelWorld::new(shape);
        let locked = shape.participant_index(participant);
        let _ = model.apply(&Operation::SetLock { participant, locked: true });

        for op in ops.iter().filter(|op| !matches!(op, Operation::SetLock { .. })) {
            let acting = match *op {
                Operation::Equip { participant, .. }
                | Operation::EquipMain { participant, .. }
                | Operation::Unequip { participant, .. }
                | Operation::UnequipAll { participant }
                | Operation::UnequipFrom { participant, .. }
                | Operation::SetLock { participant, .. } => shape.participant_index(participant),
            };

            let result = model.apply(op);
            if acting == locked {
                prop_assert_eq!(result, OperationResult::Error(OperationError::Locked));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> WorldShape {
        WorldShape { participants: 2, devices: 2, items: 2 }
    }

    #[test]
    fn takeover_matches_model() {
        let ops = [
            Operation::Equip { participant: 0, device: 0, item: 0, replace: false },
            Operation::Equip { participant: 1, device: 1, item: 0, replace: false },
            Operation::Equip { participant: 0, device: 0, item: 1, replace: false },
        ];

        let mut model = ModelWorld::new(shape());
        let mut real = real_world(shape(), 1);

        for op in &ops {
            assert_eq!(model.apply(op), real.apply(op));
            real.run_until_quiescent();
            assert_eq!(model.observable_state(), real.observable_state());
        }

        let state = real.observable_state();
        assert_eq!(state.slots[0], vec![Some(WorldShape::item_at(1)), None]);
        assert_eq!(state.slots[1], vec![None, Some(WorldShape::item_at(0))]);
    }

    #[test]
    fn error_results_match_model() {
        let ops = [
            Operation::Unequip { participant: 0, item: 0 },
            Operation::Equip { participant: 0, device: 0, item: 0, replace: false },
            Operation::Equip { participant: 0, device: 0, item: 0, replace: false },
            Operation::Equip { participant: 0, device: 1, item: 0, replace: false },
            Operation::Equip { participant: 0, device: 0, item: 1, replace: false },
            Operation::SetLock { participant: 0, locked: true },
            Operation::UnequipAll { participant: 0 },
        ];
        let expected = [
            OperationResult::Error(OperationError::NotEquipped),
            OperationResult::Ok,
            OperationResult::Error(OperationError::AlreadyEquipped),
            OperationResult::Error(OperationError::ItemAlreadyBound),
            OperationResult::Error(OperationError::SlotOccupied),
            OperationResult::Ok,
            OperationResult::Error(OperationError::Locked),
        ];

        let mut model = ModelWorld::new(shape());
        let mut real = real_world(shape(), 2);

        for (op, expected) in ops.iter().zip(expected) {
            assert_eq!(model.apply(op), expected, "model: {op:?}");
            assert_eq!(real.apply(op), expected, "real: {op:?}");
            real.run_until_quiescent();
        }
    }
}
