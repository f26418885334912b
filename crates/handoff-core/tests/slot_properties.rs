//! Property-based tests for SlotRegistry and AuthorityLedger
//!
//! These tests drive random operation sequences and check the structural
//! invariants after every step.

use std::collections::HashSet;

use handoff_core::{AuthorityLedger, AuthorityState, DeviceId, SlotRegistry};
use handoff_proto::{ItemRef, ParticipantId};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum SlotOp {
    Add(u32),
    Bind(u32, u64),
    Unbind(u64),
}

fn slot_op() -> impl Strategy<Value = SlotOp> {
    prop_oneof![
        (0u32..4).prop_map(SlotOp::Add),
        (0u32..4, 0u64..6).prop_map(|(d, i)| SlotOp::Bind(d, i)),
        (0u64..6).prop_map(SlotOp::Unbind),
    ]
}

fn assert_slot_invariants(slots: &SlotRegistry) -> Result<(), TestCaseError> {
    let mut devices = HashSet::new();
    let mut items = HashSet::new();

    for slot in slots.iter() {
        prop_assert!(devices.insert(slot.device()), "device {} in two slots", slot.device());
        if let Some(item) = slot.item() {
            prop_assert!(items.insert(item), "{} bound in two slots", item);
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: no sequence of operations binds a device or item twice
    #[test]
    fn prop_slot_invariants_hold(ops in prop::collection::vec(slot_op(), 0..40)) {
        let mut slots = SlotRegistry::new();

        for op in ops {
            match op {
                SlotOp::Add(d) => {
                    let _ = slots.add_slot(DeviceId(d));
                },
                SlotOp::Bind(d, i) => {
                    let _ = slots.bind(DeviceId(d), ItemRef(i));
                },
                SlotOp::Unbind(i) => {
                    slots.unbind(ItemRef(i));
                },
            }
            assert_slot_invariants(&slots)?;
        }
    }

    /// Property: a failed bind leaves the registry untouched
    #[test]
    fn prop_failed_bind_is_noop(
        devices in prop::collection::hash_set(0u32..4, 1..4),
        first in 0u32..4,
        second in 0u32..4,
        item in 0u64..6,
    ) {
        let mut slots = SlotRegistry::new();
        for d in &devices {
            slots.add_slot(DeviceId(*d))?;
        }

        let _ = slots.bind(DeviceId(first), ItemRef(item));
        let before = slots.clone();

        if slots.bind(DeviceId(second), ItemRef(item)).is_err() {
            prop_assert_eq!(before, slots);
        }
    }

    /// Property: mirror converges to the newest revision regardless of order
    #[test]
    fn prop_mirror_keeps_newest(
        holders in prop::collection::vec(prop::option::of(1u64..4), 1..10),
        order in any::<u64>(),
    ) {
        let item = ItemRef(1);
        let mut server = AuthorityLedger::new();
        let mut announcements: Vec<_> = holders
            .iter()
            .map(|h| {
                let state = AuthorityState::from_holder(h.map(ParticipantId));
                (state, server.set(item, state).revision)
            })
            .collect();

        // Deterministic shuffle
        let len = announcements.len();
        for i in 0..len {
            let j = (order.rotate_left(i as u32) as usize).wrapping_add(i) % len;
            announcements.swap(i, j);
        }

        let mut mirror = AuthorityLedger::new();
        for (state, revision) in announcements {
            mirror.apply(item, state, revision);
        }

        prop_assert_eq!(mirror.entry(item), server.entry(item));
    }
}
