//! Standard invariant checks.
//!
//! Only [`DeviceUniqueness`] holds at every instant. The others describe the
//! converged system and pass trivially while frames are still in flight.

use std::collections::{BTreeMap, BTreeSet};

use handoff_proto::ItemRef;

use super::{Invariant, InvariantResult, SystemSnapshot, Violation};

/// A device appears in one slot, and an item in at most one slot, of each
/// participant.
pub struct DeviceUniqueness;

impl Invariant for DeviceUniqueness {
    fn name(&self) -> &'static str {
        "device_uniqueness"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for machine in &state.machines {
            let mut devices = BTreeSet::new();
            let mut items = BTreeSet::new();

            for (device, item) in &machine.slots {
                if !devices.insert(*device) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!("{}: device {} has two slots", machine.participant, device),
                    });
                }
                if let Some(item) = item
                    && !items.insert(*item)
                {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!("{}: {} bound in two slots", machine.participant, item),
                    });
                }
            }
        }
        Ok(())
    }
}

/// After convergence an item is bound in at most one slot across all
/// participants.
pub struct PostConvergenceExclusivity;

impl Invariant for PostConvergenceExclusivity {
    fn name(&self) -> &'static str {
        "post_convergence_exclusivity"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        if !state.quiescent {
            return Ok(());
        }

        let mut binders: BTreeMap<ItemRef, _> = BTreeMap::new();
        for machine in &state.machines {
            for item in machine.bound() {
                if let Some(other) = binders.insert(item, machine.participant) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "{} bound by both {} and {}",
                            item, other, machine.participant
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// After convergence every mirror equals the server ledger.
///
/// Items a machine could not resolve are skipped; their mirror entries are
/// stale until a resync succeeds.
pub struct MirrorConvergence;

impl Invariant for MirrorConvergence {
    fn name(&self) -> &'static str {
        "mirror_convergence"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        if !state.quiescent {
            return Ok(());
        }

        for machine in &state.machines {
            for (item, entry) in &state.ledger {
                if machine.unresolved.contains(item) {
                    continue;
                }
                let mirrored = machine.mirror_entry(*item);
                if mirrored != *entry {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "{} mirrors {} as {:?}@{}, server has {:?}@{}",
                            machine.participant,
                            item,
                            mirrored.state,
                            mirrored.revision,
                            entry.state,
                            entry.revision
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// After convergence a participant binds exactly the items it holds.
///
/// Machines with unanswered requests are skipped.
pub struct BindingMatchesLedger;

impl Invariant for BindingMatchesLedger {
    fn name(&self) -> &'static str {
        "binding_matches_ledger"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        if !state.quiescent {
            return Ok(());
        }

        for machine in state.machines.iter().filter(|m| m.pending == 0) {
            let held: BTreeSet<_> = state
                .held_by(machine.participant)
                .difference(&machine.unresolved)
                .copied()
                .collect();
            let bound: BTreeSet<_> =
                machine.bound().difference(&machine.unresolved).copied().collect();

            if held != bound {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "{} binds {:?} but holds {:?}",
                        machine.participant, bound, held
                    ),
                });
            }
        }
        Ok(())
    }
}

/// After convergence the finalizer controls exactly the held and bound items,
/// and the items themselves agree.
pub struct FinalizerControl;

impl Invariant for FinalizerControl {
    fn name(&self) -> &'static str {
        "finalizer_control"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        if !state.quiescent {
            return Ok(());
        }

        for machine in state.machines.iter().filter(|m| m.pending == 0) {
            let expected: BTreeSet<_> = state
                .held_by(machine.participant)
                .intersection(&machine.bound())
                .copied()
                .collect();

            if machine.controlled != expected {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "{} controls {:?}, expected {:?}",
                        machine.participant, machine.controlled, expected
                    ),
                });
            }
            if machine.driven != machine.controlled {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "{}: items driven {:?} but finalizer controls {:?}",
                        machine.participant, machine.driven, machine.controlled
                    ),
                });
            }
        }
        Ok(())
    }
}
