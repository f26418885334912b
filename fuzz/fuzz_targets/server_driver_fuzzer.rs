//! Fuzz target for the server driver state machine
//!
//! Drives a `ServerDriver` with arbitrary joins, departures, clock ticks and
//! frames, both well-formed requests and raw bytes under any opcode.
//!
//! # Invariants
//!
//! - `process_event` never panics; bad input is an error
//! - Ledger revisions never decrease
//! - Every broadcast frame is sent by the server and decodes
//! - A handle is only assigned to a participant still in the session

#![no_main]

use std::{collections::BTreeMap, time::Duration};

use arbitrary::Arbitrary;
use handoff_harness::SimEnv;
use handoff_proto::{
    Frame, FrameHeader, ItemRef, Opcode, ParticipantId, Payload,
    payloads::{
        authority::{ConfirmRelease, RequestEquip, RequestUnequip},
        sync::RequestResync,
    },
};
use handoff_server::{ConflictPolicy, ServerAction, ServerConfig, ServerDriver, ServerEvent};
use libfuzzer_sys::fuzz_target;

const ITEMS: u64 = 4;

#[derive(Debug, Arbitrary)]
struct Input {
    first_come_first_served: bool,
    events: Vec<FuzzEvent>,
}

#[derive(Debug, Arbitrary)]
enum FuzzEvent {
    Join(u8),
    Leave(u8),
    Tick(u16),
    Equip { from: u8, item: u8, request_id: u8 },
    Unequip { from: u8, item: u8, request_id: u8 },
    Confirm { from: u8, item: u8, revision: u8 },
    Resync { from: u8, request_id: u8 },
    Raw { from: u8, claimed: u8, opcode: u8, payload: Vec<u8> },
}

fn participant(raw: u8) -> ParticipantId {
    ParticipantId(u64::from(raw % 5) + 1)
}

fn item(raw: u8) -> ItemRef {
    ItemRef(u64::from(raw) % (ITEMS + 1))
}

fn request(from: u8, payload: Payload) -> Option<ServerEvent> {
    let from = participant(from);
    let frame = payload.into_frame(from).ok()?;
    Some(ServerEvent::FrameReceived { from, frame })
}

fn to_event(event: FuzzEvent, env: &SimEnv) -> Option<ServerEvent> {
    match event {
        FuzzEvent::Join(p) => Some(ServerEvent::ParticipantJoined { participant: participant(p) }),
        FuzzEvent::Leave(p) => Some(ServerEvent::ParticipantLeft { participant: participant(p) }),
        FuzzEvent::Tick(ms) => {
            env.advance(Duration::from_millis(u64::from(ms)));
            Some(ServerEvent::Tick)
        },
        FuzzEvent::Equip { from, item: i, request_id } => request(
            from,
            Payload::RequestEquip(RequestEquip { item: item(i), request_id: u64::from(request_id) }),
        ),
        FuzzEvent::Unequip { from, item: i, request_id } => request(
            from,
            Payload::RequestUnequip(RequestUnequip {
                item: item(i),
                request_id: u64::from(request_id),
            }),
        ),
        FuzzEvent::Confirm { from, item: i, revision } => request(
            from,
            Payload::ConfirmRelease(ConfirmRelease { item: item(i), revision: u64::from(revision) }),
        ),
        FuzzEvent::Resync { from, request_id } => request(
            from,
            Payload::RequestResync(RequestResync { request_id: u64::from(request_id) }),
        ),
        FuzzEvent::Raw { from, claimed, opcode, payload } => {
            let opcode = Opcode::from_u8(opcode)?;
            let claimed = ParticipantId(u64::from(claimed % 6));
            let frame = Frame::new(FrameHeader::new(opcode, claimed), payload);
            Some(ServerEvent::FrameReceived { from: participant(from), frame })
        },
    }
}

fuzz_target!(|input: Input| {
    let env = SimEnv::new();
    let policy = if input.first_come_first_served {
        ConflictPolicy::FirstComeFirstServed
    } else {
        ConflictPolicy::LastWriteWins
    };
    let config = ServerConfig {
        conflict_policy: policy,
        release_timeout: Duration::from_millis(500),
        max_participants: 4,
    };

    let mut driver = ServerDriver::new(env.clone(), config);
    for raw in 1..=ITEMS {
        driver.register_item(ItemRef(raw));
    }

    let mut revisions: BTreeMap<ItemRef, u64> = BTreeMap::new();

    for event in input.events {
        let Some(event) = to_event(event, &env) else {
            continue;
        };

        let Ok(actions) = driver.process_event(event) else {
            continue;
        };

        for action in actions {
            match action {
                ServerAction::Broadcast(frame) => {
                    assert!(frame.header.sender().is_server());
                    assert!(Payload::from_frame(&frame).is_ok());
                },
                ServerAction::AssignAuthority { participant, .. } => {
                    assert!(driver.registry().contains(participant));
                },
                ServerAction::ReclaimAuthority { .. } => {},
            }
        }

        for (item, entry) in driver.ledger().iter() {
            let previous = revisions.insert(item, entry.revision).unwrap_or_default();
            assert!(entry.revision >= previous, "{item} went back from {previous} to {}", entry.revision);
        }
    }
});
