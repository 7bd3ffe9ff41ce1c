//! Property-test strategies and deterministic data generators.

use auditlog_core::{Action, Record};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Strategy over all action kinds.
pub fn arb_action() -> impl Strategy<Value = Action> {
    prop_oneof![
        Just(Action::Create),
        Just(Action::Read),
        Just(Action::Update),
        Just(Action::Delete),
    ]
}

/// Strategy over arbitrary records, including empty fields, non-ASCII
/// strings, extreme timestamps, and optional destinations.
pub fn arb_record() -> impl Strategy<Value = Record> {
    (
        arb_action(),
        ".{0,64}",
        ".{0,32}",
        ".{0,32}",
        any::<i64>(),
        proptest::option::of("[a-z]{1,16}(/[a-z]{1,16}){0,2}"),
    )
        .prop_map(
            |(action, data_location, actor_id, subject_id, timestamp_ms, destination)| Record {
                action,
                data_location,
                actor_id,
                subject_id,
                timestamp_ms,
                destination,
            },
        )
}

/// Strategy over byte blobs up to `max` bytes.
pub fn arb_bytes(max: usize) -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 0..=max)
}

/// Generates `count` records with payload sizes drawn from a seeded RNG.
/// The same seed always yields the same records (up to timestamps).
#[must_use]
pub fn seeded_records(count: usize, seed: u64) -> Vec<Record> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let location_len = rng.gen_range(8..256);
            let location: String = (0..location_len)
                .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
                .collect();
            Record::new(
                match rng.gen_range(0..4) {
                    0 => Action::Create,
                    1 => Action::Read,
                    2 => Action::Update,
                    _ => Action::Delete,
                },
                format!("/{location}"),
                format!("actor-{}", rng.gen_range(0..16)),
                format!("{i:06}"),
            )
        })
        .collect()
}
