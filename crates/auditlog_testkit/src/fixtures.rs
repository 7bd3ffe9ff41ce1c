//! Engine fixtures for tests.

use auditlog_codec::{EncryptionKey, KEY_SIZE};
use auditlog_core::{Action, Engine, EngineConfig, Record};
use std::collections::HashMap;
use tempfile::TempDir;

/// Creates an engine over a fresh temporary directory.
///
/// The configuration's `base_path` is replaced with the tempdir; keep the
/// returned [`TempDir`] alive for the duration of the test.
///
/// # Panics
///
/// Panics if the tempdir or engine cannot be created.
#[must_use]
pub fn temp_engine(mut config: EngineConfig) -> (Engine, TempDir) {
    let dir = tempfile::tempdir().expect("create temp dir");
    config.base_path = dir.path().to_path_buf();
    let engine = Engine::new(config).expect("create engine");
    (engine, dir)
}

/// A fixed test key.
///
/// # Panics
///
/// Never; the key size is correct by construction.
#[must_use]
pub fn test_key() -> EncryptionKey {
    EncryptionKey::from_bytes(&[0x42u8; KEY_SIZE]).expect("test key")
}

/// Builds a record with derived, recognizable field values.
#[must_use]
pub fn sample_record(action: Action, actor: &str, sequence: usize) -> Record {
    Record::new(
        action,
        format!("/data/{sequence}"),
        actor,
        format!("{sequence:06}"),
    )
}

/// Counts records into a multiset for order-insensitive comparison.
#[must_use]
pub fn multiset(records: &[Record]) -> HashMap<Record, usize> {
    let mut counts = HashMap::new();
    for record in records {
        *counts.entry(record.clone()).or_insert(0) += 1;
    }
    counts
}
