//! Audit records and their framed binary serialization.

use crate::error::{CoreError, CoreResult};
use std::time::SystemTime;

/// The kind of operation performed on regulated data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Data was created.
    Create,
    /// Data was read.
    Read,
    /// Data was updated.
    Update,
    /// Data was deleted.
    Delete,
}

impl Action {
    /// Returns the 1-byte wire tag.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Create => 0,
            Self::Read => 1,
            Self::Update => 2,
            Self::Delete => 3,
        }
    }

    /// Decodes a wire tag.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Create),
            1 => Some(Self::Read),
            2 => Some(Self::Update),
            3 => Some(Self::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Create => "CREATE",
            Self::Read => "READ",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// A single audit event.
///
/// Timestamps are wall-clock milliseconds since the Unix epoch: readers
/// correlate records to external events, so a monotonic clock would be wrong
/// here. Clock regressions are accepted; records are not globally ordered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record {
    /// The operation performed.
    pub action: Action,
    /// Location of the data operated on.
    pub data_location: String,
    /// Identity of the actor performing the operation.
    pub actor_id: String,
    /// Identity of the data subject.
    pub subject_id: String,
    /// Wall-clock milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Optional filename stem routing this record to a segment family.
    pub destination: Option<String>,
}

impl Record {
    /// Creates a record stamped with the current wall clock.
    pub fn new(
        action: Action,
        data_location: impl Into<String>,
        actor_id: impl Into<String>,
        subject_id: impl Into<String>,
    ) -> Self {
        Self {
            action,
            data_location: data_location.into(),
            actor_id: actor_id.into(),
            subject_id: subject_id.into(),
            timestamp_ms: current_timestamp_ms(),
            destination: None,
        }
    }

    /// Sets the destination stem, consuming and returning the record.
    #[must_use]
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Serializes the record to its framed binary form.
    ///
    /// Layout: `action (1) || location (u32 LE + bytes) || actor (u32 LE +
    /// bytes) || subject (u32 LE + bytes) || timestamp (i64 LE) || dest flag
    /// (1) || [dest (u32 LE + bytes)]`. Deterministic: equal records produce
    /// byte-equal output.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_size());
        out.push(self.action.as_byte());
        put_string(&mut out, &self.data_location);
        put_string(&mut out, &self.actor_id);
        put_string(&mut out, &self.subject_id);
        out.extend_from_slice(&self.timestamp_ms.to_le_bytes());
        match &self.destination {
            Some(dest) => {
                out.push(1);
                put_string(&mut out, dest);
            }
            None => out.push(0),
        }
        out
    }

    /// Decodes a record from the output of [`serialize`](Self::serialize).
    ///
    /// # Errors
    ///
    /// Returns a malformed-record error on truncation, an unknown action tag,
    /// invalid UTF-8, or trailing bytes.
    pub fn deserialize(data: &[u8]) -> CoreResult<Self> {
        let mut cursor = Cursor { data, offset: 0 };

        let action_byte = cursor.take_byte()?;
        let action = Action::from_byte(action_byte)
            .ok_or_else(|| CoreError::malformed_record(format!("unknown action tag {action_byte}")))?;

        let data_location = cursor.take_string()?;
        let actor_id = cursor.take_string()?;
        let subject_id = cursor.take_string()?;
        let timestamp_ms = i64::from_le_bytes(
            cursor
                .take(8)?
                .try_into()
                .map_err(|_| CoreError::malformed_record("short timestamp"))?,
        );

        let destination = match cursor.take_byte()? {
            0 => None,
            1 => Some(cursor.take_string()?),
            flag => {
                return Err(CoreError::malformed_record(format!(
                    "invalid destination flag {flag}"
                )))
            }
        };

        if cursor.offset != data.len() {
            return Err(CoreError::malformed_record("trailing bytes"));
        }

        Ok(Self {
            action,
            data_location,
            actor_id,
            subject_id,
            timestamp_ms,
            destination,
        })
    }

    /// Returns the serialized size in bytes.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        1 + 4
            + self.data_location.len()
            + 4
            + self.actor_id.len()
            + 4
            + self.subject_id.len()
            + 8
            + 1
            + self
                .destination
                .as_ref()
                .map_or(0, |dest| 4 + dest.len())
    }
}

fn current_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as i64)
}

fn put_string(out: &mut Vec<u8>, value: &str) {
    out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    out.extend_from_slice(value.as_bytes());
}

struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| CoreError::malformed_record("truncated record"))?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn take_byte(&mut self) -> CoreResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn take_string(&mut self) -> CoreResult<String> {
        let len_bytes = self.take(4)?;
        let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]);
        let bytes = self.take(len as usize)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CoreError::malformed_record("string field is not UTF-8"))
    }
}
