//! Bi-temporal version envelope shared by entity and relation rows
//!
//! Every stored row carries a [`VersionInfo`]: when the row became the
//! current version (`valid_from`), when it stopped being current
//! (`valid_to`, `None` while current), and provenance fields that survive
//! across versions. Mutations never overwrite rows; they close the current
//! row and insert a successor, so point-in-time reads stay answerable.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Milliseconds since the Unix epoch
pub type TimestampMs = i64;

/// Current wall-clock time in epoch milliseconds
pub fn now_ms() -> TimestampMs {
    Utc::now().timestamp_millis()
}

/// Unique identifier for a stored row
///
/// A fresh id is minted for every version, so the id names one row in a
/// version chain rather than the logical entity or relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowId(pub Uuid);

impl RowId {
    /// Create a new random RowId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for RowId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RowId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Bi-temporal metadata carried by every row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Row identifier, unique per version
    pub id: RowId,

    /// Version number, starting at 1 and incremented on every mutation
    pub version: u32,

    /// When the logical record was first created (preserved across versions)
    pub created_at: TimestampMs,

    /// When this version was written
    pub updated_at: TimestampMs,

    /// When this version became current
    pub valid_from: TimestampMs,

    /// When this version stopped being current (None while current)
    ///
    /// Kept in the encoded form even when `None`; rows round-trip through
    /// bincode, which has no field names to resynchronize on.
    pub valid_to: Option<TimestampMs>,

    /// Actor that produced this version
    pub changed_by: Option<String>,
}

impl VersionInfo {
    /// Envelope for the first version of a record
    pub fn initial(now: TimestampMs, changed_by: Option<String>) -> Self {
        Self {
            id: RowId::new(),
            version: 1,
            created_at: now,
            updated_at: now,
            valid_from: now,
            valid_to: None,
            changed_by,
        }
    }

    /// Check whether this row is the current version
    pub fn is_current(&self) -> bool {
        self.valid_to.is_none()
    }

    /// Check whether this row was the current version at a point in time
    ///
    /// A row covers the half-open window `[valid_from, valid_to)`.
    pub fn was_current_at(&self, time: TimestampMs) -> bool {
        let started = self.valid_from <= time;
        let not_ended = match self.valid_to {
            None => true,
            Some(valid_to) => valid_to > time,
        };
        started && not_ended
    }

    /// Close this version's validity window
    pub fn close(&mut self, at: TimestampMs) {
        self.valid_to = Some(at);
    }

    /// Envelope for the next version of the same record
    ///
    /// Mints a fresh row id, bumps the version number, and keeps the
    /// original `created_at`.
    pub fn successor(&self, now: TimestampMs, changed_by: Option<String>) -> Self {
        Self {
            id: RowId::new(),
            version: self.version + 1,
            created_at: self.created_at,
            updated_at: now,
            valid_from: now,
            valid_to: None,
            changed_by,
        }
    }
}
