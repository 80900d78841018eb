use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ModelError, Result};

/// Sequential id, unique within its numbering scope.
pub type Id = u32;

/// Random id, unique across the whole model for its entire lifetime.
pub type Uid = u64;

// ---------------------------------------------------------------------------
// IdUid
// ---------------------------------------------------------------------------

/// The `"id:uid"` pair the database engine uses to address a schema element.
///
/// Equality and ordering only look at `id`; `uid` is an identity and
/// collision-check value and never takes part in comparisons.
#[derive(Debug, Clone, Copy)]
pub struct IdUid {
    pub id: Id,
    pub uid: Uid,
}

impl IdUid {
    pub const fn new(id: Id, uid: Uid) -> Self {
        Self { id, uid }
    }

    /// Parse a persisted identifier. Both components must be non-zero.
    pub fn parse(input: &str) -> Result<Self> {
        Self::parse_with(input, false)
    }

    /// Parse an identifier whose id is still waiting for allocation
    /// (`"0:uid"` is accepted, a zero uid is not).
    pub fn parse_pending(input: &str) -> Result<Self> {
        Self::parse_with(input, true)
    }

    pub const fn is_pending(&self) -> bool {
        self.id == 0
    }

    fn parse_with(input: &str, allow_zero_id: bool) -> Result<Self> {
        let mut parts = input.split(':');
        let (id_part, uid_part) = match (parts.next(), parts.next(), parts.next()) {
            (Some(id), Some(uid), None) => (id, uid),
            (_, None, _) => return Err(format_error(input, "missing ':' separator")),
            _ => return Err(format_error(input, "too many ':' separators")),
        };

        let id: Id = parse_component(input, "id", id_part)?;
        let uid: Uid = parse_component(input, "uid", uid_part)?;

        if id == 0 && !allow_zero_id {
            return Err(format_error(input, "id is zero"));
        }
        if uid == 0 {
            return Err(format_error(input, "uid is zero"));
        }

        Ok(Self { id, uid })
    }
}

fn parse_component<T>(input: &str, name: &str, part: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    if part.is_empty() {
        return Err(format_error(input, &format!("{name} is empty")));
    }
    if !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format_error(
            input,
            &format!("{name} '{part}' is not an unsigned number"),
        ));
    }
    // Leading zeros would not survive a save, so they are rejected up front.
    if part.len() > 1 && part.starts_with('0') {
        return Err(format_error(
            input,
            &format!("{name} '{part}' has leading zeros"),
        ));
    }
    part.parse::<T>()
        .map_err(|e| format_error(input, &format!("can't parse {name} '{part}': {e}")))
}

fn format_error(input: &str, reason: &str) -> ModelError {
    ModelError::Format {
        input: input.to_string(),
        reason: reason.to_string(),
    }
}

impl fmt::Display for IdUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.uid)
    }
}

impl FromStr for IdUid {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl PartialEq for IdUid {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for IdUid {}

impl PartialOrd for IdUid {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IdUid {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Serialize for IdUid {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IdUid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for counters that may not have been assigned yet.
/// An unassigned counter is persisted as the empty string.
pub mod optional {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::IdUid;

    pub fn serialize<S: Serializer>(
        value: &Option<IdUid>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(iduid) => serializer.collect_str(iduid),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<IdUid>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.is_empty() {
            return Ok(None);
        }
        IdUid::parse(&raw).map(Some).map_err(serde::de::Error::custom)
    }
}
