//! Document identity and version markers.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

/// Longest accepted document id, in bytes.
const MAX_DOC_ID_LEN: usize = 200;

/// Source-assigned version marker, in milliseconds since the Unix epoch.
///
/// This is the only freshness signal the engine knows about. Stored entries
/// carry it as their file modification time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// The timestamp one millisecond earlier.
    pub const fn pred(self) -> Self {
        Self(self.0.saturating_sub(1))
    }

    /// Filesystem representation. Negative values clamp to the epoch.
    pub fn to_system_time(self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.0.max(0) as u64)
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(elapsed) => Self(i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)),
            Err(_) => Self::ZERO,
        }
    }

    pub fn to_datetime(self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.0).unwrap_or(DateTime::UNIX_EPOCH)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Timestamp {
    fn from(millis: i64) -> Self {
        Self(millis)
    }
}

/// Validated document id.
///
/// Ids become file names and their first four characters select the shard
/// directories, so only `[A-Za-z0-9._-]` is accepted, at least four
/// characters long and never starting with a dot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    pub fn new(id: impl Into<String>) -> Result<Self, Error> {
        let id = id.into();
        if id.len() < 4 {
            return Err(Error::InvalidDocId(format!("'{id}' is shorter than 4 characters")));
        }
        if id.len() > MAX_DOC_ID_LEN {
            return Err(Error::InvalidDocId(format!("id exceeds {MAX_DOC_ID_LEN} bytes")));
        }
        if id.starts_with('.') {
            return Err(Error::InvalidDocId(format!("'{id}' starts with a dot")));
        }
        if let Some(bad) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(Error::InvalidDocId(format!("'{id}' contains {bad:?}")));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First- and second-level shard directory names.
    pub fn shard(&self) -> (&str, &str) {
        (&self.0[0..2], &self.0[2..4])
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DocId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for DocId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DocId::new(raw).map_err(serde::de::Error::custom)
    }
}

/// One entry of a remote "changed since" listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedDocument {
    pub doc_id: DocId,
    pub timestamp: Timestamp,
}

impl ChangedDocument {
    pub fn new(doc_id: DocId, timestamp: Timestamp) -> Self {
        Self { doc_id, timestamp }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_id_shard() {
        let id = DocId::new("F7A2C91B").unwrap();
        assert_eq!(id.shard(), ("F7", "A2"));
    }

    #[test]
    fn test_doc_id_rejects_short() {
        assert!(matches!(DocId::new("abc"), Err(Error::InvalidDocId(_))));
    }

    #[test]
    fn test_doc_id_rejects_path_tricks() {
        assert!(DocId::new("../etc/passwd").is_err());
        assert!(DocId::new("ab/cd").is_err());
        assert!(DocId::new(".hidden").is_err());
        assert!(DocId::new("abcd\0").is_err());
    }

    #[test]
    fn test_doc_id_deserialize_validates() {
        let ok: DocId = serde_json::from_str("\"docA-1\"").unwrap();
        assert_eq!(ok.as_str(), "docA-1");
        assert!(serde_json::from_str::<DocId>("\"a/b\"").is_err());
    }

    #[test]
    fn test_timestamp_system_time_roundtrip() {
        let ts = Timestamp::from_millis(1_700_000_000_123);
        assert_eq!(Timestamp::from_system_time(ts.to_system_time()), ts);
    }

    #[test]
    fn test_timestamp_negative_clamps() {
        assert_eq!(Timestamp::from_millis(-5).to_system_time(), UNIX_EPOCH);
        assert_eq!(Timestamp::from_millis(105).pred(), Timestamp::from_millis(104));
    }
}
