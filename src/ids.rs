//! Record identifiers: server-issued keys vs client-synthesized temporaries.
//!
//! Rows created while offline get a `local-` prefixed identifier so they are
//! recognizable anywhere they travel (mirror rows, queue payloads, foreign
//! keys). The synchronizer swaps every occurrence for the server-assigned key
//! exactly once after the corresponding create replays successfully. Making
//! the distinction a sum type means "is this synced yet" is answered by the
//! type, not by a string-prefix check scattered across call sites.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

/// Marker prefix for identifiers synthesized on this device.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// A primary key in the local mirror or on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordId {
    /// Client-synthesized temporary key; the row has not synced yet.
    Local(String),
    /// Server-assigned key.
    Remote(String),
}

impl RecordId {
    /// Synthesize a fresh temporary identifier for a row created offline.
    pub fn fresh_local() -> Self {
        RecordId::Local(Uuid::new_v4().to_string())
    }

    pub fn remote(key: impl Into<String>) -> Self {
        RecordId::Remote(key.into())
    }

    pub fn is_local(&self) -> bool {
        matches!(self, RecordId::Local(_))
    }

    /// Classify a raw key string by the temporary-identifier marker.
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix(LOCAL_ID_PREFIX) {
            Some(token) => RecordId::Local(token.to_string()),
            None => RecordId::Remote(raw.to_string()),
        }
    }
}

/// Wire/storage form: `local-<token>` for temporaries, the bare key otherwise.
impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Local(token) => write!(f, "{LOCAL_ID_PREFIX}{token}"),
            RecordId::Remote(key) => f.write_str(key),
        }
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

struct RecordIdVisitor;

impl Visitor<'_> for RecordIdVisitor {
    type Value = RecordId;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a record identifier string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<RecordId, E> {
        Ok(RecordId::parse(v))
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(RecordIdVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_local_is_local_and_prefixed() {
        let id = RecordId::fresh_local();
        assert!(id.is_local());
        assert!(id.to_string().starts_with(LOCAL_ID_PREFIX));
    }

    #[test]
    fn test_parse_round_trips_both_variants() {
        assert_eq!(
            RecordId::parse("local-abc123"),
            RecordId::Local("abc123".into())
        );
        assert_eq!(RecordId::parse("7f9c0d"), RecordId::Remote("7f9c0d".into()));

        for raw in ["local-abc123", "7f9c0d"] {
            assert_eq!(RecordId::parse(raw).to_string(), raw);
        }
    }

    #[test]
    fn test_serde_uses_prefixed_string_form() {
        let id = RecordId::Local("tok".into());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"local-tok\"");

        let back: RecordId = serde_json::from_str("\"local-tok\"").unwrap();
        assert_eq!(back, id);

        let remote: RecordId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(remote, RecordId::Remote("42".into()));
    }
}
