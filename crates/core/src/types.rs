use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Prefix reserved for locally generated (optimistic) capture ids.
///
/// The server never issues ids starting with this prefix.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Identifier of a screenshot or collection.
///
/// Server ids are opaque strings; the API sends some of them as JSON
/// numbers, which deserialize to their decimal form. Optimistic items carry a
/// `temp-N` id until the server confirms them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CaptureId(String);

impl<'de> Deserialize<'de> for CaptureId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Number(i64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(s) => Self(s),
            RawId::Number(n) => Self(n.to_string()),
        })
    }
}

impl CaptureId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build the `n`-th temporary id (`temp-n`).
    pub fn temporary(n: u64) -> Self {
        Self(format!("{TEMP_ID_PREFIX}{n}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id was generated locally for an optimistic insert.
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }
}

impl fmt::Display for CaptureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CaptureId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CaptureId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Project identifier as used in REST paths and socket subscriptions.
pub type ProjectId = String;
