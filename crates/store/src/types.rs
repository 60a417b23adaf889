use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The full key/value state, ordered by key.
pub type Entries = BTreeMap<String, Value>;

/// A single key/value pair as returned by mutating operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,
    pub value: Value,
}

impl Entry {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self { key: key.into(), value }
    }
}

/// Per-key result of a batch delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

impl DeleteOutcome {
    pub fn is_deleted(self) -> bool {
        matches!(self, Self::Deleted)
    }
}

impl Serialize for DeleteOutcome {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let body = match self {
            Self::Deleted => serde_json::json!({ "deleted": true }),
            Self::NotFound => serde_json::json!({ "error": "key not found" }),
        };
        body.serialize(serializer)
    }
}
