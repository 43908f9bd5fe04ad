//! Items, batches and per-item outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque backend identifier of a single item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        ItemId(s.to_string())
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        ItemId(s)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One unit of remote work, e.g. a single marketplace listing.
///
/// Items are immutable once fetched; the engine only ever moves them between
/// the remaining and completed sides of a group's run state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    /// Display name, used by the exclusion filter.
    #[serde(default)]
    pub name: String,
    /// Operation-specific data carried through untouched.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Item {
    pub fn new(id: impl Into<ItemId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// A bounded group of items submitted together as one remote call.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// 1-based position of this batch within its pass.
    pub seq: usize,
    pub items: Vec<Item>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ItemId> {
        self.items.iter().map(|i| &i.id)
    }
}

/// Final result recorded for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub item_id: ItemId,
    pub success: bool,
    pub status: String,
}

impl ItemOutcome {
    pub fn succeeded(item_id: ItemId, status: impl Into<String>) -> Self {
        Self {
            item_id,
            success: true,
            status: status.into(),
        }
    }

    pub fn failed(item_id: ItemId, status: impl Into<String>) -> Self {
        Self {
            item_id,
            success: false,
            status: status.into(),
        }
    }
}

/// Per-item entry of a backend batch response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemResult {
    pub id: ItemId,
    pub success: bool,
    pub status: String,
}

/// What the backend reported for a batch that went through at the transport level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub per_item: Vec<ItemResult>,
}

impl BatchResult {
    /// A result marking every item of `batch` successful with the given status.
    pub fn all_succeeded(batch: &Batch, status: &str) -> Self {
        Self {
            per_item: batch
                .items
                .iter()
                .map(|i| ItemResult {
                    id: i.id.clone(),
                    success: true,
                    status: status.to_string(),
                })
                .collect(),
        }
    }
}
