//! Request and response bodies of the JSON backend contract.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::models::{BatchResult, FetchParams, ItemId, ItemResult};

/// Backends disagree on whether ids are strings or numbers; accept both.
pub(super) fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct GroupEntry {
    pub id: Value,
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct ItemsRequest<'a> {
    pub group_id: &'a str,
    pub group_name: &'a str,
    pub offset: usize,
    pub limit: usize,
    pub filter: &'a FetchParams,
}

#[derive(Debug, Deserialize)]
pub(super) struct ItemsPage {
    #[serde(default)]
    pub items: Vec<ItemEntry>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ItemEntry {
    pub id: Value,
    pub name: Option<String>,
    pub payload: Option<Value>,
}

#[derive(Debug, Serialize)]
pub(super) struct OperationRequest<'a> {
    pub ids: Vec<&'a str>,
    pub params: &'a serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub(super) struct OperationResponse {
    #[serde(default)]
    pub results: Vec<ResultEntry>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ResultEntry {
    pub id: Value,
    pub success: Option<bool>,
    pub code: Option<i64>,
    pub status: Option<Value>,
}

impl ResultEntry {
    fn succeeded(&self) -> bool {
        self.success.unwrap_or(false) || self.code == Some(0)
    }

    fn status_text(&self) -> String {
        match &self.status {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => match self.code {
                Some(code) => format!("code {}", code),
                None if self.succeeded() => "ok".to_string(),
                None => "failed".to_string(),
            },
            Some(other) => other.to_string(),
        }
    }
}

impl OperationResponse {
    pub fn into_batch_result(self) -> BatchResult {
        let per_item = self
            .results
            .into_iter()
            .filter_map(|entry| {
                let Some(id) = id_string(&entry.id) else {
                    warn!("Dropping operation result without usable id");
                    return None;
                };
                Some(ItemResult {
                    id: ItemId(id),
                    success: entry.succeeded(),
                    status: entry.status_text(),
                })
            })
            .collect();
        BatchResult { per_item }
    }
}
