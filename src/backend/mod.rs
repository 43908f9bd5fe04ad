//! Contracts for the remote backend the engine drives.
//!
//! The engine never talks HTTP itself. It pulls items through an
//! [`ItemSource`], pushes batches through an [`OperationClient`] and recovers a
//! broken transport through a [`Session`]. [`HttpBackend`] implements all three
//! over a JSON API; [`ScriptedBackend`] is a programmable stand-in for tests.

mod http_client;
mod scripted;

pub use http_client::{BackendSettings, HttpBackend};
pub use scripted::{ScriptedBackend, ScriptedCall};

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Batch, BatchResult, GroupTask, Item};

/// Failure to pull a group's items.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Item fetch failed for group '{group}': {message}")]
    Backend { group: String, message: String },

    #[error("Malformed item page for group '{group}': {message}")]
    Decode { group: String, message: String },
}

/// Failure of a whole batch call. Only the message text is used to decide
/// whether the failure is worth retrying.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct OperationError {
    pub message: String,
}

impl OperationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure while tearing down and recreating the transport.
#[derive(Debug, Error)]
#[error("Session reset failed: {0}")]
pub struct SessionError(pub String);

/// One page of a group's items.
///
/// `raw_len` counts every entry the backend returned, including ones dropped
/// while decoding, and decides whether another page follows.
#[derive(Debug, Clone, Default)]
pub struct ItemPage {
    pub items: Vec<Item>,
    pub raw_len: usize,
}

impl ItemPage {
    pub fn new(items: Vec<Item>, raw_len: usize) -> Self {
        Self { items, raw_len }
    }
}

impl From<Vec<Item>> for ItemPage {
    fn from(items: Vec<Item>) -> Self {
        let raw_len = items.len();
        Self { items, raw_len }
    }
}

/// Paginated access to a group's items.
#[async_trait]
pub trait ItemSource: Send + Sync {
    /// Fixed number of items requested per page.
    fn page_size(&self) -> usize;

    /// Fetch one page starting at `offset`.
    async fn fetch_page(
        &self,
        group: &GroupTask,
        offset: usize,
        limit: usize,
    ) -> Result<ItemPage, FetchError>;

    /// Fetch every item of `group`.
    ///
    /// Stops after a short page, or before requesting the next page once
    /// `stop_check` returns true. An empty group yields an empty vector.
    async fn fetch_all(
        &self,
        group: &GroupTask,
        stop_check: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<Vec<Item>, FetchError> {
        let page_size = self.page_size().max(1);
        let mut items = Vec::new();
        let mut offset = 0;

        loop {
            if stop_check() {
                tracing::debug!(group = %group.group_name, fetched = items.len(), "Item fetch stopped");
                return Ok(items);
            }

            tracing::debug!(
                "  fetching {} items {}~{}",
                group.group_name,
                offset,
                offset + page_size
            );
            let page = self.fetch_page(group, offset, page_size).await?;
            items.extend(page.items);

            if page.raw_len < page_size {
                break;
            }
            offset += page_size;
        }

        Ok(items)
    }
}

/// Executes one batch against the backend.
#[async_trait]
pub trait OperationClient: Send + Sync {
    async fn execute(&self, batch: &Batch) -> Result<BatchResult, OperationError>;
}

/// The authenticated transport shared by all in-flight requests of a pass.
#[async_trait]
pub trait Session: Send + Sync {
    /// Drop and recreate the transport. Only called between passes.
    async fn reset(&self) -> Result<(), SessionError>;
}
