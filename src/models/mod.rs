//! Data models for batchsweep.

mod group;
mod item;
mod report;

pub use group::{FetchParams, GroupDirectory, GroupSelection, GroupTask};
pub use item::{Batch, BatchResult, Item, ItemId, ItemOutcome, ItemResult};
pub use report::{GroupStatus, GroupSummary, RunReport, RunState};
