//! Splits a working set into fixed-size batches.

use crate::models::{Batch, Item};

/// Partition `items` into batches of at most `batch_size`, preserving order.
///
/// Sequence numbers start at 1. The last batch may be short. A zero
/// `batch_size` is rejected by configuration validation and is treated as 1
/// here so the function stays total.
pub fn partition(items: &[Item], batch_size: usize) -> Vec<Batch> {
    items
        .chunks(batch_size.max(1))
        .enumerate()
        .map(|(i, chunk)| Batch {
            seq: i + 1,
            items: chunk.to_vec(),
        })
        .collect()
}
