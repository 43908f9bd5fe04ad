//! Command-line interface for batchsweep.

mod commands;
pub mod helpers;
pub mod progress;

pub use commands::{is_verbose, run};
