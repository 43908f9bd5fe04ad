//! Engine services for batchsweep.
//!
//! Everything here is independent of the presentation layer: progress leaves
//! through a [`ProgressReporter`] and control comes in through a
//! [`CancellationToken`].

pub mod cancel;
pub mod classifier;
pub mod dispatch;
pub mod events;
pub mod filter;
pub mod orchestrator;
pub mod planner;
pub mod recovery;

pub use cancel::CancellationToken;
pub use classifier::{classify, ErrorKind};
pub use dispatch::{Dispatcher, PassOutcome, ProgressBase, MISSING_FROM_RESPONSE};
pub use events::{ChannelReporter, EngineEvent, NoopReporter, ProgressReporter};
pub use filter::{normalize_name, ExclusionFilter, Filtered};
pub use orchestrator::{EngineError, GroupOrchestrator, Preview};
pub use planner::partition;
pub use recovery::SessionRecovery;
