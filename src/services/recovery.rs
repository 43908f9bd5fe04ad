//! Session reset and cooldown between dispatcher passes.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::cancel::CancellationToken;
use crate::backend::Session;

/// Resets the session after a pass that hit a transient failure.
pub struct SessionRecovery {
    session: Arc<dyn Session>,
    cooldown: Duration,
    max_recoveries: Option<u32>,
}

impl SessionRecovery {
    pub fn new(session: Arc<dyn Session>, cooldown: Duration, max_recoveries: Option<u32>) -> Self {
        Self {
            session,
            cooldown,
            max_recoveries,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Whether another recovery is allowed after `performed` in this group.
    pub fn allows(&self, performed: u32) -> bool {
        self.max_recoveries.map_or(true, |max| performed < max)
    }

    /// Reset the session, then wait out the cooldown.
    ///
    /// A failed reset is logged and the cooldown still applies.
    /// Returns false if cancellation cut the cooldown short.
    pub async fn recover(&self, cancel: &CancellationToken) -> bool {
        match self.session.reset().await {
            Ok(()) => info!("Session reset, retrying in {:?}", self.cooldown),
            Err(e) => warn!("{}; retrying in {:?} anyway", e, self.cooldown),
        }
        cancel.sleep(self.cooldown).await
    }
}
