//! Cooperative cancellation shared between the engine and its controller.

use std::time::Duration;

/// Cancellation flag polled by the engine between units of work.
///
/// Clones share the same flag. Setting it never interrupts a batch that is
/// already executing.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: tokio_util::sync::CancellationToken,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    pub fn set_cancelled(&self) {
        self.inner.cancel();
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns false when the sleep was cut short.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.is_cancelled();
        }
        tokio::select! {
            _ = self.inner.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
