//! One-shot stop signal for a room session.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Tells a room session to stop and clean up.
///
/// Cloning shares the signal. `trigger` is idempotent and never blocks, so
/// the broadcaster, the session's own reader and server shutdown can all fire
/// it without coordinating.
#[derive(Clone, Debug, Default)]
pub struct CancelSignal {
    token: Arc<CancellationToken>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// A signal that also fires when `parent` is cancelled.
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self {
            token: Arc::new(parent.child_token()),
        }
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether `other` is a clone of this signal rather than a separate one.
    pub fn same_as(&self, other: &CancelSignal) -> bool {
        Arc::ptr_eq(&self.token, &other.token)
    }

    /// Resolve once the signal has been triggered.
    pub async fn wait(&self) {
        self.token.cancelled().await;
    }
}
