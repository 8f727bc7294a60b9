//! Stopping the listener and every room session.
//!
//! Order on shutdown:
//! 1. Cancel the shared token (the listener stops accepting, and every
//!    subscription signal derived from it fires)
//! 2. Trigger whatever subscriptions were not derived from the token
//! 3. Wait for sessions to unregister, then for the serve tasks, within one deadline

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::websocket::SubscriberRegistry;

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// What a graceful shutdown managed to wind down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Subscriptions live when shutdown began.
    pub sessions_signalled: usize,
    /// Subscriptions still registered when the deadline passed.
    pub sessions_remaining: usize,
    /// Whether every task handle finished in time.
    pub tasks_finished: bool,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.sessions_remaining == 0 && self.tasks_finished
    }
}

/// Owns the token the listener and every room session hang off.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel the token without waiting for anything.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stop everything and wait, up to `timeout`, for the registry to drain
    /// and `handles` to finish.
    pub async fn graceful_shutdown(
        &self,
        registry: &SubscriberRegistry,
        handles: Vec<JoinHandle<()>>,
        timeout: Option<Duration>,
    ) -> ShutdownReport {
        let deadline = Instant::now() + timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        let sessions_signalled = registry.cancel_all();
        info!(
            sessions = sessions_signalled,
            tasks = handles.len(),
            "draining room sessions"
        );

        if tokio::time::timeout_at(deadline, registry.wait_drained())
            .await
            .is_err()
        {
            warn!(
                remaining = registry.total_subscribers(),
                "room sessions still registered at shutdown deadline"
            );
        }

        let tasks_finished = tokio::time::timeout_at(deadline, futures::future::join_all(handles))
            .await
            .is_ok();
        if !tasks_finished {
            warn!("shutdown deadline passed with tasks still running");
        }

        ShutdownReport {
            sessions_signalled,
            sessions_remaining: registry.total_subscribers(),
            tasks_finished,
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
