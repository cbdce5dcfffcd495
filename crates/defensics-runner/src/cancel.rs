//! Bridge from a host interrupt to a remote run cancel

use defensics_api::{ErasedDefensicsApi, RunId};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Upper bound on the best-effort cancel request
pub const DEFAULT_CANCEL_DEADLINE: Duration = Duration::from_secs(10);

/// Turns a host interrupt into at most one remote cancel request.
///
/// Clones share the interrupt flag and the sent-once guard.
#[derive(Debug, Clone)]
pub struct CancellationBridge {
    token: CancellationToken,
    remote_cancel_sent: Arc<AtomicBool>,
    deadline: Duration,
}

impl CancellationBridge {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            remote_cancel_sent: Arc::new(AtomicBool::new(false)),
            deadline: DEFAULT_CANCEL_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Mark the build as interrupted. Repeated calls are no-ops.
    pub fn interrupt(&self) {
        self.token.cancel();
    }

    pub fn is_interrupted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Ask the server to cancel `run_id`.
    ///
    /// Only the first call sends a request; later calls return `false`
    /// immediately. Failures and timeouts are logged, never returned, so the
    /// build still ends ABORTED. Returns whether the server acknowledged.
    pub async fn abort_remote(&self, api: &dyn ErasedDefensicsApi, run_id: &RunId) -> bool {
        if self.remote_cancel_sent.swap(true, Ordering::SeqCst) {
            return false;
        }
        info!(%run_id, server = api.server_name(), "Cancelling remote run");

        match tokio::time::timeout(self.deadline, api.cancel_run(run_id)).await {
            Ok(Ok(())) => {
                info!(%run_id, "Remote run cancelled");
                true
            }
            Ok(Err(e)) => {
                warn!(%run_id, "Failed to cancel remote run: {e}");
                false
            }
            Err(_) => {
                warn!(
                    %run_id,
                    "Cancel request did not complete within {:?}", self.deadline
                );
                false
            }
        }
    }
}
