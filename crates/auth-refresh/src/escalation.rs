//! Failure escalation
//!
//! Runs when a refresh wave fails: the session is over, so its tokens are
//! cleared and the user is sent back to the unauthenticated entry point. The
//! coordinator calls `escalate` exactly once per failed wave, before any
//! waiter is released.

use std::sync::Arc;

use session::{Navigator, TokenStore};
use tracing::{error, warn};

use crate::error::RefreshError;
use crate::metrics;

pub struct FailureEscalation {
    tokens: Arc<dyn TokenStore>,
    navigator: Arc<dyn Navigator>,
}

impl FailureEscalation {
    pub fn new(tokens: Arc<dyn TokenStore>, navigator: Arc<dyn Navigator>) -> Self {
        Self { tokens, navigator }
    }

    /// Clear the session and navigate. A store that fails to clear is logged
    /// and navigation still happens.
    pub async fn escalate(&self, cause: &RefreshError) {
        warn!(error = %cause, "refresh failed, ending session");

        if let Err(e) = self.tokens.clear().await {
            error!(error = %e, "failed to clear session tokens");
        }
        self.navigator.go_to_unauthenticated_entry();
        metrics::record_escalation();
    }
}
