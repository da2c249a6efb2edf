//! Retry dispatcher
//!
//! Replays a request after its refresh wave succeeded. The replay goes through
//! the same transport as the original, so it picks up the refreshed bearer
//! token, and its outcome (success or failure) is returned to the caller as-is.

use std::sync::Arc;

use tracing::{debug, warn};
use transport::{ApiResponse, RequestDescriptor, Transport};

use crate::error::{ClientError, Result};
use crate::metrics;

pub struct RetryDispatcher {
    transport: Arc<dyn Transport>,
}

impl RetryDispatcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Replay `request` once.
    ///
    /// The descriptor must already be marked retried, which is what keeps a
    /// second 401 from starting another refresh.
    pub async fn retry(&self, request: &RequestDescriptor) -> Result<ApiResponse> {
        if !request.is_retried() {
            return Err(ClientError::NotMarkedRetried(request.id().to_string()));
        }

        debug!(request_id = %request.id(), path = %request.path(), "replaying request");
        match self.transport.send(request).await {
            Ok(response) => {
                metrics::record_retry(true);
                Ok(response)
            }
            Err(e) => {
                warn!(request_id = %request.id(), error = %e, "replayed request failed");
                metrics::record_retry(false);
                Err(e.into())
            }
        }
    }
}
