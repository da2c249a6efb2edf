//! Authenticated API client
//!
//! The pipeline every call site goes through. A successful exchange returns
//! directly. A failure is classified; only an unretried 401 outside the
//! authentication endpoints is intercepted: the descriptor is marked retried,
//! the caller joins the coordinator's refresh wave, and on success the replay
//! is dispatched once. Everything else reaches the caller unchanged.

use std::sync::Arc;

use tracing::{debug, instrument};
use transport::{ApiResponse, RequestDescriptor, Transport};

use crate::classify::{AuthEndpoints, Classification, classify, failure_kind};
use crate::coordinator::RefreshCoordinator;
use crate::dispatch::RetryDispatcher;
use crate::error::Result;
use crate::metrics;

pub struct AuthClient {
    transport: Arc<dyn Transport>,
    coordinator: Arc<RefreshCoordinator>,
    dispatcher: RetryDispatcher,
    endpoints: AuthEndpoints,
}

impl AuthClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        coordinator: Arc<RefreshCoordinator>,
        endpoints: AuthEndpoints,
    ) -> Self {
        Self {
            dispatcher: RetryDispatcher::new(Arc::clone(&transport)),
            transport,
            coordinator,
            endpoints,
        }
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub fn endpoints(&self) -> &AuthEndpoints {
        &self.endpoints
    }

    /// Send `request`, refreshing the session and replaying once on an
    /// eligible 401.
    #[instrument(
        skip_all,
        fields(request_id = %request.id(), method = %request.method(), path = %request.path())
    )]
    pub async fn send(&self, request: RequestDescriptor) -> Result<ApiResponse> {
        let error = match self.transport.send(&request).await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };

        let kind = failure_kind(&request, &error, &self.endpoints);
        metrics::record_failure(kind);

        match classify(&request, error.status(), &self.endpoints) {
            Classification::RefreshEligible => {}
            Classification::AuthEndpointExempt | Classification::PassThrough => {
                debug!(kind = kind.label(), error = %error, "request failed");
                return Err(error.into());
            }
        }

        let replay = request.mark_retried();
        debug!("access token rejected, waiting for refresh");
        self.coordinator.await_refresh().await?;
        self.dispatcher.retry(&replay).await
    }

    pub async fn get(&self, url: impl Into<String>) -> Result<ApiResponse> {
        self.send(RequestDescriptor::get(url)).await
    }
}
