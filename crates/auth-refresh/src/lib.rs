//! Single-flight token refresh and request replay
//!
//! Sits between call sites and the `Transport`. When a request fails with 401
//! the client waits on the `RefreshCoordinator`, which runs at most one
//! refresh exchange at a time and fans its outcome out to every caller that
//! failed while it was in flight. On success each caller replays its own
//! request exactly once; on failure all of them receive the refresh error and
//! the session is torn down once.
//!
//! Request lifecycle:
//! 1. `AuthClient::send` hands the descriptor to the transport
//! 2. A failure is classified (`classify`): exempt auth endpoint, refresh-eligible, or pass-through
//! 3. Refresh-eligible: descriptor marked retried, caller joins the current wave
//! 4. Wave success: `RetryDispatcher` replays the descriptor, outcome returned as-is
//! 5. Wave failure: `FailureEscalation` clears the token store and navigates once,
//!    every waiter gets the same `RefreshError`

pub mod classify;
pub mod client;
pub mod coordinator;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod escalation;
pub mod metrics;

pub use classify::{AuthEndpoints, Classification, FailureKind, classify, failure_kind};
pub use client::AuthClient;
pub use coordinator::{RefreshCoordinator, RefreshState};
pub use dispatch::RetryDispatcher;
pub use endpoint::{HttpRefreshEndpoint, RefreshEndpoint, TokenResponse};
pub use error::{ClientError, RefreshError, Result};
pub use escalation::FailureEscalation;
