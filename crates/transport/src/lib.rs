//! Transport abstraction for the authenticated API client
//!
//! Defines the `Transport` trait that performs exactly one request/response
//! exchange for a `RequestDescriptor`. The refresh core never looks past this
//! trait: it only needs a successful `ApiResponse` or a `TransportError` that
//! carries the HTTP status when one was received. `HttpTransport` is the
//! reqwest-backed implementation that also attaches the session's bearer token.

pub mod descriptor;
pub mod error;
pub mod http;
pub mod response;

pub use descriptor::RequestDescriptor;
pub use error::{Result, TransportError, UNAUTHORIZED};
pub use http::{HeaderInjection, HttpTransport};
pub use response::ApiResponse;

use std::future::Future;
use std::pin::Pin;

/// One request/response exchange.
///
/// Implementations report non-success statuses as `TransportError::Status`
/// and pass every other failure through without reinterpretation.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Transport>`).
pub trait Transport: Send + Sync {
    fn send<'a>(
        &'a self,
        request: &'a RequestDescriptor,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + 'a>>;
}
