//! Shared types for the authenticated API client workspace
//!
//! Holds the configuration error type used by binaries and the `Secret`
//! wrapper every crate uses for access and refresh tokens.

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
