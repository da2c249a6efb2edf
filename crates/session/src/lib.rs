//! Session state collaborators for the authenticated API client
//!
//! Holds the two collaborators the refresh core reaches out to when a session
//! ends:
//! - `TokenStore`: where the access/refresh token pair lives. `MemoryTokenStore`
//!   for in-process sessions, `FileTokenStore` to survive restarts.
//! - `Navigator`: how the application is told to send the user back to the
//!   sign-in entry point. `ChannelNavigator` publishes requests on a channel,
//!   `LogNavigator` only logs them.

pub mod error;
pub mod navigation;
pub mod store;
pub mod tokens;

pub use error::{Error, Result};
pub use navigation::{ChannelNavigator, LogNavigator, NavigationRequest, Navigator};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use tokens::{SessionTokens, now_millis};
