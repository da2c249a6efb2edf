//! Navigation back to the unauthenticated entry point
//!
//! When a session cannot be recovered the application has to move the user to
//! its sign-in flow. How that happens (router push, window location, exiting a
//! CLI) belongs to the application; the refresh core only calls `Navigator`.

use tokio::sync::mpsc;
use tracing::{info, warn};

/// Receiver side of a session-ended signal.
pub trait Navigator: Send + Sync {
    /// Move the user to the unauthenticated entry point (e.g. `/login`).
    fn go_to_unauthenticated_entry(&self);
}

/// A request to navigate to `entry`, published by `ChannelNavigator`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationRequest {
    pub entry: String,
}

/// Publishes a `NavigationRequest` on an unbounded channel for the
/// application's UI loop to act on.
pub struct ChannelNavigator {
    entry: String,
    tx: mpsc::UnboundedSender<NavigationRequest>,
}

impl ChannelNavigator {
    pub fn new(entry: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<NavigationRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                entry: entry.into(),
                tx,
            },
            rx,
        )
    }
}

impl Navigator for ChannelNavigator {
    fn go_to_unauthenticated_entry(&self) {
        let request = NavigationRequest {
            entry: self.entry.clone(),
        };
        if self.tx.send(request).is_err() {
            warn!(entry = %self.entry, "navigation receiver dropped, request discarded");
        } else {
            info!(entry = %self.entry, "requested navigation to unauthenticated entry");
        }
    }
}

/// Navigator that only records the request in the log. Useful for headless
/// callers that detect the ended session through the returned error instead.
pub struct LogNavigator {
    entry: String,
}

impl LogNavigator {
    pub fn new(entry: impl Into<String>) -> Self {
        Self {
            entry: entry.into(),
        }
    }
}

impl Navigator for LogNavigator {
    fn go_to_unauthenticated_entry(&self) {
        warn!(entry = %self.entry, "session ended, sign in again");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_navigator_publishes_entry() {
        let (navigator, mut rx) = ChannelNavigator::new("/login");
        navigator.go_to_unauthenticated_entry();

        let request = rx.try_recv().unwrap();
        assert_eq!(request.entry, "/login");
        assert!(rx.try_recv().is_err(), "exactly one request per call");
    }

    #[test]
    fn channel_navigator_survives_dropped_receiver() {
        let (navigator, rx) = ChannelNavigator::new("/login");
        drop(rx);
        // Must not panic
        navigator.go_to_unauthenticated_entry();
    }

    #[test]
    fn log_navigator_does_not_panic() {
        LogNavigator::new("/login").go_to_unauthenticated_entry();
    }
}
