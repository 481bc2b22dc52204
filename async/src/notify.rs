//! Single-slot wake primitive for ack-ring drain waiters.

use std::future::Future;

/// Wakes a task waiting on the ack ring to drain.
///
/// Wraps `tokio::sync::Notify` so link code never names `tokio` directly,
/// matching the rest of this crate's runtime-isolation convention.
pub struct Notify(tokio::sync::Notify);

impl Notify {
    /// Creates a new, unset notification.
    pub fn new() -> Self {
        Self(tokio::sync::Notify::new())
    }

    /// Wakes one waiting task, or arms the next `notified()` call if none is
    /// currently waiting.
    pub fn notify_one(&self) {
        self.0.notify_one();
    }

    /// Returns a future that resolves once `notify_one()` has been called.
    pub fn notified(&self) -> impl Future<Output = ()> + '_ {
        self.0.notified()
    }
}

impl Default for Notify {
    fn default() -> Self {
        Self::new()
    }
}
