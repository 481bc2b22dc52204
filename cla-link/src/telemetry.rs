//! Per-connection atomic counters, shared across the send and receive sides
//! of a link without any locking.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Counters a link updates as bundles and fragments move across it.
///
/// Every field is an independent atomic; there is no cross-field invariant
/// enforced at update time (e.g. `bundles_sent_and_acked` can transiently
/// read higher than `bundles_sent` has been observed by a racing reader).
/// Callers that need a consistent snapshot should treat the `Ordering::Relaxed`
/// loads below as a best-effort telemetry read, not a synchronization point.
#[derive(Default)]
pub struct LinkTelemetry {
    pub bundles_sent: AtomicU64,
    pub bundles_sent_and_acked: AtomicU64,
    pub bundle_bytes_sent: AtomicU64,
    pub bundle_bytes_sent_and_acked: AtomicU64,
    pub fragments_sent: AtomicU64,
    pub fragments_sent_and_acked: AtomicU64,
    pub bundles_received: AtomicU64,
    pub bundle_bytes_received: AtomicU64,
    pub fragments_received: AtomicU64,
    pub link_is_up_physically: AtomicBool,
    pub tcp_reconnect_attempts: AtomicU64,
}

impl LinkTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_segment_sent(&self, bytes: u64) {
        self.fragments_sent.fetch_add(1, Ordering::Relaxed);
        self.bundle_bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_bundle_sent(&self) {
        self.bundles_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_segment_acked(&self, bytes: u64) {
        self.fragments_sent_and_acked.fetch_add(1, Ordering::Relaxed);
        self.bundle_bytes_sent_and_acked
            .fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_bundle_acked(&self) {
        self.bundles_sent_and_acked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_segment_received(&self, bytes: u64) {
        self.fragments_received.fetch_add(1, Ordering::Relaxed);
        self.bundle_bytes_received
            .fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_bundle_received(&self) {
        self.bundles_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_link_up(&self, up: bool) {
        self.link_is_up_physically.store(up, Ordering::Relaxed);
    }

    pub fn is_link_up(&self) -> bool {
        self.link_is_up_physically.load(Ordering::Relaxed)
    }

    pub fn record_reconnect_attempt(&self) {
        self.tcp_reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// `bundles_sent - bundles_sent_and_acked`, the figure
    /// [`crate::drain::try_to_wait_for_all_bundles_to_finish_sending`] polls.
    pub fn unacked_bundles(&self) -> u64 {
        self.bundles_sent.load(Ordering::Relaxed)
            - self.bundles_sent_and_acked.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unacked_bundles_tracks_the_gap() {
        let t = LinkTelemetry::new();
        t.record_bundle_sent();
        t.record_bundle_sent();
        assert_eq!(t.unacked_bundles(), 2);
        t.record_bundle_acked();
        assert_eq!(t.unacked_bundles(), 1);
    }

    #[test]
    fn link_up_flag_round_trips() {
        let t = LinkTelemetry::new();
        assert!(!t.is_link_up());
        t.set_link_up(true);
        assert!(t.is_link_up());
    }
}
