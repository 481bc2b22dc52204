//! Keepalive timer bookkeeping for TCPCLv4: simpler than v3's half-interval
//! dance since RFC 9174 just asks for "idle at most 2x the interval" and
//! "send something at least once per interval".

use std::time::Duration;

pub struct KeepaliveTimers {
    interval: Duration,
    data_received: bool,
}

impl KeepaliveTimers {
    /// `interval` is the already-negotiated `min(ours, theirs)`. Zero means
    /// keepalive is disabled; every getter then returns `Duration::ZERO`,
    /// which [`bpcore_async::time::sleep`] treats as a no-op.
    pub fn new(interval: Duration) -> Self {
        Self { interval, data_received: false }
    }

    pub fn is_disabled(&self) -> bool {
        self.interval.is_zero()
    }

    pub fn on_data_received(&mut self) {
        self.data_received = true;
    }

    pub fn idle_timeout(&self) -> Duration {
        self.interval * 2
    }

    pub fn send_timeout(&self) -> Duration {
        self.interval
    }

    /// Called when the no-keepalive-received timer expires. `true` means
    /// restart (something arrived during the interval); `false` means the
    /// session has genuinely gone idle.
    pub fn on_idle_timeout_fired(&mut self) -> bool {
        std::mem::take(&mut self.data_received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_timeout_is_double_interval() {
        let t = KeepaliveTimers::new(Duration::from_secs(10));
        assert_eq!(t.idle_timeout(), Duration::from_secs(20));
    }

    #[test]
    fn idle_timeout_restarts_when_data_arrived() {
        let mut t = KeepaliveTimers::new(Duration::from_secs(10));
        t.on_data_received();
        assert!(t.on_idle_timeout_fired());
        assert!(!t.on_idle_timeout_fired());
    }

    #[test]
    fn disabled_when_interval_is_zero() {
        let t = KeepaliveTimers::new(Duration::ZERO);
        assert!(t.is_disabled());
    }
}
