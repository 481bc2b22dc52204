//! Keepalive timer bookkeeping.
//!
//! Both timers key off whether *any* non-keepalive traffic crossed the wire
//! during the previous interval, tracked here as a pair of sticky flags that
//! the session clears each time a timer fires.

use std::time::Duration;

/// Tracks the two per-interval flags the keepalive timers restart against:
/// whether data was received (no-keepalive-received timer) and whether a
/// data send already served as this interval's keepalive (need-to-send
/// timer).
pub struct KeepaliveTimers {
    interval: Duration,
    data_received: bool,
    data_sent: bool,
}

impl KeepaliveTimers {
    /// `interval` is the already-negotiated `min(ours, theirs)` value; zero
    /// means keepalive is disabled entirely and every duration getter
    /// returns `Duration::ZERO`, which [`bpcore_async::time::sleep`] treats
    /// as a no-op (callers should simply not race these timers when
    /// disabled).
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            data_received: false,
            data_sent: false,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.interval.is_zero()
    }

    pub fn on_data_received(&mut self) {
        self.data_received = true;
    }

    pub fn on_data_sent(&mut self) {
        self.data_sent = true;
    }

    /// Duration for the no-keepalive-received timer: `2.5 × interval`.
    pub fn idle_timeout(&self) -> Duration {
        self.interval + self.interval / 2 * 3
    }

    /// Called when the no-keepalive-received timer expires. Returns `true`
    /// if the timer should simply restart (data arrived during the
    /// interval) or `false` if the session must shut down with
    /// `IDLE_TIMEOUT`.
    pub fn on_idle_timeout_fired(&mut self) -> bool {
        std::mem::take(&mut self.data_received)
    }

    /// Duration for the need-to-send-keepalive timer: `interval`, or
    /// `interval / 2` if a data send already served as this interval's
    /// keepalive (prevents starvation under light send load).
    pub fn send_timeout(&self) -> Duration {
        if self.data_sent {
            self.interval / 2
        } else {
            self.interval
        }
    }

    /// Called when the need-to-send-keepalive timer expires, after the
    /// caller has sent a `KeepAlive` (or decided a send already covered
    /// it). Clears the sent flag for the next interval.
    pub fn on_send_timeout_fired(&mut self) {
        self.data_sent = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_timeout_is_two_and_a_half_times_interval() {
        let t = KeepaliveTimers::new(Duration::from_secs(10));
        assert_eq!(t.idle_timeout(), Duration::from_secs(25));
    }

    #[test]
    fn idle_timeout_restarts_when_data_arrived() {
        let mut t = KeepaliveTimers::new(Duration::from_secs(10));
        t.on_data_received();
        assert!(t.on_idle_timeout_fired());
        // Flag consumed; a second expiry with no new data should not restart.
        assert!(!t.on_idle_timeout_fired());
    }

    #[test]
    fn send_timeout_halves_after_a_data_send() {
        let mut t = KeepaliveTimers::new(Duration::from_secs(10));
        assert_eq!(t.send_timeout(), Duration::from_secs(10));
        t.on_data_sent();
        assert_eq!(t.send_timeout(), Duration::from_secs(5));
        t.on_send_timeout_fired();
        assert_eq!(t.send_timeout(), Duration::from_secs(10));
    }
}
