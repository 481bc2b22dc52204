//! Sleep helper used by keepalive and shutdown-grace timers.

/// Sleeps for `duration`, treating a zero or negative duration as a no-op.
///
/// Both TCPCL links express several of their timers (keepalive interval,
/// shutdown grace period, idle-connection retry) as `Duration`s that may be
/// computed from negotiated, possibly-zero peer values; centralizing the
/// zero-means-skip rule here keeps that logic out of the state machines.
pub async fn sleep(duration: std::time::Duration) {
    if duration.is_zero() {
        return;
    }
    tokio::time::sleep(duration).await;
}
