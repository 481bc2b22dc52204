//! Drain-on-destruct: block (briefly) until a link's in-flight bundles have
//! all been acked, or give up after too many stalled polling attempts.

use crate::telemetry::LinkTelemetry;
use std::time::Duration;

/// Default per-poll wait used by [`try_to_wait_for_all_bundles_to_finish_sending`].
pub const DEFAULT_TIMEOUT_PER_ATTEMPT: Duration = Duration::from_millis(250);

/// Default stall budget used by [`try_to_wait_for_all_bundles_to_finish_sending`].
pub const DEFAULT_MAX_STALLS: u32 = 10;

/// Polls `telemetry.unacked_bundles()` every `timeout_per_attempt`, returning
/// `true` once it reaches zero. If a poll's count does not strictly decrease
/// from the previous one, a stall counter increments; `max_stalls`
/// consecutive stalls give up and return `false`. Any decrease resets the
/// stall counter, so a link that is still making progress (however slowly)
/// is never cut off early.
pub async fn try_to_wait_for_all_bundles_to_finish_sending(
    telemetry: &LinkTelemetry,
    timeout_per_attempt: Duration,
    max_stalls: u32,
) -> bool {
    let mut last_unacked = telemetry.unacked_bundles();
    if last_unacked == 0 {
        return true;
    }

    let mut stalls = 0;
    loop {
        bpcore_async::time::sleep(timeout_per_attempt).await;

        let unacked = telemetry.unacked_bundles();
        if unacked == 0 {
            return true;
        }

        if unacked < last_unacked {
            stalls = 0;
        } else {
            stalls += 1;
            if stalls >= max_stalls {
                return false;
            }
        }
        last_unacked = unacked;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[tokio::test(start_paused = true)]
    async fn returns_immediately_when_nothing_outstanding() {
        let telemetry = LinkTelemetry::new();
        let done = try_to_wait_for_all_bundles_to_finish_sending(
            &telemetry,
            Duration::from_millis(10),
            3,
        )
        .await;
        assert!(done);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_stalls_with_no_progress() {
        let telemetry = LinkTelemetry::new();
        telemetry.bundles_sent.store(5, Ordering::Relaxed);

        let done =
            try_to_wait_for_all_bundles_to_finish_sending(&telemetry, Duration::from_millis(1), 3)
                .await;
        assert!(!done);
    }

    #[tokio::test(start_paused = true)]
    async fn progress_resets_the_stall_counter() {
        let telemetry = std::sync::Arc::new(LinkTelemetry::new());
        telemetry.bundles_sent.store(2, Ordering::Relaxed);

        // Simulate both acks trickling in while the poll loop is waiting.
        let background = telemetry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            background.bundles_sent_and_acked.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(Duration::from_millis(1)).await;
            background.bundles_sent_and_acked.fetch_add(1, Ordering::Relaxed);
        });

        let done =
            try_to_wait_for_all_bundles_to_finish_sending(&telemetry, Duration::from_millis(1), 2)
                .await;
        assert!(done);
    }
}
