//! Poll-wait primitive
//!
//! Every wait in the automation goes through here, so every wait is
//! cancellable and none of them blocks the runtime.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// Evaluate `condition` now and then every `interval` until it yields a
/// value, `timeout` has elapsed, or `cancel` fires.
///
/// Timing out and being cancelled both return `None`; callers that care
/// check the token themselves.
pub async fn poll_until<T>(
    mut condition: impl FnMut() -> Option<T>,
    timeout: Duration,
    interval: Duration,
    cancel: &CancellationToken,
) -> Option<T> {
    let started = Instant::now();

    loop {
        if cancel.is_cancelled() {
            return None;
        }
        if let Some(value) = condition() {
            return Some(value);
        }
        if started.elapsed() >= timeout {
            return None;
        }

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = sleep(interval) => {}
        }
    }
}

/// Sleep for `duration`; `false` if cancelled first
pub async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(1000);
    const INTERVAL: Duration = Duration::from_millis(300);

    #[tokio::test(start_paused = true)]
    async fn test_immediate_success() {
        let token = CancellationToken::new();
        let started = Instant::now();
        assert_eq!(poll_until(|| Some(7), TIMEOUT, INTERVAL, &token).await, Some(7));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_later_tick() {
        let token = CancellationToken::new();
        let mut calls = 0;
        let result = poll_until(
            || {
                calls += 1;
                (calls == 3).then_some("ready")
            },
            TIMEOUT,
            INTERVAL,
            &token,
        )
        .await;
        assert_eq!(result, Some("ready"));
        assert_eq!(calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_overshoots_by_at_most_one_interval() {
        let token = CancellationToken::new();
        let started = Instant::now();
        let mut calls = 0;
        let result: Option<()> = poll_until(
            || {
                calls += 1;
                None
            },
            TIMEOUT,
            INTERVAL,
            &token,
        )
        .await;

        assert_eq!(result, None);
        assert!(started.elapsed() >= TIMEOUT);
        assert!(started.elapsed() <= TIMEOUT + INTERVAL);
        // 0, 300, 600, 900, 1200
        assert_eq!(calls, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_abandons_wait() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(450)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let result: Option<()> =
            poll_until(|| None, Duration::from_secs(60), INTERVAL, &token).await;
        assert_eq!(result, None);
        assert!(started.elapsed() < Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_reports_cancellation() {
        let token = CancellationToken::new();
        assert!(pause(Duration::from_millis(10), &token).await);
        token.cancel();
        assert!(!pause(Duration::from_secs(10), &token).await);
    }
}
