//! Bounded condition polling, the only synchronisation point with a render surface.

use std::time::Duration;

use tokio::time::{Instant, sleep};

/// Polls `predicate` until it holds or `timeout` elapses.
///
/// The predicate is checked immediately, then once per `interval`. Returns
/// `false` on timeout; callers decide whether that fails their stage.
pub async fn wait_until<F>(mut predicate: F, timeout: Duration, interval: Duration) -> bool
where
    F: FnMut() -> bool,
{
    if predicate() {
        return true;
    }

    let deadline = Instant::now() + timeout;
    let interval = interval.max(Duration::from_millis(1));

    loop {
        let now = Instant::now();
        if now >= deadline {
            return false;
        }

        sleep(interval.min(deadline - now)).await;

        if predicate() {
            return true;
        }
    }
}

/// Fixed settle delay.
pub async fn delay(duration: Duration) {
    if !duration.is_zero() {
        sleep(duration).await;
    }
}
