//! Per-provider request spacing.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces a minimum interval between consecutive requests to one
/// provider. Callers that arrive early sleep while holding the lock, so
/// concurrent callers are serialized in arrival order.
#[derive(Debug)]
pub struct RequestSpacer {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RequestSpacer {
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Waits until a request may be sent, then claims the slot.
    pub async fn wait(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.min_interval;
            let now = Instant::now();
            if ready_at > now {
                tracing::trace!(
                    wait_ms = u64::try_from((ready_at - now).as_millis()).unwrap_or(u64::MAX),
                    "spacing provider request"
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn first_request_is_not_delayed() {
        let spacer = RequestSpacer::new(Duration::from_secs(30));
        let started = Instant::now();
        spacer.wait().await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn consecutive_requests_are_spaced() {
        let spacer = RequestSpacer::new(Duration::from_millis(60));
        let started = Instant::now();
        spacer.wait().await;
        spacer.wait().await;
        spacer.wait().await;
        assert!(started.elapsed() >= Duration::from_millis(120));
    }

    #[tokio::test]
    async fn zero_interval_never_sleeps() {
        let spacer = RequestSpacer::new(Duration::ZERO);
        let started = Instant::now();
        for _ in 0..50 {
            spacer.wait().await;
        }
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_schedule() {
        let spacer = Arc::new(RequestSpacer::new(Duration::from_millis(40)));
        let started = Instant::now();
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let spacer = Arc::clone(&spacer);
                tokio::spawn(async move { spacer.wait().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(started.elapsed() >= Duration::from_millis(80));
    }
}
