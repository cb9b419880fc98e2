use std::time::Duration;

use tokio::time::Instant;

/// Rate budget for serialized upstream calls: a token bucket holding one token.
///
/// The token refills `min_interval` after it was last taken, which enforces a
/// minimum spacing between consecutive dequeues regardless of how fast the
/// work itself completes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RateBudget {
    min_interval: Duration,
    last_taken: Option<Instant>,
}

impl RateBudget {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_taken: None,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Instant at which the token is available again.
    pub fn available_at(&self) -> Option<Instant> {
        self.last_taken.map(|t| t + self.min_interval)
    }

    /// Waits until the token is available, then takes it.
    pub async fn acquire(&mut self) {
        if let Some(at) = self.available_at() {
            tokio::time::sleep_until(at).await;
        }
        let now = Instant::now();
        self.last_taken = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::RateBudget;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn first_acquire_is_immediate() {
        let mut b = RateBudget::new(Duration::from_millis(500));
        assert_eq!(b.available_at(), None);
        let start = Instant::now();
        b.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(b.available_at(), Some(start + Duration::from_millis(500)));
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_sleeps_until_token_refills() {
        let mut b = RateBudget::new(Duration::from_secs(1));
        let start = Instant::now();
        b.acquire().await;
        b.acquire().await;
        b.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }
}
