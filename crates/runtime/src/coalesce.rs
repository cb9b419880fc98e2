use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Handle for one submitted request; compared against the latest issued.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestToken(pub u64);

/// Timer-based coalescing of bursty requests (pan/zoom, filter typing).
///
/// Every submission takes a fresh token. A token fires once the quiet period
/// has elapsed without a newer submission; otherwise it is superseded and the
/// caller drops its work.
#[derive(Debug)]
pub struct Coalescer {
    quiet: Duration,
    latest: AtomicU64,
}

impl Coalescer {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            latest: AtomicU64::new(0),
        }
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet
    }

    /// Issues a new token, superseding every earlier one.
    pub fn issue(&self) -> RequestToken {
        RequestToken(self.latest.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, token: RequestToken) -> bool {
        self.latest.load(Ordering::SeqCst) == token.0
    }

    /// Waits out the quiet period; `true` if `token` is still the latest.
    pub async fn settle(&self, token: RequestToken) -> bool {
        if !self.quiet.is_zero() {
            tokio::time::sleep(self.quiet).await;
        }
        self.is_current(token)
    }

    /// Issues a token and waits for it to settle.
    ///
    /// Returns `None` when a newer submission arrived during the quiet period.
    pub async fn submit(&self) -> Option<RequestToken> {
        let token = self.issue();
        self.settle(token).await.then_some(token)
    }
}
