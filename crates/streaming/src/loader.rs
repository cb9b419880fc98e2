use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::join_all;
use parking_lot::Mutex;
use runtime::{Metrics, MetricsSnapshot, RateBudget};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    DetailEvent, DetailFailure, DetailFetcher, DetailOutcome, DetailRequest, DetailState,
    DEFAULT_TTL, DetailTarget, FetchQueue, FetchQueueItem, RetryPolicy, TtlCache,
    fallback_detail, normalize_url,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Minimum spacing between two dequeues.
    pub min_spacing_ms: u64,
    pub ttl_secs: u64,
    pub retry: RetryPolicy,
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    /// Queue capacity; requests beyond it fail immediately.
    pub max_pending: usize,
    /// How many settled (`Cached`/`Failed`) item states are remembered;
    /// the oldest are forgotten first.
    pub max_settled: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            min_spacing_ms: 1_000,
            ttl_secs: DEFAULT_TTL.as_secs(),
            retry: RetryPolicy::default(),
            batch_size: 2,
            batch_delay_ms: 1_000,
            max_pending: 1_024,
            max_settled: 4_096,
        }
    }
}

impl LoaderConfig {
    pub fn min_spacing(&self) -> Duration {
        Duration::from_millis(self.min_spacing_ms)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

struct Subscriber {
    item_id: String,
    tx: mpsc::UnboundedSender<DetailEvent>,
}

struct Inner {
    cache: Arc<dyn TtlCache>,
    fetcher: Arc<dyn DetailFetcher>,
    config: LoaderConfig,
    queue: Mutex<FetchQueue>,
    /// Waiting receivers per cache key. A key is present iff it is queued or
    /// in flight. Lock order: `subscribers` before `queue`.
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
    states: DashMap<String, DetailState>,
    /// Item ids whose state is terminal, oldest first.
    settled: Mutex<VecDeque<String>>,
    wake: Notify,
    metrics: Metrics,
}

/// Serialized, rate-limited, retrying detail enrichment.
///
/// Cheap to clone; every clone shares one queue, one cache and one rate
/// ceiling. Nothing is fetched unless a worker is running (`run` or
/// `spawn_worker`); cache hits are answered without one.
#[derive(Clone)]
pub struct DetailLoader {
    inner: Arc<Inner>,
}

impl DetailLoader {
    pub fn new(cache: Arc<dyn TtlCache>, fetcher: Arc<dyn DetailFetcher>, config: LoaderConfig) -> Self {
        let queue = FetchQueue::new(config.max_pending);
        Self {
            inner: Arc::new(Inner {
                cache,
                fetcher,
                config,
                queue: Mutex::new(queue),
                subscribers: Mutex::new(HashMap::new()),
                states: DashMap::new(),
                settled: Mutex::new(VecDeque::new()),
                wake: Notify::new(),
                metrics: Metrics::new(),
            }),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    /// Last known state of `item_id`. Settled items fall out once more than
    /// `max_settled` newer ones have settled.
    pub fn state(&self, item_id: &str) -> Option<DetailState> {
        self.inner.states.get(item_id).map(|s| *s)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Items waiting in the queue, delayed retries included.
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn spawn_worker(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let loader = self.clone();
        tokio::spawn(async move { loader.run(shutdown).await })
    }

    /// Enriches `requests`; one event per request arrives on the receiver.
    ///
    /// Cache hits are sent before this returns. Misses are queued; a request
    /// whose cache key is already queued or in flight joins that fetch.
    pub async fn enrich_visible(&self, requests: Vec<DetailRequest>) -> mpsc::UnboundedReceiver<DetailEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        for request in requests {
            self.submit(request, &tx, true).await;
        }
        rx
    }

    /// Purges the cached entry of every request and queues it regardless.
    pub async fn refresh(&self, requests: Vec<DetailRequest>) -> mpsc::UnboundedReceiver<DetailEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        for request in requests {
            self.submit(request, &tx, false).await;
        }
        rx
    }

    /// Batch variant: requests go out `batch_size` at a time, each batch is
    /// awaited in full, then `batch_delay` passes before the next one.
    ///
    /// Bypasses the shared queue but uses the same cache and retry policy.
    /// Events come back in request order.
    pub async fn enrich_batched(&self, requests: Vec<DetailRequest>) -> Vec<DetailEvent> {
        let size = self.inner.config.batch_size.max(1);
        let mut events = Vec::with_capacity(requests.len());
        for (i, batch) in requests.chunks(size).enumerate() {
            if i > 0 {
                tokio::time::sleep(self.inner.config.batch_delay()).await;
            }
            let done = join_all(batch.iter().cloned().map(|r| self.fetch_direct(r))).await;
            events.extend(done);
        }
        events
    }

    /// Worker loop. Dequeues one item at a time, no faster than
    /// `min_spacing`, until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut budget = RateBudget::new(self.inner.config.min_spacing());
        info!(min_spacing_ms = self.inner.config.min_spacing_ms, "detail worker started");
        loop {
            let next = self.inner.queue.lock().next_ready_at();
            match next {
                None => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = self.inner.wake.notified() => continue,
                    }
                }
                Some(at) if at > Instant::now() => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep_until(at) => {}
                        _ = self.inner.wake.notified() => continue,
                    }
                }
                Some(_) => {}
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = budget.acquire() => {}
            }
            let item = self.inner.queue.lock().pop_ready(Instant::now());
            if let Some(item) = item {
                self.process(item).await;
            }
        }
        info!(pending = self.pending(), "detail worker stopped");
    }

    fn resolve(&self, request: &DetailRequest) -> Result<(String, String), DetailFailure> {
        let url = self.inner.fetcher.request_url(&request.target)?;
        let key = normalize_url(&url).map_err(DetailFailure::InvalidRequest)?;
        Ok((url, key))
    }

    async fn cached(&self, key: &str) -> Option<Value> {
        match self.inner.cache.get(key).await {
            Ok(Some(payload)) => match serde_json::from_str(&payload) {
                Ok(detail) => Some(detail),
                Err(e) => {
                    warn!(cache_key = %key, error = %e, "unreadable cached detail; refetching");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(cache_key = %key, error = %e, "cache read failed; treating as miss");
                None
            }
        }
    }

    async fn submit(&self, request: DetailRequest, tx: &mpsc::UnboundedSender<DetailEvent>, read_cache: bool) {
        let (url, cache_key) = match self.resolve(&request) {
            Ok(resolved) => resolved,
            Err(failure) => {
                warn!(item_id = %request.item_id, error = %failure, "detail request rejected");
                self.inner.metrics.incr("detail.failed");
                self.set_state(&request.item_id, DetailState::Failed);
                let _ = tx.send(failed_event(request.item_id, String::new(), 0, &failure, &request.target));
                return;
            }
        };

        if read_cache {
            if let Some(detail) = self.cached(&cache_key).await {
                self.inner.metrics.incr("detail.cache_hit");
                self.set_state(&request.item_id, DetailState::Cached);
                let _ = tx.send(DetailEvent {
                    item_id: request.item_id,
                    cache_key,
                    from_cache: true,
                    attempts: 0,
                    outcome: DetailOutcome::Ready { detail },
                });
                return;
            }
            self.inner.metrics.incr("detail.cache_miss");
        } else if let Err(e) = self.inner.cache.delete(&cache_key).await {
            warn!(%cache_key, error = %e, "cache purge failed");
        }

        self.enqueue(request, url, cache_key, tx.clone());
    }

    fn enqueue(&self, request: DetailRequest, url: String, cache_key: String, tx: mpsc::UnboundedSender<DetailEvent>) {
        let item_id = request.item_id.clone();
        let subscriber = Subscriber {
            item_id: item_id.clone(),
            tx,
        };

        let mut subscribers = self.inner.subscribers.lock();
        if let Some(waiting) = subscribers.get_mut(&cache_key) {
            debug!(%item_id, %cache_key, "joining queued detail request");
            self.inner.metrics.incr("detail.coalesced");
            // Joiners report whatever the shared fetch is doing right now.
            let state = waiting
                .first()
                .and_then(|lead| self.state(&lead.item_id))
                .filter(|s| !s.is_terminal())
                .unwrap_or(DetailState::Queued);
            waiting.push(subscriber);
            self.set_state(&item_id, state);
            return;
        }

        let target = request.target.clone();
        let item = FetchQueueItem {
            request,
            url,
            cache_key: cache_key.clone(),
            retry_count: 0,
        };
        let pushed = self.inner.queue.lock().push(item);
        match pushed {
            Ok(_) => {
                subscribers.insert(cache_key, vec![subscriber]);
                drop(subscribers);
                self.set_state(&item_id, DetailState::Queued);
                self.inner.wake.notify_one();
            }
            Err(full) => {
                drop(subscribers);
                warn!(%item_id, max_pending = full.max_len, "detail queue full");
                self.inner.metrics.incr("detail.failed");
                self.set_state(&item_id, DetailState::Failed);
                let failure = DetailFailure::EnrichmentFailed {
                    url: cache_key.clone(),
                    reason: full.to_string(),
                };
                let _ = subscriber
                    .tx
                    .send(failed_event(item_id, cache_key, 0, &failure, &target));
            }
        }
    }

    async fn process(&self, item: FetchQueueItem) {
        let attempt = item.retry_count + 1;
        self.set_states_for(&item.cache_key, DetailState::Fetching { attempt });
        self.inner.metrics.incr("detail.attempts");

        let started = Instant::now();
        let result = self
            .inner
            .fetcher
            .fetch(item.url.clone(), item.request.target.clone())
            .await;
        self.inner
            .metrics
            .record("detail.fetch_ms", started.elapsed().as_millis() as u64);

        let failure = match result {
            Ok(detail) => {
                self.store(&item.cache_key, &detail).await;
                debug!(item_id = %item.request.item_id, attempt, "detail cached");
                self.set_states_for(&item.cache_key, DetailState::Cached);
                self.deliver(&item.cache_key, attempt, DetailOutcome::Ready { detail });
                return;
            }
            Err(failure) => failure,
        };

        let key = item.cache_key.clone();
        let target = item.request.target.clone();
        let item_id = item.request.item_id.clone();
        let delay = if failure.is_retryable() {
            self.inner.config.retry.next_delay(item.retry_count)
        } else {
            None
        };
        if let Some(delay) = delay {
            warn!(
                %item_id,
                attempt,
                retry_in_ms = delay.as_millis() as u64,
                error = %failure,
                "detail fetch failed; retrying"
            );
            self.set_states_for(&key, DetailState::Retrying { attempt });
            let retry = FetchQueueItem {
                retry_count: item.retry_count + 1,
                ..item
            };
            let pushed = self.inner.queue.lock().push_after(retry, Instant::now(), delay);
            match pushed {
                Ok(_) => {
                    self.inner.metrics.incr("detail.retries");
                    return;
                }
                Err(full) => warn!(%item_id, max_pending = full.max_len, "no room to retry"),
            }
        }

        warn!(%item_id, attempts = attempt, error = %failure, "detail fetch gave up");
        self.inner.metrics.incr("detail.failed");
        self.set_states_for(&key, DetailState::Failed);
        self.deliver(
            &key,
            attempt,
            DetailOutcome::Failed {
                error: failure.to_string(),
                fallback: fallback_detail(&target),
            },
        );
    }

    /// Queue-less single request used by the batch variant.
    async fn fetch_direct(&self, request: DetailRequest) -> DetailEvent {
        let (url, cache_key) = match self.resolve(&request) {
            Ok(resolved) => resolved,
            Err(failure) => {
                self.inner.metrics.incr("detail.failed");
                self.set_state(&request.item_id, DetailState::Failed);
                return failed_event(request.item_id, String::new(), 0, &failure, &request.target);
            }
        };
        if let Some(detail) = self.cached(&cache_key).await {
            self.inner.metrics.incr("detail.cache_hit");
            self.set_state(&request.item_id, DetailState::Cached);
            return DetailEvent {
                item_id: request.item_id,
                cache_key,
                from_cache: true,
                attempts: 0,
                outcome: DetailOutcome::Ready { detail },
            };
        }
        self.inner.metrics.incr("detail.cache_miss");

        let mut retry_count = 0;
        loop {
            let attempt = retry_count + 1;
            self.set_state(&request.item_id, DetailState::Fetching { attempt });
            self.inner.metrics.incr("detail.attempts");
            let failure = match self
                .inner
                .fetcher
                .fetch(url.clone(), request.target.clone())
                .await
            {
                Ok(detail) => {
                    self.store(&cache_key, &detail).await;
                    self.set_state(&request.item_id, DetailState::Cached);
                    return DetailEvent {
                        item_id: request.item_id,
                        cache_key,
                        from_cache: false,
                        attempts: attempt,
                        outcome: DetailOutcome::Ready { detail },
                    };
                }
                Err(failure) => failure,
            };

            let delay = if failure.is_retryable() {
                self.inner.config.retry.next_delay(retry_count)
            } else {
                None
            };
            let Some(delay) = delay else {
                warn!(item_id = %request.item_id, attempts = attempt, error = %failure, "detail fetch gave up");
                self.inner.metrics.incr("detail.failed");
                self.set_state(&request.item_id, DetailState::Failed);
                return failed_event(request.item_id, cache_key, attempt, &failure, &request.target);
            };
            self.inner.metrics.incr("detail.retries");
            self.set_state(&request.item_id, DetailState::Retrying { attempt });
            tokio::time::sleep(delay).await;
            retry_count += 1;
        }
    }

    async fn store(&self, key: &str, detail: &Value) {
        if let Err(e) = self
            .inner
            .cache
            .set(key, detail.to_string(), self.inner.config.ttl())
            .await
        {
            warn!(cache_key = %key, error = %e, "cache write failed");
        }
    }

    fn deliver(&self, key: &str, attempts: u32, outcome: DetailOutcome) {
        let waiting = self.inner.subscribers.lock().remove(key).unwrap_or_default();
        for sub in waiting {
            let _ = sub.tx.send(DetailEvent {
                item_id: sub.item_id,
                cache_key: key.to_string(),
                from_cache: false,
                attempts,
                outcome: outcome.clone(),
            });
        }
    }

    fn set_state(&self, item_id: &str, state: DetailState) {
        self.inner.states.insert(item_id.to_string(), state);
        if !state.is_terminal() {
            return;
        }
        let mut settled = self.inner.settled.lock();
        settled.retain(|id| id != item_id);
        settled.push_back(item_id.to_string());
        while settled.len() > self.inner.config.max_settled {
            if let Some(oldest) = settled.pop_front() {
                self.inner.states.remove_if(&oldest, |_, s| s.is_terminal());
            }
        }
    }

    fn set_states_for(&self, key: &str, state: DetailState) {
        let subscribers = self.inner.subscribers.lock();
        for sub in subscribers.get(key).into_iter().flatten() {
            self.set_state(&sub.item_id, state);
        }
    }
}

fn failed_event(
    item_id: String,
    cache_key: String,
    attempts: u32,
    failure: &DetailFailure,
    target: &DetailTarget,
) -> DetailEvent {
    DetailEvent {
        item_id,
        cache_key,
        from_cache: false,
        attempts,
        outcome: DetailOutcome::Failed {
            error: failure.to_string(),
            fallback: fallback_detail(target),
        },
    }
}
