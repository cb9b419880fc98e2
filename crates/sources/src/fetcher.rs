use std::collections::HashMap;
use std::time::Duration;

use foundation::{Observation, SourceId};
use parking_lot::Mutex;
use runtime::BoxFuture;

use crate::{FetchError, Filters};

/// One page request against one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub source: SourceId,
    /// 1-based.
    pub page: u32,
    pub per_page: u32,
    pub filters: Filters,
    /// Asks a non-primary source to leave out records it shares with the
    /// primary one.
    pub exclude_source: Option<SourceId>,
}

impl PageRequest {
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut q = vec![
            ("page".to_string(), self.page.to_string()),
            ("per_page".to_string(), self.per_page.to_string()),
        ];
        q.extend(self.filters.to_query());
        if let Some(excluded) = self.exclude_source {
            q.push(("exclude_source".to_string(), excluded.as_str().to_string()));
        }
        q
    }
}

/// One decoded page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourcePage {
    pub items: Vec<Observation>,
    /// Total as reported by the source.
    pub total: u64,
    pub has_more: bool,
}

/// Upstream observation collection.
///
/// Implementations must be `Send + Sync` for use across async tasks.
/// Methods return boxed futures for dyn-compatibility.
pub trait SourceFetcher: Send + Sync {
    /// Endpoint label for logs.
    fn endpoint(&self, source: SourceId) -> String;

    fn fetch_page(&self, request: PageRequest) -> BoxFuture<'_, Result<SourcePage, FetchError>>;
}

/// In-memory fetcher for testing and fixtures.
///
/// Pages not registered come back empty and exhausted.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    pages: Mutex<HashMap<(SourceId, u32), SourcePage>>,
    failing: Mutex<HashMap<SourceId, String>>,
    requests: Mutex<Vec<PageRequest>>,
    delay: Option<Duration>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every response is held back by `delay` (tokio time).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_page(&self, source: SourceId, page: u32, content: SourcePage) {
        self.pages.lock().insert((source, page), content);
    }

    pub fn set_failing(&self, source: SourceId, reason: impl Into<String>) {
        self.failing.lock().insert(source, reason.into());
    }

    /// Requests seen so far, in arrival order.
    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().clone()
    }
}

impl SourceFetcher for MemoryFetcher {
    fn endpoint(&self, source: SourceId) -> String {
        format!("memory://{source}")
    }

    fn fetch_page(&self, request: PageRequest) -> BoxFuture<'_, Result<SourcePage, FetchError>> {
        Box::pin(async move {
            self.requests.lock().push(request.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let failing = self.failing.lock().get(&request.source).cloned();
            if let Some(reason) = failing {
                return Err(FetchError::unavailable(
                    request.source,
                    self.endpoint(request.source),
                    reason,
                ));
            }
            Ok(self
                .pages
                .lock()
                .get(&(request.source, request.page))
                .cloned()
                .unwrap_or_default())
        })
    }
}
