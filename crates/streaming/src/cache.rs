use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use runtime::{BoxFuture, Clock, SystemClock};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::CacheError;

pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// One cached payload.
///
/// Valid iff `now - stored_at_ms < ttl_ms`; expired entries are logically
/// absent even while they are still stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: String,
    pub payload: String,
    pub stored_at_ms: i64,
    pub ttl_ms: u64,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, payload: impl Into<String>, now_ms: i64, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
            stored_at_ms: now_ms,
            ttl_ms: ttl.as_millis() as u64,
        }
    }

    pub fn is_fresh(&self, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.stored_at_ms) < self.ttl_ms as i64
    }
}

/// Key/value store with per-entry time-to-live.
///
/// Writes replace entries wholesale. Implementations must be `Send + Sync`;
/// methods return boxed futures for dyn-compatibility.
pub trait TtlCache: Send + Sync {
    /// Payload for `key` if present and not expired.
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<String>, CacheError>>;

    fn set(&self, key: &str, payload: String, ttl: Duration) -> BoxFuture<'_, Result<(), CacheError>>;

    /// Returns `true` if an entry was removed.
    fn delete(&self, key: &str) -> BoxFuture<'_, Result<bool, CacheError>>;

    fn clear(&self) -> BoxFuture<'_, Result<(), CacheError>>;
}

/// Process-local cache. Like [`FileCache`], expired entries are pruned on
/// every write.
#[derive(Debug)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.is_fresh(now));
        before - self.entries.len()
    }

    fn get_now(&self, key: &str) -> Option<String> {
        let now = self.clock.now_ms();
        let payload = self.entries.get(key).map(|e| e.is_fresh(now).then(|| e.payload.clone()));
        match payload {
            Some(Some(p)) => Some(p),
            Some(None) => {
                self.entries.remove_if(key, |_, e| !e.is_fresh(now));
                None
            }
            None => None,
        }
    }
}

impl TtlCache for MemoryCache {
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<String>, CacheError>> {
        let hit = self.get_now(key);
        Box::pin(async move { Ok(hit) })
    }

    fn set(&self, key: &str, payload: String, ttl: Duration) -> BoxFuture<'_, Result<(), CacheError>> {
        let purged = self.purge_expired();
        if purged > 0 {
            debug!(purged, remaining = self.entries.len(), "expired cache entries dropped");
        }
        let entry = CacheEntry::new(key, payload, self.clock.now_ms(), ttl);
        self.entries.insert(entry.key.clone(), entry);
        Box::pin(async { Ok(()) })
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, Result<bool, CacheError>> {
        let removed = self.entries.remove(key).is_some();
        Box::pin(async move { Ok(removed) })
    }

    fn clear(&self) -> BoxFuture<'_, Result<(), CacheError>> {
        self.entries.clear();
        Box::pin(async { Ok(()) })
    }
}

/// Cache persisted as one JSON document.
///
/// Every write rewrites the document through a temp file and a rename, so a
/// crash leaves either the old or the new version. Expired entries are
/// pruned on write. A document that fails to parse reads as empty.
pub struct FileCache {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    lock: Mutex<()>,
}

type Document = BTreeMap<String, CacheEntry>;

impl FileCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_clock(path, Arc::new(SystemClock))
    }

    pub fn with_clock(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            clock,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load_unlocked(&self) -> Result<Document, CacheError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => serde_json::from_str(&s).map_err(|e| CacheError::Corrupt(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Document::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Like `load_unlocked`, but a corrupt document is logged and read as empty.
    async fn load_or_empty(&self) -> Result<Document, CacheError> {
        match self.load_unlocked().await {
            Err(CacheError::Corrupt(reason)) => {
                warn!(path = %self.path.display(), %reason, "cache document corrupt; treating as empty");
                Ok(Document::new())
            }
            other => other,
        }
    }

    async fn save_unlocked(&self, doc: &Document) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let text = serde_json::to_string(doc).map_err(|e| CacheError::Corrupt(e.to_string()))?;
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

impl TtlCache for FileCache {
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<String>, CacheError>> {
        let key = key.to_string();
        Box::pin(async move {
            let _g = self.lock.lock().await;
            let doc = self.load_or_empty().await?;
            let now = self.clock.now_ms();
            Ok(doc
                .get(&key)
                .filter(|e| e.is_fresh(now))
                .map(|e| e.payload.clone()))
        })
    }

    fn set(&self, key: &str, payload: String, ttl: Duration) -> BoxFuture<'_, Result<(), CacheError>> {
        let key = key.to_string();
        Box::pin(async move {
            let _g = self.lock.lock().await;
            let mut doc = self.load_or_empty().await?;
            let now = self.clock.now_ms();
            doc.retain(|_, e| e.is_fresh(now));
            doc.insert(key.clone(), CacheEntry::new(key, payload, now, ttl));
            self.save_unlocked(&doc).await?;
            debug!(path = %self.path.display(), entries = doc.len(), "cache document written");
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, Result<bool, CacheError>> {
        let key = key.to_string();
        Box::pin(async move {
            let _g = self.lock.lock().await;
            let mut doc = self.load_or_empty().await?;
            let removed = doc.remove(&key).is_some();
            if removed {
                self.save_unlocked(&doc).await?;
            }
            Ok(removed)
        })
    }

    fn clear(&self) -> BoxFuture<'_, Result<(), CacheError>> {
        Box::pin(async move {
            let _g = self.lock.lock().await;
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use runtime::ManualClock;

    use super::{CacheEntry, FileCache, MemoryCache, TtlCache};

    #[test]
    fn entry_freshness_is_strict() {
        let e = CacheEntry::new("k", "v", 1_000, Duration::from_millis(500));
        assert!(e.is_fresh(1_499));
        assert!(!e.is_fresh(1_500));
    }

    #[tokio::test]
    async fn memory_entry_expires_after_ttl() {
        let clock = Arc::new(ManualClock::new(10_000));
        let cache = MemoryCache::new(clock.clone());
        cache.set("k", "v".into(), Duration::from_millis(1_000)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

        clock.advance(Duration::from_millis(1_100));
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn memory_set_replaces_and_delete_removes() {
        let cache = MemoryCache::new(Arc::new(ManualClock::new(0)));
        cache.set("k", "old".into(), Duration::from_secs(10)).await.unwrap();
        cache.set("k", "new".into(), Duration::from_secs(10)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("new"));
        assert!(cache.delete("k").await.unwrap());
        assert!(!cache.delete("k").await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_purge_drops_only_expired() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = MemoryCache::new(clock.clone());
        cache.set("short", "a".into(), Duration::from_millis(10)).await.unwrap();
        cache.set("long", "b".into(), Duration::from_secs(10)).await.unwrap();
        clock.advance(Duration::from_millis(20));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn memory_writes_prune_entries_nobody_reads_again() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = MemoryCache::new(clock.clone());
        for i in 0..50 {
            cache.set(&format!("old/{i}"), "x".into(), Duration::from_secs(1)).await.unwrap();
        }
        clock.advance(Duration::from_secs(2));
        cache.set("fresh", "y".into(), Duration::from_secs(1)).await.unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("fresh").await.unwrap().as_deref(), Some("y"));
    }

    #[tokio::test]
    async fn file_cache_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("details.json");
        let clock = Arc::new(ManualClock::new(0));

        let cache = FileCache::with_clock(&path, clock.clone());
        cache.set("k", "v".into(), Duration::from_millis(1_000)).await.unwrap();

        let reopened = FileCache::with_clock(&path, clock.clone());
        assert_eq!(reopened.get("k").await.unwrap().as_deref(), Some("v"));
        clock.advance(Duration::from_millis(1_100));
        assert_eq!(reopened.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_file_reads_as_miss_and_is_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("details.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let cache = FileCache::with_clock(&path, Arc::new(ManualClock::new(0)));
        assert_eq!(cache.get("k").await.unwrap(), None);
        cache.set("k", "v".into(), Duration::from_secs(1)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

        cache.clear().await.unwrap();
        assert!(!path.exists());
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
