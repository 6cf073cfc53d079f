//! In-process cache of listings, file metadata and download URLs.
//!
//! Entries expire after a fixed TTL (checked on read and by a periodic
//! sweep). Mutations evict by key prefix; each eviction bumps an epoch so a
//! read-through fetch that raced it can skip inserting stale data.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use log::debug;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::types::{DownloadUrl, DriveFile, FileList, OrderDirection};

/// Download links closer than this to expiry are treated as misses.
const DOWNLOAD_URL_MIN_REMAINING_SECS: i64 = 3600;

/// Cache key builders.
pub mod keys {
    use super::OrderDirection;

    pub fn listing(folder_id: &str, marker: &str, order_by: &str, direction: OrderDirection) -> String {
        format!("{}:{}:{}:{}", folder_id, marker, order_by, direction.as_str())
    }

    pub fn file(file_id: &str) -> String {
        file_id.to_string()
    }

    pub fn download_url(file_id: &str) -> String {
        format!("{}:url", file_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    Listing(FileList),
    File(DriveFile),
    DownloadUrl(DownloadUrl),
}

#[derive(Debug, Clone)]
struct Entry {
    value: CacheValue,
    inserted: Instant,
}

pub struct TransferCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, Entry>>,
    epoch: AtomicU64,
}

impl TransferCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Current eviction epoch. Capture before a fetch, pass to
    /// [`TransferCache::set_if_unchanged`] after it.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub async fn get(&self, key: &str) -> Option<CacheValue> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if entry.inserted.elapsed() >= self.ttl {
            return None;
        }
        Some(entry.value.clone())
    }

    pub async fn get_listing(&self, key: &str) -> Option<FileList> {
        match self.get(key).await? {
            CacheValue::Listing(l) => Some(l),
            _ => None,
        }
    }

    pub async fn get_file(&self, file_id: &str) -> Option<DriveFile> {
        match self.get(&keys::file(file_id)).await? {
            CacheValue::File(f) => Some(f),
            _ => None,
        }
    }

    /// Hit only if the link stays valid for more than another hour.
    pub async fn get_download_url(&self, file_id: &str) -> Option<DownloadUrl> {
        match self.get(&keys::download_url(file_id)).await? {
            CacheValue::DownloadUrl(u) => {
                let expiration = u.expiration?;
                if expiration - Utc::now() > chrono::Duration::seconds(DOWNLOAD_URL_MIN_REMAINING_SECS) {
                    Some(u)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    pub async fn set(&self, key: impl Into<String>, value: CacheValue) {
        self.entries.write().await.insert(
            key.into(),
            Entry {
                value,
                inserted: Instant::now(),
            },
        );
    }

    /// Insert only if no eviction happened since `epoch` was observed.
    pub async fn set_if_unchanged(&self, key: impl Into<String>, value: CacheValue, epoch: u64) -> bool {
        let mut entries = self.entries.write().await;
        if self.epoch.load(Ordering::Acquire) != epoch {
            return false;
        }
        entries.insert(
            key.into(),
            Entry {
                value,
                inserted: Instant::now(),
            },
        );
        true
    }

    /// Remove every key starting with `prefix`. Returns the number removed.
    pub async fn evict_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        self.epoch.fetch_add(1, Ordering::AcqRel);
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Evicted {} cache entries with prefix {:?}", removed, prefix);
        }
        removed
    }

    /// Drop expired entries. Returns the number removed.
    pub async fn sweep(&self) -> usize {
        let ttl = self.ttl;
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.inserted.elapsed() < ttl);
        before - entries.len()
    }

    /// Stored entries, expired or not.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Periodic sweep. Ends when `cancel` fires or the cache is dropped.
pub fn spawn_sweeper(
    cache: &Arc<TransferCache>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let weak: Weak<TransferCache> = Arc::downgrade(cache);
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(cache) = weak.upgrade() else { break };
                    let n = cache.sweep().await;
                    if n > 0 {
                        debug!("Cache sweep removed {} expired entries", n);
                    }
                }
            }
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
