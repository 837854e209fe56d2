//! Content-addressed TTL cache with three namespaces.
//!
//! Entries live under `<root>/<namespace>/<sha256(identifier)>.json` and
//! record their own write time. A read only counts as a hit while the entry
//! is younger than its namespace TTL; anything expired, unreadable or
//! corrupted is a miss. Cache failures are logged and never surface as
//! errors.
//!
//! Operations on the same key are serialized through a per-key async lock,
//! so concurrent fetch and enrichment tasks cannot observe a half-written
//! entry or race two writes against each other.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::fs;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

/// Logical cache partition with its own TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Raw feed documents, keyed by feed URL.
    Feed,
    /// Extracted page text, keyed by article URL.
    Page,
    /// Enriched records, keyed by article URL.
    Enrichment,
}

impl Namespace {
    pub const ALL: [Namespace; 3] = [Namespace::Feed, Namespace::Page, Namespace::Enrichment];

    pub fn ttl(self) -> Duration {
        match self {
            Namespace::Feed => Duration::hours(1),
            Namespace::Page => Duration::hours(6),
            Namespace::Enrichment => Duration::days(7),
        }
    }

    pub fn dir_name(self) -> &'static str {
        match self {
            Namespace::Feed => "feed",
            Namespace::Page => "page",
            Namespace::Enrichment => "enrichment",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Result of sweeping one namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub removed: usize,
    pub bytes_freed: u64,
}

#[derive(Serialize, Deserialize)]
struct StoredEntry<T> {
    key: String,
    written_at: DateTime<Utc>,
    payload: T,
}

/// Only the write time; lets the sweep check freshness without knowing the payload type.
#[derive(Deserialize)]
struct EntryHeader {
    written_at: DateTime<Utc>,
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Holds the per-key lock; dropping it prunes the lock table.
struct KeyGuard<'a> {
    store: &'a CacheStore,
    path: PathBuf,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.store.release(&self.path);
    }
}

pub struct CacheStore {
    root: PathBuf,
    clock: Clock,
    locks: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore").field("root", &self.root).finish()
    }
}

impl CacheStore {
    /// Open a store rooted at `root`. Namespace directories are created on
    /// demand; failing to create them only disables caching.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self::with_clock(root, Arc::new(Utc::now))
    }

    pub fn with_clock(root: impl Into<PathBuf>, clock: Clock) -> Self {
        let root = root.into();
        for ns in Namespace::ALL {
            if let Err(e) = std::fs::create_dir_all(root.join(ns.dir_name())) {
                warn!(namespace = %ns, error = %e, "Failed to create cache directory");
            }
        }
        Self {
            root,
            clock,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn entry_path(&self, ns: Namespace, identifier: &str) -> PathBuf {
        let digest = Sha256::digest(identifier.as_bytes());
        self.root
            .join(ns.dir_name())
            .join(format!("{:x}.json", digest))
    }

    fn lock_table(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<AsyncMutex<()>>>> {
        match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn lock(&self, path: &Path) -> KeyGuard<'_> {
        let lock = Arc::clone(
            self.lock_table()
                .entry(path.to_path_buf())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        );
        KeyGuard {
            store: self,
            path: path.to_path_buf(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Forget the lock of `path` once nobody holds or waits for it.
    fn release(&self, path: &Path) {
        let mut locks = self.lock_table();
        if locks.get(path).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(path);
        }
    }

    fn is_fresh(&self, ns: Namespace, written_at: DateTime<Utc>) -> bool {
        (self.clock)() - written_at <= ns.ttl()
    }

    /// Fresh payload for `identifier`, or `None` on any kind of miss.
    pub async fn get<T: DeserializeOwned>(&self, ns: Namespace, identifier: &str) -> Option<T> {
        let path = self.entry_path(ns, identifier);
        let _guard = self.lock(&path).await;

        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(_) => return None,
        };
        let entry: StoredEntry<T> = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(namespace = %ns, %identifier, error = %e, "Unreadable cache entry; treating as miss");
                return None;
            }
        };
        if !self.is_fresh(ns, entry.written_at) {
            debug!(namespace = %ns, %identifier, "Cache entry expired");
            return None;
        }
        debug!(namespace = %ns, %identifier, "Cache hit");
        Some(entry.payload)
    }

    /// Store `payload` for `identifier`, stamped with the current time.
    pub async fn put<T: Serialize>(&self, ns: Namespace, identifier: &str, payload: &T) {
        let path = self.entry_path(ns, identifier);
        let entry = StoredEntry {
            key: identifier.to_string(),
            written_at: (self.clock)(),
            payload,
        };
        let json = match serde_json::to_vec(&entry) {
            Ok(json) => json,
            Err(e) => {
                warn!(namespace = %ns, %identifier, error = %e, "Failed to serialize cache entry");
                return;
            }
        };

        let _guard = self.lock(&path).await;
        let tmp = path.with_extension("json.tmp");
        let written: std::io::Result<()> = async {
            fs::write(&tmp, &json).await?;
            fs::rename(&tmp, &path).await
        }
        .await;
        match written {
            Ok(()) => debug!(namespace = %ns, %identifier, "Cache entry saved"),
            Err(e) => warn!(namespace = %ns, %identifier, error = %e, "Failed to save cache entry"),
        }
    }

    /// Delete every expired or unreadable entry of `ns`.
    #[instrument(level = "info", skip(self), fields(namespace = %ns))]
    pub async fn sweep_expired(&self, ns: Namespace) -> SweepStats {
        let dir = self.root.join(ns.dir_name());
        let mut stats = SweepStats::default();

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Failed to list cache directory");
                return stats;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read cache directory entry");
                    break;
                }
            };
            let path = entry.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some("json") => {}
                Some("tmp") => {
                    // Left behind by an interrupted write.
                    let _guard = self.lock(&path.with_extension("")).await;
                    let size = fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
                    if fs::remove_file(&path).await.is_ok() {
                        stats.removed += 1;
                        stats.bytes_freed += size;
                    }
                    continue;
                }
                _ => continue,
            }

            let _guard = self.lock(&path).await;
            let Ok(raw) = fs::read(&path).await else {
                continue;
            };
            let expired = match serde_json::from_slice::<EntryHeader>(&raw) {
                Ok(header) => !self.is_fresh(ns, header.written_at),
                Err(_) => true,
            };
            if !expired {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => {
                    stats.removed += 1;
                    stats.bytes_freed += raw.len() as u64;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove expired entry"),
            }
        }

        if stats.removed > 0 {
            info!(
                removed = stats.removed,
                bytes_freed = stats.bytes_freed,
                "Expired cache entries removed"
            );
        } else {
            debug!("No expired cache entries");
        }
        stats
    }

    /// Sweep all namespaces; run once per pipeline invocation.
    pub async fn sweep_all(&self) -> Vec<(Namespace, SweepStats)> {
        let mut out = Vec::with_capacity(Namespace::ALL.len());
        for ns in Namespace::ALL {
            out.push((ns, self.sweep_expired(ns).await));
        }
        out
    }
}
