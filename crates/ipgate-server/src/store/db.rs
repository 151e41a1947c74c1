use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::model::{merge_fixed, AllowEntry, AllowlistDocument, FixedIps};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("serialize allowlist: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

struct CachedList {
    entries: Vec<AllowEntry>,
    expires_at: Option<Instant>,
}

impl CachedList {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |exp| now < exp)
    }
}

struct Inner {
    path: PathBuf,
    fixed: FixedIps,
    /// `None` keeps cached lists until the next write.
    ttl: Option<Duration>,
    cache: RwLock<Option<CachedList>>,
    writes: Mutex<()>,
}

/// File-backed allowlist with a read-through, write-through TTL cache.
///
/// Cheap to clone; all clones share one cache and one file.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl Store {
    /// Opens the store at `path`. The file is not touched until the first
    /// read or write. A zero `ttl` disables expiry.
    pub fn open(path: impl Into<PathBuf>, fixed: FixedIps, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                path: path.into(),
                fixed,
                ttl: (!ttl.is_zero()).then_some(ttl),
                cache: RwLock::new(None),
                writes: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn fixed(&self) -> &FixedIps {
        &self.inner.fixed
    }

    /// Returns the allowlist merged with the fixed IPs.
    ///
    /// Served from the cache while it is fresh; otherwise the document is
    /// re-read. Read failures of any kind yield an empty document.
    pub async fn load(&self) -> Vec<AllowEntry> {
        let now = Instant::now();
        if let Some(cached) = self.inner.cache.read().await.as_ref() {
            if cached.is_fresh(now) {
                return cached.entries.clone();
            }
        }

        let document = self.read_document().await;
        let merged = merge_fixed(document.allowed_ips, &self.inner.fixed);
        self.fill(merged.clone()).await;
        debug!(count = merged.len(), "allowlist loaded from file and cached");
        merged
    }

    /// Entries as exposed to API callers: synthetic and fixed IPs removed.
    pub async fn load_visible(&self) -> Vec<AllowEntry> {
        self.load()
            .await
            .into_iter()
            .filter(|e| !e.synthetic && !self.inner.fixed.contains(&e.ip))
            .collect()
    }

    /// Overwrites the document with `entries` and refreshes the cache.
    ///
    /// Synthetic entries are dropped before writing. The file is replaced via
    /// rename, so readers see either the old or the new document.
    pub async fn replace(&self, entries: Vec<AllowEntry>) -> Result<(), StoreError> {
        let persisted: Vec<AllowEntry> = entries.into_iter().filter(|e| !e.synthetic).collect();
        let document = AllowlistDocument {
            allowed_ips: persisted,
        };
        let body = serde_json::to_string_pretty(&document)?;
        write_atomic(&self.inner.path, body.as_bytes()).await?;

        info!(
            path = %self.inner.path.display(),
            count = document.allowed_ips.len(),
            "allowlist file updated"
        );
        self.fill(merge_fixed(document.allowed_ips, &self.inner.fixed))
            .await;
        Ok(())
    }

    /// Serialises read-modify-write cycles. Hold the guard from the `load`
    /// that a mutation is based on until its `replace` returns.
    pub async fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.inner.writes.lock().await
    }

    /// Drops the cached list when it has expired. Returns true if evicted.
    pub async fn evict_expired(&self) -> bool {
        let mut slot = self.inner.cache.write().await;
        let expired = slot
            .as_ref()
            .is_some_and(|cached| !cached.is_fresh(Instant::now()));
        if expired {
            *slot = None;
        }
        expired
    }

    /// Spawns a background task that evicts the expired cache every `interval`.
    /// A zero interval spawns nothing and returns `None`.
    pub fn spawn_sweep(self, interval: Duration) -> Option<JoinHandle<()>> {
        if interval.is_zero() {
            debug!("sweep disabled: zero interval");
            return None;
        }
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if self.evict_expired().await {
                    debug!("sweep: evicted expired allowlist cache");
                }
            }
        }))
    }

    async fn fill(&self, entries: Vec<AllowEntry>) {
        let expires_at = self.inner.ttl.map(|ttl| Instant::now() + ttl);
        *self.inner.cache.write().await = Some(CachedList {
            entries,
            expires_at,
        });
    }

    async fn read_document(&self) -> AllowlistDocument {
        let path = &self.inner.path;
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %path.display(), "allowlist file not found; using an empty list");
                return AllowlistDocument::default();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "allowlist file unreadable; using an empty list");
                return AllowlistDocument::default();
            }
        };

        if raw.trim().is_empty() {
            warn!(path = %path.display(), "allowlist file is empty; using an empty list");
            return AllowlistDocument::default();
        }

        match serde_json::from_str::<AllowlistDocument>(&raw) {
            Ok(document) => document,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "allowlist file is not a valid document; using an empty list");
                AllowlistDocument::default()
            }
        }
    }
}

async fn write_atomic(path: &Path, body: &[u8]) -> Result<(), StoreError> {
    let write_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
    }

    let tmp = PathBuf::from(format!("{}.tmp", path.display()));
    tokio::fs::write(&tmp, body).await.map_err(write_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(write_err)
}
