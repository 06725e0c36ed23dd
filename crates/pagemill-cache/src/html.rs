//! Rendered-HTML file cache.
//!
//! Pages land under `<root>/<hex2>/<hex64>` where the hex is the SHA-256 of
//! `domain \x00 path`. Writes are best-effort and never fail a request; the
//! reported aggregates converge within one rescan cycle.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pagemill_types::{PagemillError, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct HtmlCacheConfig {
    pub root: PathBuf,
    pub rescan_interval: Duration,
}

impl Default for HtmlCacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./html-cache"),
            rescan_interval: Duration::from_secs(600),
        }
    }
}

/// Aggregates exposed to operators.
#[derive(Debug, Clone, Serialize)]
pub struct HtmlCacheStats {
    pub entries: u64,
    pub bytes: u64,
    pub initialized: bool,
    pub scanning: bool,
    pub last_scan_at: Option<DateTime<Utc>>,
}

pub struct HtmlFileCache {
    config: HtmlCacheConfig,
    entries: AtomicU64,
    bytes: AtomicU64,
    initialized: AtomicBool,
    scanning: AtomicBool,
    last_scan_at: Mutex<Option<DateTime<Utc>>>,
    /// Serializes clear-all against itself and against rescans.
    maintenance: tokio::sync::Mutex<()>,
}

impl HtmlFileCache {
    pub fn new(config: HtmlCacheConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            entries: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            initialized: AtomicBool::new(false),
            scanning: AtomicBool::new(false),
            last_scan_at: Mutex::new(None),
            maintenance: tokio::sync::Mutex::new(()),
        })
    }

    pub fn rescan_interval(&self) -> Duration {
        self.config.rescan_interval
    }

    /// Cache file location for one `(domain, path)` pair.
    pub fn entry_path(&self, domain: &str, path: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(domain.as_bytes());
        hasher.update([0u8]);
        hasher.update(path.as_bytes());
        let digest = hex::encode(hasher.finalize());
        self.config.root.join(&digest[..2]).join(&digest)
    }

    /// Store one rendered page. Counter updates are approximate until the
    /// next rescan.
    pub async fn set(&self, domain: &str, path: &str, html: &str) -> Result<()> {
        let file_path = self.entry_path(domain, path);
        let parent = file_path
            .parent()
            .ok_or_else(|| PagemillError::internal("cache path has no parent"))?;

        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PagemillError::internal(format!("create cache dir: {e}")))?;

        let previous = tokio::fs::metadata(&file_path).await.ok().map(|m| m.len());

        tokio::fs::write(&file_path, html.as_bytes())
            .await
            .map_err(|e| PagemillError::internal(format!("write cache file: {e}")))?;

        match previous {
            Some(old_len) => {
                self.bytes.fetch_sub(old_len, Ordering::Relaxed);
                self.bytes.fetch_add(html.len() as u64, Ordering::Relaxed);
            }
            None => {
                self.entries.fetch_add(1, Ordering::Relaxed);
                self.bytes.fetch_add(html.len() as u64, Ordering::Relaxed);
            }
        }

        debug!(domain = %domain, path = %path, bytes = html.len(), "Rendered page cached");
        Ok(())
    }

    /// Walk the root and recompute entry count and total bytes.
    pub async fn rescan(&self) -> Result<HtmlCacheStats> {
        let _guard = self.maintenance.lock().await;
        self.scanning.store(true, Ordering::Release);

        let result = walk_totals(&self.config.root).await;

        self.scanning.store(false, Ordering::Release);
        let (entries, bytes) = result?;

        self.entries.store(entries, Ordering::Release);
        self.bytes.store(bytes, Ordering::Release);
        self.initialized.store(true, Ordering::Release);
        *self.last_scan_at.lock() = Some(Utc::now());

        info!(entries, bytes, "HTML cache rescan completed");
        Ok(self.stats())
    }

    /// Delete the whole tree and reset counters.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.maintenance.lock().await;

        match tokio::fs::remove_dir_all(&self.config.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(error = %e, "HTML cache clear failed");
                return Err(PagemillError::internal(format!("clear cache: {e}")));
            }
        }
        tokio::fs::create_dir_all(&self.config.root)
            .await
            .map_err(|e| PagemillError::internal(format!("recreate cache root: {e}")))?;

        self.entries.store(0, Ordering::Release);
        self.bytes.store(0, Ordering::Release);
        *self.last_scan_at.lock() = Some(Utc::now());
        info!("HTML cache cleared");
        Ok(())
    }

    pub fn stats(&self) -> HtmlCacheStats {
        HtmlCacheStats {
            entries: self.entries.load(Ordering::Acquire),
            bytes: self.bytes.load(Ordering::Acquire),
            initialized: self.initialized.load(Ordering::Acquire),
            scanning: self.scanning.load(Ordering::Acquire),
            last_scan_at: *self.last_scan_at.lock(),
        }
    }
}

/// Two-level walk matching the `<hex2>/<hex64>` layout.
async fn walk_totals(root: &Path) -> Result<(u64, u64)> {
    let mut entries = 0u64;
    let mut bytes = 0u64;

    let mut shards = match tokio::fs::read_dir(root).await {
        Ok(dir) => dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((0, 0)),
        Err(e) => return Err(PagemillError::internal(format!("read cache root: {e}"))),
    };

    while let Some(shard) = shards
        .next_entry()
        .await
        .map_err(|e| PagemillError::internal(format!("walk cache root: {e}")))?
    {
        let shard_path = shard.path();
        if !shard_path.is_dir() {
            continue;
        }
        let mut files = match tokio::fs::read_dir(&shard_path).await {
            Ok(dir) => dir,
            Err(e) => {
                warn!(shard = %shard_path.display(), error = %e, "Skipping unreadable cache shard");
                continue;
            }
        };
        while let Some(file) = files
            .next_entry()
            .await
            .map_err(|e| PagemillError::internal(format!("walk cache shard: {e}")))?
        {
            if let Ok(meta) = file.metadata().await {
                if meta.is_file() {
                    entries += 1;
                    bytes += meta.len();
                }
            }
        }
    }

    Ok((entries, bytes))
}
