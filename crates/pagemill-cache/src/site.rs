//! Domain-keyed site-configuration cache.
//!
//! Misses collapse into a single storage lookup per domain; when storage is
//! unavailable, expired entries are served best-effort and the cache reports
//! degraded mode.

use dashmap::DashMap;
use pagemill_types::ports::SiteStore;
use pagemill_types::{Result, SiteConfig};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct SiteCacheConfig {
    pub ttl: Duration,
}

impl Default for SiteCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
        }
    }
}

/// Hit/miss counters plus the degraded-mode flag.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SiteCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub degraded: bool,
}

struct CachedSite {
    // `None` caches an unregistered domain.
    config: Option<SiteConfig>,
    fetched_at: Instant,
}

pub struct SiteCache {
    store: Arc<dyn SiteStore>,
    config: SiteCacheConfig,
    entries: DashMap<String, CachedSite>,
    inflight: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    degraded: AtomicBool,
}

impl SiteCache {
    pub fn new(store: Arc<dyn SiteStore>, config: SiteCacheConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            config,
            entries: DashMap::new(),
            inflight: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            degraded: AtomicBool::new(false),
        })
    }

    /// Resolve one domain. `Ok(None)` means unregistered.
    pub async fn get(&self, domain: &str) -> Result<Option<SiteConfig>> {
        let domain = domain.to_lowercase();

        if let Some(entry) = self.entries.get(&domain) {
            if entry.fetched_at.elapsed() < self.config.ttl {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.config.clone());
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        // Single-flight: concurrent misses for one domain share one lookup.
        let flight = self
            .inflight
            .entry(domain.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = flight.lock().await;

        // Another flight may have refreshed while this one waited.
        if let Some(entry) = self.entries.get(&domain) {
            if entry.fetched_at.elapsed() < self.config.ttl {
                return Ok(entry.config.clone());
            }
        }

        match self.store.site_by_domain(&domain).await {
            Ok(config) => {
                self.degraded.store(false, Ordering::Relaxed);
                self.entries.insert(
                    domain.clone(),
                    CachedSite {
                        config: config.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                self.inflight.remove(&domain);
                debug!(domain = %domain, found = config.is_some(), "Site cache refreshed");
                Ok(config)
            }
            Err(e) => {
                self.inflight.remove(&domain);
                // Serve the stale entry rather than fail the request.
                if let Some(entry) = self.entries.get(&domain) {
                    warn!(domain = %domain, error = %e, "Storage unavailable, serving expired site entry");
                    self.degraded.store(true, Ordering::Relaxed);
                    return Ok(entry.config.clone());
                }
                Err(e)
            }
        }
    }

    /// Drop one entry after an admin mutation.
    pub fn invalidate(&self, domain: &str) {
        self.entries.remove(&domain.to_lowercase());
    }

    pub fn invalidate_all(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> SiteCacheStats {
        SiteCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
            degraded: self.degraded.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pagemill_types::{PagemillError, SiteStatus};
    use std::sync::atomic::AtomicUsize;

    struct CountingStore {
        lookups: AtomicUsize,
        fail: AtomicBool,
    }

    impl CountingStore {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                lookups: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            })
        }

        fn site(domain: &str) -> SiteConfig {
            SiteConfig {
                id: 1,
                site_group_id: 1,
                domain: domain.to_string(),
                template_name: "basic".into(),
                keyword_group_id: 1,
                image_group_id: 1,
                article_group_id: 1,
                baidu_token: None,
                analytics: None,
                status: SiteStatus::Enabled,
            }
        }
    }

    #[async_trait]
    impl SiteStore for CountingStore {
        async fn site_by_domain(&self, domain: &str) -> Result<Option<SiteConfig>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(PagemillError::db_connection("storage offline"));
            }
            if domain == "a.test" {
                Ok(Some(Self::site(domain)))
            } else {
                Ok(None)
            }
        }
    }

    #[tokio::test]
    async fn caches_hits_and_counts_stats() {
        let store = CountingStore::new();
        let cache = SiteCache::new(store.clone(), SiteCacheConfig::default());

        assert!(cache.get("a.test").await.unwrap().is_some());
        assert!(cache.get("A.TEST").await.unwrap().is_some());
        assert_eq!(store.lookups.load(Ordering::SeqCst), 1);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!(!stats.degraded);
    }

    #[tokio::test]
    async fn unknown_domains_are_cached_as_negative() {
        let store = CountingStore::new();
        let cache = SiteCache::new(store.clone(), SiteCacheConfig::default());

        assert!(cache.get("unknown.test").await.unwrap().is_none());
        assert!(cache.get("unknown.test").await.unwrap().is_none());
        assert_eq!(store.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let store = CountingStore::new();
        let cache = SiteCache::new(store.clone(), SiteCacheConfig::default());

        cache.get("a.test").await.unwrap();
        cache.invalidate("a.test");
        cache.get("a.test").await.unwrap();
        assert_eq!(store.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn storage_outage_serves_expired_entry_in_degraded_mode() {
        let store = CountingStore::new();
        let cache = SiteCache::new(
            store.clone(),
            SiteCacheConfig {
                ttl: Duration::from_millis(10),
            },
        );

        cache.get("a.test").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        store.fail.store(true, Ordering::SeqCst);

        let served = cache.get("a.test").await.unwrap();
        assert!(served.is_some());
        assert!(cache.stats().degraded);

        // A domain never seen before still surfaces the error.
        assert!(cache.get("never.test").await.is_err());
    }
}
