use crate::dns;
use chrono::{Duration as ChronoDuration, Utc};
use hickory_resolver::TokioAsyncResolver;
use lru::LruCache;
use pagemill_types::{SpiderDetection, SpiderKind};
use parking_lot::Mutex;
use serde::Serialize;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// The detector only ever examines this many leading bytes of a user agent.
const UA_MAX_BYTES: usize = 500;

/// Detector tuning.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// How long a verdict stays valid.
    pub ttl: Duration,
    /// Bounded verdict cache size.
    pub cache_size: usize,
    /// Attempt reverse-DNS verification for candidates.
    pub verify_dns: bool,
    /// Whether an unverified candidate still counts as a spider.
    pub count_unverified: bool,
    /// Per-lookup DNS timeout.
    pub dns_timeout: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            cache_size: 4096,
            verify_dns: false,
            count_unverified: true,
            dns_timeout: Duration::from_secs(3),
        }
    }
}

/// Hit/miss counters exposed to telemetry.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DetectorStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub verifications: u64,
}

/// Classifies user agents and caches the verdicts.
///
/// Instantiated once at startup and shared by reference; nothing here is
/// lazily initialized on the request path.
pub struct SpiderDetector {
    config: DetectorConfig,
    cache: Mutex<LruCache<String, SpiderDetection>>,
    resolver: Option<TokioAsyncResolver>,
    hits: AtomicU64,
    misses: AtomicU64,
    verifications: AtomicU64,
}

impl SpiderDetector {
    pub fn new(config: DetectorConfig) -> Arc<Self> {
        let capacity =
            NonZeroUsize::new(config.cache_size.max(1)).expect("cache size is at least 1");
        let resolver = if config.verify_dns {
            dns::system_resolver()
        } else {
            None
        };

        Arc::new(Self {
            config,
            cache: Mutex::new(LruCache::new(capacity)),
            resolver,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            verifications: AtomicU64::new(0),
        })
    }

    /// Classify one request. Never fails; DNS trouble degrades to an
    /// unverified verdict.
    pub async fn detect(self: &Arc<Self>, user_agent: &str, peer_ip: Option<IpAddr>) -> SpiderDetection {
        let key = truncate_ua(user_agent);
        let now = Utc::now();

        if let Some(cached) = self.cache_get(key) {
            if !cached.is_expired(now) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return cached;
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let ttl_expiry = now
            + ChronoDuration::from_std(self.config.ttl)
                .unwrap_or_else(|_| ChronoDuration::seconds(3600));

        let Some(kind) = classify(key) else {
            let verdict = SpiderDetection::negative(ttl_expiry);
            self.cache_put(key, verdict.clone());
            return verdict;
        };

        let verdict = SpiderDetection {
            is_spider: self.config.count_unverified || !self.config.verify_dns,
            spider_type: Some(kind),
            dns_verified: false,
            ttl_expiry,
        };
        self.cache_put(key, verdict.clone());
        debug!(
            spider = kind.name(),
            is_spider = verdict.is_spider,
            "Spider candidate classified"
        );

        // Verification runs off the request path; a confirmed candidate
        // upgrades the cached verdict for the rest of the TTL window.
        if self.config.verify_dns {
            if let (Some(resolver), Some(ip)) = (self.resolver.clone(), peer_ip) {
                let detector = self.clone();
                let key = key.to_string();
                tokio::spawn(async move {
                    detector.verifications.fetch_add(1, Ordering::Relaxed);
                    let verified =
                        dns::verify_spider_ip(&resolver, ip, kind, detector.config.dns_timeout)
                            .await;
                    if verified {
                        let mut cache = detector.cache.lock();
                        if let Some(entry) = cache.get_mut(&key) {
                            entry.dns_verified = true;
                            entry.is_spider = true;
                        }
                    }
                });
            }
        }

        verdict
    }

    /// Drop one cached verdict (admin-driven invalidation).
    pub fn invalidate(&self, user_agent: &str) {
        self.cache.lock().pop(truncate_ua(user_agent));
    }

    pub fn stats(&self) -> DetectorStats {
        DetectorStats {
            cache_hits: self.hits.load(Ordering::Relaxed),
            cache_misses: self.misses.load(Ordering::Relaxed),
            verifications: self.verifications.load(Ordering::Relaxed),
        }
    }

    fn cache_get(&self, key: &str) -> Option<SpiderDetection> {
        self.cache.lock().get(key).cloned()
    }

    fn cache_put(&self, key: &str, verdict: SpiderDetection) {
        self.cache.lock().put(key.to_string(), verdict);
    }
}

/// Trim to the 500-byte budget without splitting a UTF-8 sequence.
fn truncate_ua(user_agent: &str) -> &str {
    let trimmed = user_agent.trim();
    if trimmed.len() <= UA_MAX_BYTES {
        return trimmed;
    }
    let mut end = UA_MAX_BYTES;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    &trimmed[..end]
}

/// Case-insensitive token scan across the known families.
fn classify(user_agent: &str) -> Option<SpiderKind> {
    let lower = user_agent.to_lowercase();
    SpiderKind::ALL
        .into_iter()
        .find(|kind| kind.ua_tokens().iter().any(|token| lower.contains(token)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> Arc<SpiderDetector> {
        SpiderDetector::new(DetectorConfig::default())
    }

    #[tokio::test]
    async fn classifies_known_crawlers() {
        let detector = detector();
        let verdict = detector
            .detect(
                "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)",
                None,
            )
            .await;
        assert!(verdict.is_spider);
        assert_eq!(verdict.spider_type, Some(SpiderKind::Googlebot));

        let verdict = detector
            .detect("Mozilla/5.0 (compatible; Baiduspider/2.0)", None)
            .await;
        assert_eq!(verdict.spider_type, Some(SpiderKind::Baiduspider));
    }

    #[tokio::test]
    async fn browsers_are_not_spiders_and_are_cached() {
        let detector = detector();
        let ua = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

        let verdict = detector.detect(ua, None).await;
        assert!(!verdict.is_spider);
        assert_eq!(detector.stats().cache_misses, 1);

        // Second scan is a cache hit, including for negatives.
        let verdict = detector.detect(ua, None).await;
        assert!(!verdict.is_spider);
        assert_eq!(detector.stats().cache_hits, 1);
    }

    #[tokio::test]
    async fn identical_uas_yield_identical_verdicts_within_ttl() {
        let detector = detector();
        let ua = "Googlebot/2.1";
        let first = detector.detect(ua, None).await;
        for _ in 0..10 {
            let again = detector.detect(ua, None).await;
            assert_eq!(again.is_spider, first.is_spider);
            assert_eq!(again.spider_type, first.spider_type);
            assert_eq!(again.ttl_expiry, first.ttl_expiry);
        }
    }

    #[tokio::test]
    async fn expired_entries_are_reclassified() {
        let detector = SpiderDetector::new(DetectorConfig {
            ttl: Duration::from_millis(10),
            ..DetectorConfig::default()
        });
        let ua = "bingbot/2.0";
        let first = detector.detect(ua, None).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let second = detector.detect(ua, None).await;
        assert!(second.ttl_expiry > first.ttl_expiry);
        assert_eq!(detector.stats().cache_misses, 2);
    }

    #[tokio::test]
    async fn oversized_ua_is_truncated_on_a_char_boundary() {
        let detector = detector();
        let mut ua = "Googlebot/2.1 ".to_string();
        ua.push_str(&"é".repeat(600));
        let verdict = detector.detect(&ua, None).await;
        assert!(verdict.is_spider);
    }

    #[tokio::test]
    async fn unverified_candidates_do_not_count_when_so_configured() {
        let detector = SpiderDetector::new(DetectorConfig {
            verify_dns: true,
            count_unverified: false,
            ..DetectorConfig::default()
        });
        let verdict = detector.detect("Googlebot/2.1", None).await;
        assert!(!verdict.is_spider);
        assert_eq!(verdict.spider_type, Some(SpiderKind::Googlebot));
        assert!(!verdict.dns_verified);
    }
}
