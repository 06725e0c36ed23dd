use pagemill_cache::{HtmlCacheConfig, SiteCacheConfig};
use pagemill_detect::DetectorConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Process-level configuration for the page-generation edge.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind: String,
    pub redis_url: Option<String>,
    pub html_cache_root: PathBuf,
    pub html_rescan_interval: Duration,
    pub site_cache_ttl: Duration,
    pub detector: DetectorConfig,
    /// Per-request deadline on the router.
    pub request_timeout: Duration,
    pub production: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            redis_url: Some("redis://127.0.0.1:6379".to_string()),
            html_cache_root: PathBuf::from("./html-cache"),
            html_rescan_interval: Duration::from_secs(600),
            site_cache_ttl: Duration::from_secs(300),
            detector: DetectorConfig::default(),
            request_timeout: Duration::from_secs(30),
            production: false,
        }
    }
}

impl AppConfig {
    /// Environment overrides on top of the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(redis) = std::env::var("PAGEMILL_REDIS_URL") {
            config.redis_url = if redis.is_empty() { None } else { Some(redis) };
        }
        if let Ok(root) = std::env::var("PAGEMILL_HTML_CACHE_ROOT") {
            config.html_cache_root = PathBuf::from(root);
        }
        if let Ok(env) = std::env::var("PAGEMILL_ENV") {
            config.production = env == "production";
        }
        config
    }

    pub fn html_cache(&self) -> HtmlCacheConfig {
        HtmlCacheConfig {
            root: self.html_cache_root.clone(),
            rescan_interval: self.html_rescan_interval,
        }
    }

    pub fn site_cache(&self) -> SiteCacheConfig {
        SiteCacheConfig {
            ttl: self.site_cache_ttl,
        }
    }
}
