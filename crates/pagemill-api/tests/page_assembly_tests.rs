//! End-to-end tests for the page-assembly surface over in-memory storage.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Utc};
use pagemill_api::{build_router, AppConfig, AppState, StorageHandles};
use pagemill_types::ports::{
    CorpusStore, PoolConfigStore, SettingsStore, SiteStore, TemplateStore, VisitLogStore,
};
use pagemill_types::{
    ArticleGroup, CachePoolConfig, ImageGroup, KeywordGroup, PeriodType, PoolTuning, Result,
    RollupRow, SiteConfig, SiteStatus, SystemSettings, TemplateRecord, TemplateStatus,
    VisitRecord,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower::ServiceExt;

/// In-memory implementation of the whole storage contract.
#[derive(Default)]
struct MemoryStorage {
    sites: Mutex<HashMap<String, SiteConfig>>,
    templates: Mutex<HashMap<(i64, String), TemplateRecord>>,
    keywords: Mutex<HashMap<i64, Vec<String>>>,
    articles: Mutex<HashMap<i64, Vec<String>>>,
    pool_config: Mutex<Option<CachePoolConfig>>,
    visits: Mutex<Vec<VisitRecord>>,
}

#[async_trait]
impl SiteStore for MemoryStorage {
    async fn site_by_domain(&self, domain: &str) -> Result<Option<SiteConfig>> {
        Ok(self.sites.lock().get(domain).cloned())
    }
}

#[async_trait]
impl TemplateStore for MemoryStorage {
    async fn template(&self, site_group_id: i64, name: &str) -> Result<Option<TemplateRecord>> {
        Ok(self
            .templates
            .lock()
            .get(&(site_group_id, name.to_string()))
            .cloned())
    }

    async fn active_templates(&self) -> Result<Vec<TemplateRecord>> {
        Ok(self.templates.lock().values().cloned().collect())
    }
}

#[async_trait]
impl CorpusStore for MemoryStorage {
    async fn keyword_groups(&self) -> Result<Vec<KeywordGroup>> {
        Ok(self
            .keywords
            .lock()
            .keys()
            .map(|id| KeywordGroup {
                id: *id,
                name: format!("g{id}"),
                is_default: *id == 1,
            })
            .collect())
    }
    async fn keywords(&self, group_id: i64) -> Result<Vec<String>> {
        Ok(self
            .keywords
            .lock()
            .get(&group_id)
            .cloned()
            .unwrap_or_default())
    }
    async fn image_groups(&self) -> Result<Vec<ImageGroup>> {
        Ok(Vec::new())
    }
    async fn images(&self, _: i64) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
    async fn article_groups(&self) -> Result<Vec<ArticleGroup>> {
        Ok(self
            .articles
            .lock()
            .keys()
            .map(|id| ArticleGroup {
                id: *id,
                name: format!("a{id}"),
                is_default: *id == 1,
            })
            .collect())
    }
    async fn articles(&self, group_id: i64) -> Result<Vec<String>> {
        Ok(self
            .articles
            .lock()
            .get(&group_id)
            .cloned()
            .unwrap_or_default())
    }
    async fn emojis(&self) -> Result<Vec<String>> {
        Ok(vec!["✨".to_string(), "🔥".to_string()])
    }
}

#[async_trait]
impl PoolConfigStore for MemoryStorage {
    async fn load_pool_config(&self) -> Result<Option<CachePoolConfig>> {
        Ok(self.pool_config.lock().clone())
    }
    async fn save_pool_config(&self, config: &CachePoolConfig) -> Result<()> {
        *self.pool_config.lock() = Some(config.clone());
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for MemoryStorage {
    async fn load_settings(&self) -> Result<SystemSettings> {
        Ok(SystemSettings::default())
    }
    async fn save_setting(&self, _: &str, _: &str) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl VisitLogStore for MemoryStorage {
    async fn insert_visit(&self, visit: &VisitRecord) -> Result<()> {
        self.visits.lock().push(visit.clone());
        Ok(())
    }
    async fn visits_between(
        &self,
        _: DateTime<Utc>,
        _: DateTime<Utc>,
    ) -> Result<Vec<VisitRecord>> {
        Ok(self.visits.lock().clone())
    }
    async fn insert_rollups(&self, _: &[RollupRow]) -> Result<u64> {
        Ok(0)
    }
    async fn rollups(&self, _: PeriodType, _: DateTime<Utc>, _: u32) -> Result<Vec<RollupRow>> {
        Ok(Vec::new())
    }
    async fn prune_raw_before(&self, _: DateTime<Utc>) -> Result<u64> {
        Ok(0)
    }
}

fn fast_tuning() -> PoolTuning {
    PoolTuning {
        pool_size: 100,
        workers: 1,
        refill_interval_ms: 10,
        threshold_ratio: 0.5,
    }
}

fn seeded_storage() -> Arc<MemoryStorage> {
    let storage = Arc::new(MemoryStorage::default());
    storage.sites.lock().insert(
        "a.test".to_string(),
        SiteConfig {
            id: 1,
            site_group_id: 1,
            domain: "a.test".to_string(),
            template_name: "basic".to_string(),
            keyword_group_id: 1,
            image_group_id: 1,
            article_group_id: 1,
            baidu_token: None,
            analytics: None,
            status: SiteStatus::Enabled,
        },
    );
    storage.templates.lock().insert(
        (1, "basic".to_string()),
        TemplateRecord {
            id: 1,
            site_group_id: 1,
            name: "basic".to_string(),
            content: "<title>{{title}}</title><body>{{random_content}}</body>".to_string(),
            version: 1,
            status: TemplateStatus::Enabled,
        },
    );
    storage
        .keywords
        .lock()
        .insert(1, vec!["seo".into(), "site".into(), "rank".into()]);
    storage
        .articles
        .lock()
        .insert(1, vec!["hello world".into()]);
    *storage.pool_config.lock() = Some(CachePoolConfig {
        title: fast_tuning(),
        content: fast_tuning(),
        cls: fast_tuning(),
        url: fast_tuning(),
        keyword_emoji: fast_tuning(),
        ..Default::default()
    });
    storage
}

async fn test_state(storage: Arc<MemoryStorage>) -> (AppState, watch::Sender<bool>) {
    let dir = tempfile::tempdir().expect("temp cache root");
    let mut config = AppConfig::default();
    config.html_cache_root = dir.keep();
    config.redis_url = None;

    let handles = StorageHandles {
        sites: storage.clone(),
        templates: storage.clone(),
        corpus: storage.clone(),
        pool_config: storage.clone(),
        settings: storage.clone(),
        visits: storage,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = AppState::build(config, handles, None, shutdown_rx)
        .await
        .expect("state builds");

    // Let the producers warm the rings before requests arrive.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if !state.consumables.title.is_empty() && !state.consumables.content.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    (state, shutdown_tx)
}

async fn get(router: &axum::Router, uri: &str) -> (StatusCode, String) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&bytes).to_string())
}

#[tokio::test]
async fn spider_request_renders_page() {
    let (state, _shutdown_guard) = test_state(seeded_storage()).await;
    let router = build_router(state);

    let (status, body) = get(
        &router,
        "/page?ua=Googlebot/2.1&domain=a.test&path=/",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<title>"), "no title in {body}");
    assert!(!body.contains("<title></title>"), "empty title in {body}");
    assert!(body.contains("<body>hello world</body>"), "body was {body}");
}

#[tokio::test]
async fn non_spider_gets_404() {
    let (state, _shutdown_guard) = test_state(seeded_storage()).await;
    let router = build_router(state);

    let (status, body) = get(
        &router,
        "/page?ua=Mozilla/5.0&domain=a.test&path=/",
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.is_empty());
}

#[tokio::test]
async fn unknown_domain_gets_403() {
    let (state, _shutdown_guard) = test_state(seeded_storage()).await;
    let router = build_router(state);

    let (status, body) = get(
        &router,
        "/page?ua=Googlebot/2.1&domain=unknown.test&path=/",
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body.contains("Domain not registered"), "body was {body}");
}

#[tokio::test]
async fn missing_domain_is_invalid_param() {
    let (state, _shutdown_guard) = test_state(seeded_storage()).await;
    let router = build_router(state);

    let (status, _) = get(&router, "/page?ua=Googlebot/2.1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn spider_visits_are_logged_asynchronously() {
    let storage = seeded_storage();
    let (state, _shutdown_guard) = test_state(storage.clone()).await;
    let router = build_router(state);

    get(&router, "/page?ua=Googlebot/2.1&domain=a.test&path=/").await;
    get(
        &router,
        "/page?ua=Googlebot/2.1&domain=unknown.test&path=/",
    )
    .await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while storage.visits.lock().len() < 2 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let visits = storage.visits.lock();
    assert_eq!(visits.len(), 2);
    assert!(visits.iter().any(|v| v.status == 200));
    assert!(visits.iter().any(|v| v.status == 403));
    assert!(visits.iter().all(|v| v.spider_type == "googlebot"));
}

#[tokio::test]
async fn rendered_pages_land_in_the_file_cache() {
    let (state, _shutdown_guard) = test_state(seeded_storage()).await;
    let html_cache = state.html_cache.clone();
    let router = build_router(state);

    get(&router, "/page?ua=Googlebot/2.1&domain=a.test&path=/").await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let stats = html_cache.rescan().await.unwrap();
        if stats.entries == 1 || tokio::time::Instant::now() >= deadline {
            assert_eq!(stats.entries, 1);
            assert!(stats.bytes > 0);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn saved_pool_config_round_trips_and_applies_live() {
    let storage = seeded_storage();
    let (state, _shutdown_guard) = test_state(storage.clone()).await;

    let mut config = storage.pool_config.lock().clone().unwrap();
    config.cls = PoolTuning {
        pool_size: 200_000,
        workers: 4,
        refill_interval_ms: 200,
        threshold_ratio: 0.3,
    };

    let outcome = state.save_pool_config(&config).await.unwrap();
    assert!(outcome.saved);
    assert!(outcome.hot_applied);

    // Round trip through the store is exact.
    let loaded = storage.pool_config.lock().clone().unwrap();
    assert_eq!(loaded, config);

    // Live pools pick the new geometry up within the 2s budget.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let stats = state.consumables.cls.stats().await;
        if (stats.capacity == 200_000 && stats.workers == 4)
            || tokio::time::Instant::now() >= deadline
        {
            assert_eq!(stats.capacity, 200_000);
            assert_eq!(stats.workers, 4);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn invalid_pool_config_is_rejected() {
    let (state, _shutdown_guard) = test_state(seeded_storage()).await;
    let mut config = CachePoolConfig::default();
    config.cls.pool_size = 10;
    assert!(state.save_pool_config(&config).await.is_err());
}

#[tokio::test]
async fn corpus_reload_exposes_new_keywords() {
    let storage = seeded_storage();
    let (state, _shutdown_guard) = test_state(storage.clone()).await;

    storage.keywords.lock().get_mut(&1).unwrap().push("xyz".into());
    state
        .reusables
        .reload_group(pagemill_types::ReusableKind::Keyword, 1)
        .await
        .unwrap();

    let group = state.reusables.keywords.get_all(1).unwrap();
    assert!(group.raw.contains(&"xyz".to_string()));
}

#[tokio::test]
async fn health_metrics_and_alerts_endpoints_respond() {
    let (state, _shutdown_guard) = test_state(seeded_storage()).await;
    let router = build_router(state);

    let (status, body) = get(&router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("\"status\":\"ok\""));

    let (status, body) = get(&router, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("\"pools\""));
    assert!(body.contains("\"system\""));
    assert!(body.contains("\"html_cache\""));

    let (status, body) = get(&router, "/metrics/history?limit=5").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("\"frames\""));

    let (status, body) = get(&router, "/alerts?limit=10").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("\"alerts\""));
}
