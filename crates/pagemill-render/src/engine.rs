//! Compiled-template cache and the page renderer.
//!
//! Templates are compiled once per `(site_group_id, name, version)` and
//! memoized on a shared handlebars registry whose helpers are bound to the
//! pools at construction time.

use crate::analyzer::analyze_template;
use crate::helpers::register_pool_helpers;
use dashmap::DashMap;
use handlebars::template::Template;
use handlebars::Handlebars;
use pagemill_pool::{ConsumablePools, ReusablePools};
use pagemill_types::ports::TemplateStore;
use pagemill_types::{
    PagemillError, Result, SiteConfig, TemplateAnalysis, TemplateRecord, TemplateStatus,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Data bound into one render. The title is popped once by page assembly,
/// so repeated `{{title}}` references within a render agree.
#[derive(Debug, Clone, Serialize)]
pub struct PageData {
    pub title: String,
    #[serde(rename = "articleContent")]
    pub article_content: String,
    pub domain: String,
    pub path: String,
    pub keyword_group_id: i64,
    pub image_group_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analytics: Option<String>,
}

/// Cached compilation result.
#[derive(Debug, Clone)]
pub struct CompiledMeta {
    pub version: i32,
    pub analysis: TemplateAnalysis,
    registry_name: String,
}

/// Template cache plus renderer, sharing one helper-bound registry.
pub struct RenderEngine {
    store: Arc<dyn TemplateStore>,
    registry: RwLock<Handlebars<'static>>,
    compiled: DashMap<(i64, String), CompiledMeta>,
    analysis_max: RwLock<TemplateAnalysis>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RenderEngine {
    pub fn new(
        store: Arc<dyn TemplateStore>,
        consumables: &Arc<ConsumablePools>,
        reusables: &Arc<ReusablePools>,
    ) -> Arc<Self> {
        let mut registry = Handlebars::new();
        register_pool_helpers(&mut registry, consumables, reusables);

        Arc::new(Self {
            store,
            registry: RwLock::new(registry),
            compiled: DashMap::new(),
            analysis_max: RwLock::new(TemplateAnalysis::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Fetch-or-compile, memoized by `(site_group_id, name)`.
    pub async fn get_or_compile(&self, site_group_id: i64, name: &str) -> Result<CompiledMeta> {
        let key = (site_group_id, name.to_string());
        if let Some(meta) = self.compiled.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(meta.clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let record = self
            .store
            .template(site_group_id, name)
            .await?
            .filter(|t| t.status == TemplateStatus::Enabled)
            .ok_or(PagemillError::TemplateNotFound {
                site_group_id,
                name: name.to_string(),
            })?;

        let meta = self.compile_record(&record)?;
        self.compiled.insert(key, meta.clone());
        Ok(meta)
    }

    /// Re-fetch one template; recompiles only when the stored version moved.
    pub async fn refresh(&self, site_group_id: i64, name: &str) -> Result<()> {
        let key = (site_group_id, name.to_string());
        let Some(record) = self.store.template(site_group_id, name).await? else {
            self.invalidate(site_group_id, name);
            return Ok(());
        };

        let stale = self
            .compiled
            .get(&key)
            .map(|meta| meta.version != record.version)
            .unwrap_or(true);
        if stale {
            let meta = self.compile_record(&record)?;
            self.compiled.insert(key, meta);
            info!(
                site_group_id,
                template = name,
                version = record.version,
                "Template recompiled"
            );
        }
        Ok(())
    }

    /// Drop one cached compilation.
    pub fn invalidate(&self, site_group_id: i64, name: &str) {
        if let Some((_, meta)) = self.compiled.remove(&(site_group_id, name.to_string())) {
            self.registry
                .write()
                .unregister_template(&meta.registry_name);
        }
    }

    /// Per-helper maximum across all active templates.
    pub fn global_max(&self) -> TemplateAnalysis {
        *self.analysis_max.read()
    }

    /// Recompute the global max from every active template.
    pub async fn recompute_global_max(&self) -> Result<TemplateAnalysis> {
        let mut max = TemplateAnalysis::default();
        for record in self.store.active_templates().await? {
            let template = Template::compile(&record.content).map_err(|e| {
                PagemillError::internal(format!(
                    "template {}/{} failed to compile: {e}",
                    record.site_group_id, record.name
                ))
            })?;
            max = max.max(analyze_template(&template));
        }
        *self.analysis_max.write() = max;
        debug!(?max, "Template analysis global max recomputed");
        Ok(max)
    }

    /// Render one page against a compiled template.
    pub async fn render_page(&self, site: &SiteConfig, data: &PageData) -> Result<String> {
        let meta = self
            .get_or_compile(site.site_group_id, &site.template_name)
            .await?;
        self.registry
            .read()
            .render(&meta.registry_name, data)
            .map_err(|e| PagemillError::internal(format!("render failed: {e}")))
    }

    pub fn cache_stats(&self) -> (u64, u64, usize) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.compiled.len(),
        )
    }

    fn compile_record(&self, record: &TemplateRecord) -> Result<CompiledMeta> {
        let template = Template::compile(&record.content).map_err(|e| {
            PagemillError::internal(format!(
                "template {}/{} failed to compile: {e}",
                record.site_group_id, record.name
            ))
        })?;
        let analysis = analyze_template(&template);

        let registry_name = format!("{}:{}:v{}", record.site_group_id, record.name, record.version);
        self.registry
            .write()
            .register_template(&registry_name, template);

        // Fold this template into the global max so sizing reacts to new
        // templates without waiting for a full recompute.
        {
            let mut max = self.analysis_max.write();
            *max = max.max(analysis);
        }

        debug!(
            site_group_id = record.site_group_id,
            template = %record.name,
            version = record.version,
            ?analysis,
            "Template compiled and analyzed"
        );

        Ok(CompiledMeta {
            version: record.version,
            analysis,
            registry_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pagemill_pool::{ProducerSet, EMOJI_GROUP};
    use pagemill_types::ports::CorpusStore;
    use pagemill_types::{
        ArticleGroup, CachePoolConfig, ImageGroup, KeywordGroup, PoolTuning, SiteStatus,
    };
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::time::Duration;

    struct MemoryTemplates {
        templates: Mutex<HashMap<(i64, String), TemplateRecord>>,
    }

    impl MemoryTemplates {
        fn with(records: Vec<TemplateRecord>) -> Arc<Self> {
            Arc::new(Self {
                templates: Mutex::new(
                    records
                        .into_iter()
                        .map(|r| ((r.site_group_id, r.name.clone()), r))
                        .collect(),
                ),
            })
        }
    }

    #[async_trait]
    impl TemplateStore for MemoryTemplates {
        async fn template(&self, site_group_id: i64, name: &str) -> Result<Option<TemplateRecord>> {
            Ok(self
                .templates
                .lock()
                .get(&(site_group_id, name.to_string()))
                .cloned())
        }

        async fn active_templates(&self) -> Result<Vec<TemplateRecord>> {
            Ok(self
                .templates
                .lock()
                .values()
                .filter(|t| t.status == TemplateStatus::Enabled)
                .cloned()
                .collect())
        }
    }

    struct NoCorpus;

    #[async_trait]
    impl CorpusStore for NoCorpus {
        async fn keyword_groups(&self) -> Result<Vec<KeywordGroup>> {
            Ok(Vec::new())
        }
        async fn keywords(&self, _: i64) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn image_groups(&self) -> Result<Vec<ImageGroup>> {
            Ok(Vec::new())
        }
        async fn images(&self, _: i64) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn article_groups(&self) -> Result<Vec<ArticleGroup>> {
            Ok(Vec::new())
        }
        async fn articles(&self, _: i64) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn emojis(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn record(name: &str, content: &str, version: i32) -> TemplateRecord {
        TemplateRecord {
            id: 1,
            site_group_id: 1,
            name: name.to_string(),
            content: content.to_string(),
            version,
            status: TemplateStatus::Enabled,
        }
    }

    fn site() -> SiteConfig {
        SiteConfig {
            id: 1,
            site_group_id: 1,
            domain: "a.test".into(),
            template_name: "basic".into(),
            keyword_group_id: 1,
            image_group_id: 1,
            article_group_id: 1,
            baidu_token: None,
            analytics: None,
            status: SiteStatus::Enabled,
        }
    }

    fn data() -> PageData {
        PageData {
            title: "seo✨site".into(),
            article_content: "hello world".into(),
            domain: "a.test".into(),
            path: "/".into(),
            keyword_group_id: 1,
            image_group_id: 1,
            analytics: None,
        }
    }

    async fn pools() -> (Arc<ConsumablePools>, Arc<ReusablePools>) {
        let reusables = Arc::new(ReusablePools::new(Arc::new(NoCorpus)));
        reusables
            .keywords
            .replace(1, vec!["seo".into(), "site".into(), "rank".into()])
            .await;
        reusables.keywords.set_default_group(Some(1));
        reusables
            .images
            .replace(1, vec!["https://img.test/a.png".into()])
            .await;
        reusables.emojis.replace(EMOJI_GROUP, vec!["✨".into()]).await;
        reusables.articles.replace(1, vec!["hello world".into()]).await;
        reusables.articles.set_default_group(Some(1));

        let fast = PoolTuning {
            pool_size: 100,
            workers: 1,
            refill_interval_ms: 10,
            threshold_ratio: 0.5,
        };
        let config = CachePoolConfig {
            title: fast,
            content: fast,
            cls: fast,
            url: fast,
            keyword_emoji: fast,
            ..Default::default()
        };
        let producers = ProducerSet::new(reusables.clone());
        let consumables = Arc::new(ConsumablePools::start(&producers, &config).await.unwrap());

        // Let the refill workers warm every ring.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while tokio::time::Instant::now() < deadline {
            if !consumables.content.is_empty() && !consumables.cls.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        (consumables, reusables)
    }

    #[tokio::test]
    async fn renders_title_and_pooled_content() {
        let (consumables, reusables) = pools().await;
        let store = MemoryTemplates::with(vec![record(
            "basic",
            "<title>{{title}}</title><body>{{random_content}}</body>",
            1,
        )]);
        let engine = RenderEngine::new(store, &consumables, &reusables);

        let html = engine.render_page(&site(), &data()).await.unwrap();
        assert!(html.contains("<title>seo✨site</title>"));
        assert!(html.contains("<body>hello world</body>"));
    }

    #[tokio::test]
    async fn helpers_fall_back_instead_of_failing_the_render() {
        let (consumables, reusables) = pools().await;
        consumables.shutdown();
        let (cls_pool, kw_pool) = (consumables.cls.clone(), consumables.keyword_emoji.clone());
        while cls_pool.try_pop().is_some() {}
        while kw_pool.try_pop().is_some() {}
        tokio::time::sleep(Duration::from_millis(50)).await;
        while cls_pool.try_pop().is_some() {}
        while kw_pool.try_pop().is_some() {}

        let store = MemoryTemplates::with(vec![record(
            "basic",
            "<i class=\"{{cls}}\">{{keyword_with_emoji}}</i>",
            1,
        )]);
        let engine = RenderEngine::new(store, &consumables, &reusables);

        let html = engine.render_page(&site(), &data()).await.unwrap();
        assert!(html.contains("class=\"a0\""));
    }

    #[tokio::test]
    async fn missing_template_maps_to_template_not_found() {
        let (consumables, reusables) = pools().await;
        let store = MemoryTemplates::with(vec![]);
        let engine = RenderEngine::new(store, &consumables, &reusables);

        let err = engine.render_page(&site(), &data()).await.unwrap_err();
        assert!(matches!(err, PagemillError::TemplateNotFound { .. }));
    }

    #[tokio::test]
    async fn compilation_is_memoized_until_version_moves() {
        let (consumables, reusables) = pools().await;
        let store = MemoryTemplates::with(vec![record("basic", "v1 {{cls}}", 1)]);
        let engine = RenderEngine::new(store.clone(), &consumables, &reusables);

        engine.get_or_compile(1, "basic").await.unwrap();
        engine.get_or_compile(1, "basic").await.unwrap();
        let (hits, misses, entries) = engine.cache_stats();
        assert_eq!((hits, misses, entries), (1, 1, 1));

        // Bump the stored version; refresh recompiles.
        store
            .templates
            .lock()
            .insert((1, "basic".into()), record("basic", "v2 {{cls}}{{cls}}", 2));
        engine.refresh(1, "basic").await.unwrap();
        let meta = engine.get_or_compile(1, "basic").await.unwrap();
        assert_eq!(meta.version, 2);
        assert_eq!(meta.analysis.cls, 2);
    }

    #[tokio::test]
    async fn global_max_folds_across_templates() {
        let (consumables, reusables) = pools().await;
        let store = MemoryTemplates::with(vec![
            record("a", "{{cls}}{{cls}}{{cls}}", 1),
            record("b", "{{random_url}}{{random_url}}", 1),
        ]);
        let engine = RenderEngine::new(store, &consumables, &reusables);

        let max = engine.recompute_global_max().await.unwrap();
        assert_eq!(max.cls, 3);
        assert_eq!(max.random_url, 2);
        assert_eq!(engine.global_max(), max);
    }
}
