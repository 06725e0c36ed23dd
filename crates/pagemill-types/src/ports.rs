//! Backend-agnostic storage interfaces.
//!
//! The core never assumes a specific engine; these traits are the storage
//! contract, implemented by `pagemill-persistence` against a relational
//! database and by in-memory fixtures in tests.

use crate::config::{CachePoolConfig, SystemSettings};
use crate::error::Result;
use crate::model::{
    ArticleGroup, ImageGroup, KeywordGroup, PeriodType, RollupRow, SiteConfig, TemplateRecord,
    VisitRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Site-configuration lookups keyed by domain.
#[async_trait]
pub trait SiteStore: Send + Sync {
    /// Fetch one site by its lower-case domain. `None` when unregistered.
    async fn site_by_domain(&self, domain: &str) -> Result<Option<SiteConfig>>;
}

/// Template source lookups keyed by `(site_group_id, name)`.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn template(&self, site_group_id: i64, name: &str) -> Result<Option<TemplateRecord>>;

    /// All enabled templates; feeds the analyzer's global max.
    async fn active_templates(&self) -> Result<Vec<TemplateRecord>>;
}

/// Corpus reads backing the reusable pools.
#[async_trait]
pub trait CorpusStore: Send + Sync {
    async fn keyword_groups(&self) -> Result<Vec<KeywordGroup>>;
    async fn keywords(&self, group_id: i64) -> Result<Vec<String>>;
    async fn image_groups(&self) -> Result<Vec<ImageGroup>>;
    async fn images(&self, group_id: i64) -> Result<Vec<String>>;
    async fn article_groups(&self) -> Result<Vec<ArticleGroup>>;
    async fn articles(&self, group_id: i64) -> Result<Vec<String>>;
    async fn emojis(&self) -> Result<Vec<String>>;
}

/// Pool-configuration persistence; the reload bus round-trips through this.
#[async_trait]
pub trait PoolConfigStore: Send + Sync {
    async fn load_pool_config(&self) -> Result<Option<CachePoolConfig>>;
    async fn save_pool_config(&self, config: &CachePoolConfig) -> Result<()>;
}

/// Key/value system settings.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load_settings(&self) -> Result<SystemSettings>;
    async fn save_setting(&self, key: &str, value: &str) -> Result<()>;
}

/// Raw spider-visit stream plus its rolled-up aggregates.
#[async_trait]
pub trait VisitLogStore: Send + Sync {
    async fn insert_visit(&self, visit: &VisitRecord) -> Result<()>;

    async fn visits_between(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<VisitRecord>>;

    /// Idempotent batch insert; returns the number of rows actually written.
    async fn insert_rollups(&self, rows: &[RollupRow]) -> Result<u64>;

    async fn rollups(
        &self,
        period: PeriodType,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<RollupRow>>;

    /// Delete raw rows older than the retention horizon; returns rows removed.
    async fn prune_raw_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}
