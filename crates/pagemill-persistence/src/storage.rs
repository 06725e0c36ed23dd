use crate::config::DatabaseConfig;
use crate::map_sqlx_error;
use async_trait::async_trait;
use pagemill_types::ports::{SiteStore, TemplateStore};
use pagemill_types::{
    PagemillError, Result, SiteConfig, SiteStatus, TemplateRecord, TemplateStatus,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};

/// Storage adapter over a bounded Postgres connection pool.
///
/// One instance is shared process-wide; every port trait is implemented on
/// it so callers depend only on the interfaces they use.
#[derive(Clone)]
pub struct PgStorage {
    pub(crate) pool: PgPool,
}

impl PgStorage {
    /// Connect and build the bounded pool. On exhaustion the acquire timeout
    /// surfaces as a `DbConnection` error instead of waiting indefinitely.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| PagemillError::db_connection(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            "Connected to relational store"
        );

        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests, embedded setups).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn site_from_row(row: &PgRow) -> std::result::Result<SiteConfig, sqlx::Error> {
    let status: i16 = row.try_get("status")?;
    Ok(SiteConfig {
        id: row.try_get("id")?,
        site_group_id: row.try_get("site_group_id")?,
        domain: row.try_get("domain")?,
        template_name: row.try_get("template_name")?,
        keyword_group_id: row.try_get("keyword_group_id")?,
        image_group_id: row.try_get("image_group_id")?,
        article_group_id: row.try_get("article_group_id")?,
        baidu_token: row.try_get("baidu_token")?,
        analytics: row.try_get("analytics")?,
        status: if status == 1 {
            SiteStatus::Enabled
        } else {
            SiteStatus::Disabled
        },
    })
}

fn template_from_row(row: &PgRow) -> std::result::Result<TemplateRecord, sqlx::Error> {
    let status: i16 = row.try_get("status")?;
    Ok(TemplateRecord {
        id: row.try_get("id")?,
        site_group_id: row.try_get("site_group_id")?,
        name: row.try_get("name")?,
        content: row.try_get("content")?,
        version: row.try_get("version")?,
        status: if status == 1 {
            TemplateStatus::Enabled
        } else {
            TemplateStatus::Disabled
        },
    })
}

#[async_trait]
impl SiteStore for PgStorage {
    async fn site_by_domain(&self, domain: &str) -> Result<Option<SiteConfig>> {
        let row = sqlx::query(
            "SELECT id, site_group_id, domain, template_name, keyword_group_id, \
             image_group_id, article_group_id, baidu_token, analytics, status \
             FROM sites WHERE domain = $1",
        )
        .bind(domain)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        debug!(domain = %domain, found = row.is_some(), "Site lookup");
        row.map(|r| site_from_row(&r).map_err(map_sqlx_error))
            .transpose()
    }
}

#[async_trait]
impl TemplateStore for PgStorage {
    async fn template(&self, site_group_id: i64, name: &str) -> Result<Option<TemplateRecord>> {
        let row = sqlx::query(
            "SELECT id, site_group_id, name, content, version, status \
             FROM templates WHERE site_group_id = $1 AND name = $2",
        )
        .bind(site_group_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(|r| template_from_row(&r).map_err(map_sqlx_error))
            .transpose()
    }

    async fn active_templates(&self) -> Result<Vec<TemplateRecord>> {
        let rows = sqlx::query(
            "SELECT id, site_group_id, name, content, version, status \
             FROM templates WHERE status = 1",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|r| template_from_row(r).map_err(map_sqlx_error))
            .collect()
    }
}
