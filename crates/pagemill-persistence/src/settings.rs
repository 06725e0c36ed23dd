use crate::map_sqlx_error;
use crate::storage::PgStorage;
use async_trait::async_trait;
use pagemill_types::ports::{PoolConfigStore, SettingsStore};
use pagemill_types::{CachePoolConfig, PagemillError, Result, SystemSettings};
use sqlx::Row;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Row id of the single persisted pool-config record.
const POOL_CONFIG_ID: i64 = 1;

#[async_trait]
impl PoolConfigStore for PgStorage {
    async fn load_pool_config(&self) -> Result<Option<CachePoolConfig>> {
        let row = sqlx::query("SELECT config FROM pool_config WHERE id = $1")
            .bind(POOL_CONFIG_ID)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let raw: serde_json::Value = row.try_get("config").map_err(map_sqlx_error)?;
        let config: CachePoolConfig = serde_json::from_value(raw)
            .map_err(|e| PagemillError::pool_invalid(format!("stored pool config: {e}")))?;
        config.validate()?;
        Ok(Some(config))
    }

    async fn save_pool_config(&self, config: &CachePoolConfig) -> Result<()> {
        config.validate()?;
        let raw = serde_json::to_value(config)
            .map_err(|e| PagemillError::internal(format!("encode pool config: {e}")))?;

        sqlx::query(
            "INSERT INTO pool_config (id, config, updated_at) VALUES ($1, $2, NOW()) \
             ON CONFLICT (id) DO UPDATE SET config = EXCLUDED.config, updated_at = NOW()",
        )
        .bind(POOL_CONFIG_ID)
        .bind(raw)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        debug!("Pool configuration persisted");
        Ok(())
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value, "true" | "1" | "yes" | "on")
}

#[async_trait]
impl SettingsStore for PgStorage {
    async fn load_settings(&self) -> Result<SystemSettings> {
        let rows = sqlx::query("SELECT key, value FROM system_settings")
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        let mut kv = HashMap::new();
        for row in &rows {
            let key: String = row.try_get("key").map_err(map_sqlx_error)?;
            let value: String = row.try_get("value").map_err(map_sqlx_error)?;
            kv.insert(key, value);
        }

        let mut settings = SystemSettings::default();
        for (key, value) in &kv {
            match key.as_str() {
                "api_token_enabled" => settings.api_token_enabled = parse_bool(value),
                "api_token" => settings.api_token = Some(value.clone()),
                "return_404_for_non_spider" => {
                    settings.return_404_for_non_spider = parse_bool(value)
                }
                "verify_spider_dns" => settings.verify_spider_dns = parse_bool(value),
                "processor.enabled" => settings.processor.enabled = parse_bool(value),
                "processor.concurrency" => {
                    if let Ok(v) = value.parse() {
                        settings.processor.concurrency = v;
                    }
                }
                "processor.retry_max" => {
                    if let Ok(v) = value.parse() {
                        settings.processor.retry_max = v;
                    }
                }
                "processor.min_paragraph_length" => {
                    if let Ok(v) = value.parse() {
                        settings.processor.min_paragraph_length = v;
                    }
                }
                "processor.batch_size" => {
                    if let Ok(v) = value.parse() {
                        settings.processor.batch_size = v;
                    }
                }
                // The recognized set is closed; unknown keys are ignored with
                // a warning rather than rejected, so forward-written rows do
                // not brick startup.
                other => warn!(key = %other, "Ignoring unrecognized system setting"),
            }
        }

        settings.validate()?;
        Ok(settings)
    }

    async fn save_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO system_settings (key, value) VALUES ($1, $2) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(key)
        .bind(value)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}
