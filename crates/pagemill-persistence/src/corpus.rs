use crate::map_sqlx_error;
use crate::storage::PgStorage;
use async_trait::async_trait;
use pagemill_types::ports::CorpusStore;
use pagemill_types::{ArticleGroup, ImageGroup, KeywordGroup, Result};
use sqlx::postgres::PgRow;
use sqlx::Row;

fn group_parts(row: &PgRow) -> std::result::Result<(i64, String, bool), sqlx::Error> {
    let is_default: i16 = row.try_get("is_default")?;
    Ok((
        row.try_get("id")?,
        row.try_get("name")?,
        is_default == 1,
    ))
}

async fn strings_for_group(
    storage: &PgStorage,
    sql: &str,
    group_id: i64,
) -> Result<Vec<String>> {
    let rows = sqlx::query(sql)
        .bind(group_id)
        .fetch_all(storage.pool())
        .await
        .map_err(map_sqlx_error)?;

    rows.iter()
        .map(|r| r.try_get::<String, _>(0).map_err(map_sqlx_error))
        .collect()
}

#[async_trait]
impl CorpusStore for PgStorage {
    async fn keyword_groups(&self) -> Result<Vec<KeywordGroup>> {
        let rows = sqlx::query("SELECT id, name, is_default FROM keyword_groups")
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        rows.iter()
            .map(|r| {
                let (id, name, is_default) = group_parts(r).map_err(map_sqlx_error)?;
                Ok(KeywordGroup {
                    id,
                    name,
                    is_default,
                })
            })
            .collect()
    }

    async fn keywords(&self, group_id: i64) -> Result<Vec<String>> {
        strings_for_group(
            self,
            "SELECT keyword FROM keywords WHERE group_id = $1",
            group_id,
        )
        .await
    }

    async fn image_groups(&self) -> Result<Vec<ImageGroup>> {
        let rows = sqlx::query("SELECT id, name, is_default FROM image_groups")
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        rows.iter()
            .map(|r| {
                let (id, name, is_default) = group_parts(r).map_err(map_sqlx_error)?;
                Ok(ImageGroup {
                    id,
                    name,
                    is_default,
                })
            })
            .collect()
    }

    async fn images(&self, group_id: i64) -> Result<Vec<String>> {
        strings_for_group(
            self,
            "SELECT url FROM images WHERE group_id = $1",
            group_id,
        )
        .await
    }

    async fn article_groups(&self) -> Result<Vec<ArticleGroup>> {
        let rows = sqlx::query("SELECT id, name, is_default FROM article_groups")
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        rows.iter()
            .map(|r| {
                let (id, name, is_default) = group_parts(r).map_err(map_sqlx_error)?;
                Ok(ArticleGroup {
                    id,
                    name,
                    is_default,
                })
            })
            .collect()
    }

    async fn articles(&self, group_id: i64) -> Result<Vec<String>> {
        strings_for_group(
            self,
            "SELECT body FROM original_articles WHERE group_id = $1 AND status = 1",
            group_id,
        )
        .await
    }

    async fn emojis(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT symbol FROM emojis")
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        rows.iter()
            .map(|r| r.try_get::<String, _>(0).map_err(map_sqlx_error))
            .collect()
    }
}
