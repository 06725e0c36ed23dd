use crate::map_sqlx_error;
use crate::storage::PgStorage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pagemill_types::ports::VisitLogStore;
use pagemill_types::{PeriodType, Result, RollupRow, VisitRecord};
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::debug;

fn visit_from_row(row: &PgRow) -> std::result::Result<VisitRecord, sqlx::Error> {
    let status: i32 = row.try_get("status")?;
    let resp_time_ms: i64 = row.try_get("resp_time_ms")?;
    Ok(VisitRecord {
        domain: row.try_get("domain")?,
        path: row.try_get("path")?,
        spider_type: row.try_get("spider_type")?,
        status: status as u16,
        resp_time_ms: resp_time_ms.max(0) as u64,
        user_agent: row.try_get("user_agent")?,
        remote_ip: row.try_get("remote_ip")?,
        created_at: row.try_get("created_at")?,
    })
}

fn rollup_from_row(row: &PgRow) -> std::result::Result<RollupRow, sqlx::Error> {
    let period: String = row.try_get("period_type")?;
    let period_type = match period.as_str() {
        "minute" => PeriodType::Minute,
        "hour" => PeriodType::Hour,
        _ => PeriodType::Day,
    };
    let total: i64 = row.try_get("total")?;
    let s2: i64 = row.try_get("status_2xx")?;
    let s3: i64 = row.try_get("status_3xx")?;
    let s4: i64 = row.try_get("status_4xx")?;
    let s5: i64 = row.try_get("status_5xx")?;
    Ok(RollupRow {
        period_type,
        period_start: row.try_get("period_start")?,
        spider_type: row.try_get("spider_type")?,
        total: total.max(0) as u64,
        status_2xx: s2.max(0) as u64,
        status_3xx: s3.max(0) as u64,
        status_4xx: s4.max(0) as u64,
        status_5xx: s5.max(0) as u64,
        avg_resp_time: row.try_get("avg_resp_time")?,
    })
}

#[async_trait]
impl VisitLogStore for PgStorage {
    async fn insert_visit(&self, visit: &VisitRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO spider_logs \
             (domain, path, spider_type, status, resp_time_ms, user_agent, remote_ip, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&visit.domain)
        .bind(&visit.path)
        .bind(&visit.spider_type)
        .bind(visit.status as i32)
        .bind(visit.resp_time_ms as i64)
        .bind(&visit.user_agent)
        .bind(&visit.remote_ip)
        .bind(visit.created_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn visits_between(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<VisitRecord>> {
        let rows = sqlx::query(
            "SELECT domain, path, spider_type, status, resp_time_ms, user_agent, remote_ip, \
             created_at FROM spider_logs WHERE created_at >= $1 AND created_at < $2",
        )
        .bind(from)
        .bind(until)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|r| visit_from_row(r).map_err(map_sqlx_error))
            .collect()
    }

    async fn insert_rollups(&self, rows: &[RollupRow]) -> Result<u64> {
        let mut written = 0u64;
        for row in rows {
            let result = sqlx::query(
                "INSERT INTO spider_logs_stats \
                 (period_type, period_start, spider_type, total, status_2xx, status_3xx, \
                  status_4xx, status_5xx, avg_resp_time) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                 ON CONFLICT (period_type, period_start, spider_type) DO NOTHING",
            )
            .bind(row.period_type.as_str())
            .bind(row.period_start)
            .bind(&row.spider_type)
            .bind(row.total as i64)
            .bind(row.status_2xx as i64)
            .bind(row.status_3xx as i64)
            .bind(row.status_4xx as i64)
            .bind(row.status_5xx as i64)
            .bind(row.avg_resp_time)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
            written += result.rows_affected();
        }
        debug!(candidates = rows.len(), written, "Rollup batch inserted");
        Ok(written)
    }

    async fn rollups(
        &self,
        period: PeriodType,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<RollupRow>> {
        let rows = sqlx::query(
            "SELECT period_type, period_start, spider_type, total, status_2xx, status_3xx, \
             status_4xx, status_5xx, avg_resp_time FROM spider_logs_stats \
             WHERE period_type = $1 AND period_start >= $2 \
             ORDER BY period_start DESC LIMIT $3",
        )
        .bind(period.as_str())
        .bind(since)
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|r| rollup_from_row(r).map_err(map_sqlx_error))
            .collect()
    }

    async fn prune_raw_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM spider_logs WHERE created_at < $1")
            .bind(cutoff)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }
}
