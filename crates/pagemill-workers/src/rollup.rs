//! Minute/hour/day rollups over the raw spider-log stream.
//!
//! Bucketing is pure so it is testable without storage; chart queries walk
//! the granularity chain downwards when a coarser rollup has no rows yet.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Timelike, Utc};
use pagemill_types::ports::VisitLogStore;
use pagemill_types::{PeriodType, Result, RollupRow, VisitRecord};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Windows and retention for the periodic rollup task.
#[derive(Debug, Clone)]
pub struct RollupConfig {
    /// How far back each pass re-buckets raw rows.
    pub window: Duration,
    /// Raw rows older than this are pruned.
    pub retention: Duration,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(3600),
            retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Truncate a timestamp to its bucket start.
fn bucket_start(at: DateTime<Utc>, period: PeriodType) -> DateTime<Utc> {
    let naive = at.naive_utc();
    let truncated = match period {
        PeriodType::Minute => naive
            .date()
            .and_hms_opt(naive.hour(), naive.minute(), 0)
            .expect("valid minute bucket"),
        PeriodType::Hour => naive
            .date()
            .and_hms_opt(naive.hour(), 0, 0)
            .expect("valid hour bucket"),
        PeriodType::Day => naive.date().and_hms_opt(0, 0, 0).expect("valid day bucket"),
    };
    Utc.from_utc_datetime(&truncated)
}

#[derive(Default)]
struct Accumulator {
    total: u64,
    status_2xx: u64,
    status_3xx: u64,
    status_4xx: u64,
    status_5xx: u64,
    resp_time_sum: u64,
}

impl Accumulator {
    fn add(&mut self, visit: &VisitRecord) {
        self.total += 1;
        self.resp_time_sum += visit.resp_time_ms;
        // Inclusive lower bounds per status class.
        match visit.status {
            200..=299 => self.status_2xx += 1,
            300..=399 => self.status_3xx += 1,
            400..=499 => self.status_4xx += 1,
            _ => self.status_5xx += 1,
        }
    }

    fn into_row(
        self,
        period_type: PeriodType,
        period_start: DateTime<Utc>,
        spider_type: Option<String>,
    ) -> RollupRow {
        let avg = if self.total > 0 {
            self.resp_time_sum as f64 / self.total as f64
        } else {
            0.0
        };
        RollupRow {
            period_type,
            period_start,
            spider_type,
            total: self.total,
            status_2xx: self.status_2xx,
            status_3xx: self.status_3xx,
            status_4xx: self.status_4xx,
            status_5xx: self.status_5xx,
            avg_resp_time: avg,
        }
    }
}

/// Bucket raw visits into rollup rows: one row per `(bucket, spider_type)`
/// plus an all-spiders row per bucket.
pub fn rollup_visits(visits: &[VisitRecord], period: PeriodType) -> Vec<RollupRow> {
    let mut buckets: BTreeMap<(DateTime<Utc>, Option<String>), Accumulator> = BTreeMap::new();

    for visit in visits {
        let start = bucket_start(visit.created_at, period);
        buckets
            .entry((start, Some(visit.spider_type.clone())))
            .or_default()
            .add(visit);
        buckets.entry((start, None)).or_default().add(visit);
    }

    buckets
        .into_iter()
        .map(|((start, spider_type), acc)| acc.into_row(period, start, spider_type))
        .collect()
}

/// Run one rollup pass for every granularity and prune expired raw rows.
/// Returns `(rollup rows written, raw rows pruned)`.
pub async fn run_rollup_pass(
    store: &dyn VisitLogStore,
    config: &RollupConfig,
) -> Result<(u64, u64)> {
    let now = Utc::now();
    let window = ChronoDuration::from_std(config.window).unwrap_or(ChronoDuration::hours(1));
    let visits = store.visits_between(now - window, now).await?;

    let mut written = 0u64;
    for period in [PeriodType::Minute, PeriodType::Hour, PeriodType::Day] {
        let rows = rollup_visits(&visits, period);
        if !rows.is_empty() {
            written += store.insert_rollups(&rows).await?;
        }
    }

    let retention =
        ChronoDuration::from_std(config.retention).unwrap_or(ChronoDuration::days(7));
    let pruned = store.prune_raw_before(now - retention).await?;

    debug!(raw = visits.len(), written, pruned, "Rollup pass completed");
    Ok((written, pruned))
}

/// Chart-series query with graceful granularity fallback: an empty result
/// at the requested period falls through to the next finer one, bottoming
/// out at an empty series rather than an error.
pub async fn chart_series(
    store: &dyn VisitLogStore,
    period: PeriodType,
    since: DateTime<Utc>,
    limit: u32,
) -> Result<(PeriodType, Vec<RollupRow>)> {
    let mut current = Some(period);
    while let Some(period) = current {
        let rows = store.rollups(period, since, limit).await?;
        if !rows.is_empty() {
            return Ok((period, rows));
        }
        current = period.finer();
    }
    Ok((PeriodType::Minute, Vec::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    fn visit(minute: u32, second: u32, spider: &str, status: u16, ms: u64) -> VisitRecord {
        VisitRecord {
            domain: "a.test".into(),
            path: "/".into(),
            spider_type: spider.into(),
            status,
            resp_time_ms: ms,
            user_agent: "ua".into(),
            remote_ip: None,
            created_at: Utc
                .with_ymd_and_hms(2026, 8, 1, 10, minute, second)
                .unwrap(),
        }
    }

    #[test]
    fn minute_rollup_groups_by_bucket_and_spider() {
        let visits = vec![
            visit(5, 10, "googlebot", 200, 10),
            visit(5, 40, "googlebot", 404, 30),
            visit(5, 50, "bingbot", 200, 20),
            visit(6, 0, "googlebot", 200, 50),
        ];
        let rows = rollup_visits(&visits, PeriodType::Minute);

        // Two buckets × (per-spider rows + totals row).
        let googlebot_5: &RollupRow = rows
            .iter()
            .find(|r| {
                r.spider_type.as_deref() == Some("googlebot") && r.period_start.minute() == 5
            })
            .unwrap();
        assert_eq!(googlebot_5.total, 2);
        assert_eq!(googlebot_5.status_2xx, 1);
        assert_eq!(googlebot_5.status_4xx, 1);
        assert!((googlebot_5.avg_resp_time - 20.0).abs() < f64::EPSILON);

        let all_5 = rows
            .iter()
            .find(|r| r.spider_type.is_none() && r.period_start.minute() == 5)
            .unwrap();
        assert_eq!(all_5.total, 3);

        let all_6 = rows
            .iter()
            .find(|r| r.spider_type.is_none() && r.period_start.minute() == 6)
            .unwrap();
        assert_eq!(all_6.total, 1);
    }

    #[test]
    fn day_rollup_collapses_everything_into_one_bucket() {
        let visits = vec![
            visit(5, 0, "googlebot", 200, 10),
            visit(30, 0, "bingbot", 500, 20),
        ];
        let rows = rollup_visits(&visits, PeriodType::Day);
        let all = rows.iter().find(|r| r.spider_type.is_none()).unwrap();
        assert_eq!(all.total, 2);
        assert_eq!(all.status_5xx, 1);
        assert_eq!(all.period_start.hour(), 0);
    }

    #[derive(Default)]
    struct StatsStore {
        rows: Mutex<Vec<RollupRow>>,
    }

    #[async_trait]
    impl VisitLogStore for StatsStore {
        async fn insert_visit(&self, _: &VisitRecord) -> Result<()> {
            Ok(())
        }
        async fn visits_between(
            &self,
            _: DateTime<Utc>,
            _: DateTime<Utc>,
        ) -> Result<Vec<VisitRecord>> {
            Ok(Vec::new())
        }
        async fn insert_rollups(&self, rows: &[RollupRow]) -> Result<u64> {
            self.rows.lock().extend(rows.iter().cloned());
            Ok(rows.len() as u64)
        }
        async fn rollups(
            &self,
            period: PeriodType,
            _: DateTime<Utc>,
            _: u32,
        ) -> Result<Vec<RollupRow>> {
            Ok(self
                .rows
                .lock()
                .iter()
                .filter(|r| r.period_type == period)
                .cloned()
                .collect())
        }
        async fn prune_raw_before(&self, _: DateTime<Utc>) -> Result<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn chart_query_falls_back_day_to_hour_to_minute_to_empty() {
        let store = StatsStore::default();
        let since = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();

        // Empty store: the chain bottoms out, never errors.
        let (_, rows) = chart_series(&store, PeriodType::Day, since, 100).await.unwrap();
        assert!(rows.is_empty());

        // Only minute rows exist: a day query lands on minute granularity.
        let minute_rows = rollup_visits(&[visit(5, 0, "googlebot", 200, 10)], PeriodType::Minute);
        store.insert_rollups(&minute_rows).await.unwrap();

        let (granularity, rows) = chart_series(&store, PeriodType::Day, since, 100).await.unwrap();
        assert_eq!(granularity, PeriodType::Minute);
        assert!(!rows.is_empty());

        // Hour rows appear: the day query now stops at hour.
        let hour_rows = rollup_visits(&[visit(5, 0, "googlebot", 200, 10)], PeriodType::Hour);
        store.insert_rollups(&hour_rows).await.unwrap();

        let (granularity, _) = chart_series(&store, PeriodType::Day, since, 100).await.unwrap();
        assert_eq!(granularity, PeriodType::Hour);
    }
}
