use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Live counters behind the per-spider stats stream.
#[derive(Default)]
struct Counters {
    total: AtomicU64,
    status_2xx: AtomicU64,
    status_3xx: AtomicU64,
    status_4xx: AtomicU64,
    status_5xx: AtomicU64,
    resp_time_ms_sum: AtomicU64,
}

/// Point-in-time view for one spider type.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SpiderTallySnapshot {
    pub spider_type: String,
    pub total: u64,
    pub status_2xx: u64,
    pub status_3xx: u64,
    pub status_4xx: u64,
    pub status_5xx: u64,
    pub avg_resp_time_ms: f64,
}

/// In-memory visit tallies keyed by spider type, updated on every served
/// request and streamed at 1 Hz.
#[derive(Default)]
pub struct VisitTally {
    by_spider: DashMap<String, Arc<Counters>>,
}

impl VisitTally {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, spider_type: &str, status: u16, resp_time_ms: u64) {
        let counters = self
            .by_spider
            .entry(spider_type.to_string())
            .or_default()
            .clone();

        counters.total.fetch_add(1, Ordering::Relaxed);
        counters
            .resp_time_ms_sum
            .fetch_add(resp_time_ms, Ordering::Relaxed);
        // Status classes are inclusive lower bounds.
        let bucket = match status {
            200..=299 => &counters.status_2xx,
            300..=399 => &counters.status_3xx,
            400..=499 => &counters.status_4xx,
            _ => &counters.status_5xx,
        };
        bucket.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, spider_type: &str) -> SpiderTallySnapshot {
        let Some(counters) = self.by_spider.get(spider_type) else {
            return SpiderTallySnapshot {
                spider_type: spider_type.to_string(),
                ..Default::default()
            };
        };
        let total = counters.total.load(Ordering::Relaxed);
        let sum = counters.resp_time_ms_sum.load(Ordering::Relaxed);
        SpiderTallySnapshot {
            spider_type: spider_type.to_string(),
            total,
            status_2xx: counters.status_2xx.load(Ordering::Relaxed),
            status_3xx: counters.status_3xx.load(Ordering::Relaxed),
            status_4xx: counters.status_4xx.load(Ordering::Relaxed),
            status_5xx: counters.status_5xx.load(Ordering::Relaxed),
            avg_resp_time_ms: if total > 0 { sum as f64 / total as f64 } else { 0.0 },
        }
    }

    pub fn spider_types(&self) -> Vec<String> {
        self.by_spider.iter().map(|e| e.key().clone()).collect()
    }
}
