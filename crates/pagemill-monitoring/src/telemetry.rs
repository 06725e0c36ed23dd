//! 1 Hz telemetry fanout.
//!
//! One ticker collects every pool's stats plus system stats and broadcasts
//! the frame; WebSocket handlers subscribe and forward. Laggy subscribers
//! miss frames instead of backpressuring the ticker.

use crate::system::{SystemStats, SystemStatsCollector};
use chrono::{DateTime, Utc};
use pagemill_pool::{ConsumablePools, ReusablePools};
use pagemill_types::{ConsumableKind, ReusableKind};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

/// History window backing `GET /metrics/history`.
const HISTORY_CAPACITY: usize = 300;

#[derive(Debug, Clone, Serialize)]
pub struct GroupSize {
    pub group_id: i64,
    pub size: usize,
}

/// One pool's appearance in a telemetry frame.
#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    pub name: String,
    pub kind: &'static str,
    pub size: usize,
    pub capacity: usize,
    pub memory_bytes: u64,
    pub workers: usize,
    pub threshold: f64,
    pub groups: Vec<GroupSize>,
}

/// Full 1 Hz frame.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub timestamp: DateTime<Utc>,
    pub pools: Vec<PoolSnapshot>,
    pub system: SystemStats,
}

/// Snapshot producer plus fanout channel and history ring.
pub struct TelemetryHub {
    consumables: Arc<ConsumablePools>,
    reusables: Arc<ReusablePools>,
    collector: SystemStatsCollector,
    sender: broadcast::Sender<Arc<TelemetrySnapshot>>,
    history: parking_lot::Mutex<VecDeque<Arc<TelemetrySnapshot>>>,
}

impl TelemetryHub {
    pub fn new(consumables: Arc<ConsumablePools>, reusables: Arc<ReusablePools>) -> Arc<Self> {
        let (sender, _) = broadcast::channel(8);
        Arc::new(Self {
            consumables,
            reusables,
            collector: SystemStatsCollector::new(),
            sender,
            history: parking_lot::Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
        })
    }

    /// Subscribe for live frames.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<TelemetrySnapshot>> {
        self.sender.subscribe()
    }

    /// Most recent frame, if the ticker has run.
    pub fn latest(&self) -> Option<Arc<TelemetrySnapshot>> {
        self.history.lock().back().cloned()
    }

    /// Newest-first window of recent frames.
    pub fn history(&self, limit: usize) -> Vec<Arc<TelemetrySnapshot>> {
        self.history
            .lock()
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Build one frame now.
    pub async fn snapshot(&self) -> TelemetrySnapshot {
        let mut pools = Vec::with_capacity(ConsumableKind::ALL.len() + ReusableKind::ALL.len());

        for stats in self.consumables.stats().await {
            pools.push(PoolSnapshot {
                name: stats.name.to_string(),
                kind: "consumable",
                size: stats.size,
                capacity: stats.capacity,
                memory_bytes: stats.memory_bytes,
                workers: stats.workers,
                threshold: stats.threshold,
                groups: Vec::new(),
            });
        }

        for kind in ReusableKind::ALL {
            let corpus = self.reusables.corpus(kind);
            let groups = corpus
                .group_sizes()
                .into_iter()
                .map(|(group_id, size)| GroupSize { group_id, size })
                .collect();
            pools.push(PoolSnapshot {
                name: kind.name().to_string(),
                kind: if kind == ReusableKind::Emoji {
                    "static"
                } else {
                    "reusable"
                },
                size: corpus.total_items(),
                capacity: corpus.total_items(),
                memory_bytes: corpus.memory_bytes() as u64,
                workers: 0,
                threshold: 0.0,
                groups,
            });
        }

        TelemetrySnapshot {
            timestamp: Utc::now(),
            pools,
            system: self.collector.collect(),
        }
    }

    /// Run the 1 Hz ticker until shutdown.
    pub fn start(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let hub = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!("Telemetry ticker started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                let frame = Arc::new(hub.snapshot().await);
                {
                    let mut history = hub.history.lock();
                    if history.len() >= HISTORY_CAPACITY {
                        history.pop_front();
                    }
                    history.push_back(frame.clone());
                }
                // Send fails only with zero subscribers, which is fine.
                let delivered = hub.sender.send(frame).unwrap_or(0);
                debug!(subscribers = delivered, "Telemetry frame published");
            }
            info!("Telemetry ticker stopped");
        });
    }
}
