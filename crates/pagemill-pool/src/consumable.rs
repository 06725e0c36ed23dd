//! Consumable pools: one bounded ring per kind plus its refill workers.
//!
//! Workers sleep on the refill interval or a low-water wakeup, then top the
//! ring up in batches. `resize` swaps capacity, threshold, interval, and the
//! worker set in one atomic operation; in-flight pops are unaffected.

use crate::producers::{ItemProducer, ProducerSet};
use crate::ring::Ring;
use pagemill_types::{CachePoolConfig, ConsumableKind, PoolTuning, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Upper bound on one producer batch; bounds the time the ring tail is contended.
const BATCH_MAX: usize = 256;

/// Point-in-time view of one consumable pool for telemetry.
#[derive(Debug, Clone, Serialize)]
pub struct ConsumableStats {
    pub name: &'static str,
    pub size: usize,
    pub capacity: usize,
    pub workers: usize,
    pub threshold: f64,
    pub refill_interval_ms: u64,
    pub memory_bytes: u64,
    pub total_pops: u64,
    pub empty_pops: u64,
}

struct WorkerSet {
    stops: Vec<watch::Sender<bool>>,
}

/// One consumable kind: ring, producer, and its worker set.
pub struct ConsumablePool {
    kind: ConsumableKind,
    ring: Arc<Ring>,
    producer: Arc<dyn ItemProducer>,
    interval_ms: Arc<AtomicU64>,
    workers: Mutex<WorkerSet>,
    shutdown: watch::Receiver<bool>,
}

impl ConsumablePool {
    pub async fn start(
        kind: ConsumableKind,
        tuning: PoolTuning,
        producer: Arc<dyn ItemProducer>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Arc<Self>> {
        tuning.validate(kind.name())?;

        let pool = Arc::new(Self {
            kind,
            ring: Ring::new(tuning.pool_size, tuning.threshold_ratio),
            producer,
            interval_ms: Arc::new(AtomicU64::new(tuning.refill_interval_ms)),
            workers: Mutex::new(WorkerSet { stops: Vec::new() }),
            shutdown,
        });

        {
            let mut workers = pool.workers.lock().await;
            for _ in 0..tuning.workers {
                let stop = pool.spawn_worker();
                workers.stops.push(stop);
            }
        }

        info!(
            pool = kind.name(),
            capacity = tuning.pool_size,
            workers = tuning.workers,
            threshold = tuning.threshold_ratio,
            "Consumable pool started"
        );
        Ok(pool)
    }

    pub fn kind(&self) -> ConsumableKind {
        self.kind
    }

    /// O(1) non-blocking pop for the request path.
    pub fn try_pop(&self) -> Option<String> {
        self.ring.try_pop()
    }

    /// Blocking pop for callers that can afford a bounded wait.
    pub async fn pop_wait(&self, timeout: Duration) -> Option<String> {
        self.ring.pop_wait(timeout).await
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Atomically apply new tuning: ring geometry, refill interval, and the
    /// worker set all swap under the worker mutex.
    pub async fn resize(self: &Arc<Self>, tuning: PoolTuning) -> Result<()> {
        tuning.validate(self.kind.name())?;
        let mut workers = self.workers.lock().await;

        self.ring
            .reconfigure(tuning.pool_size, tuning.threshold_ratio);
        self.interval_ms
            .store(tuning.refill_interval_ms, Ordering::Release);

        while workers.stops.len() > tuning.workers {
            if let Some(stop) = workers.stops.pop() {
                let _ = stop.send(true);
            }
        }
        while workers.stops.len() < tuning.workers {
            let stop = self.spawn_worker();
            workers.stops.push(stop);
        }

        info!(
            pool = self.kind.name(),
            capacity = tuning.pool_size,
            workers = tuning.workers,
            threshold = tuning.threshold_ratio,
            interval_ms = tuning.refill_interval_ms,
            "Consumable pool resized"
        );
        Ok(())
    }

    pub async fn stats(&self) -> ConsumableStats {
        let workers = self.workers.lock().await;
        let capacity = self.ring.capacity();
        ConsumableStats {
            name: self.kind.name(),
            size: self.ring.len(),
            capacity,
            workers: workers.stops.len(),
            threshold: self.ring.threshold_ratio(),
            refill_interval_ms: self.interval_ms.load(Ordering::Acquire),
            memory_bytes: (capacity as f64 * self.kind.bytes_per_item() as f64 * 1.2) as u64,
            total_pops: self.ring.total_pops(),
            empty_pops: self.ring.empty_pops(),
        }
    }

    fn spawn_worker(self: &Arc<Self>) -> watch::Sender<bool> {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let pool = self.clone();
        let mut shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            debug!(pool = pool.kind.name(), "Refill worker started");
            loop {
                let interval = Duration::from_millis(pool.interval_ms.load(Ordering::Acquire));
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = pool.ring.low_water_notified() => {}
                    _ = stop_rx.changed() => break,
                    _ = shutdown.changed() => break,
                }
                if *stop_rx.borrow() || *shutdown.borrow() {
                    break;
                }
                pool.refill_once();
            }
            debug!(pool = pool.kind.name(), "Refill worker drained");
        });

        stop_tx
    }

    /// One refill pass: no-op above the threshold, otherwise top up toward
    /// capacity in bounded batches. Synthesis runs outside the ring lock.
    fn refill_once(&self) {
        let len = self.ring.len();
        let capacity = self.ring.capacity();
        if len >= self.ring.low_water_mark() {
            return;
        }

        let goal = capacity - len;
        let mut produced = 0;
        while produced < goal {
            let step = (goal - produced).min(BATCH_MAX);
            let mut batch = Vec::with_capacity(step);
            for _ in 0..step {
                match self.producer.produce() {
                    Some(item) => batch.push(item),
                    None => break,
                }
            }
            if batch.is_empty() {
                warn!(pool = self.kind.name(), "Producer yielded no items");
                break;
            }
            let wanted = batch.len();
            let pushed = self.ring.push_batch(batch);
            produced += pushed;
            if pushed < wanted {
                // Ring filled mid-batch; remaining items are discarded.
                break;
            }
        }

        if produced > 0 {
            debug!(pool = self.kind.name(), produced, "Refill pass completed");
        }
    }
}

/// All five consumable pools behind one handle.
pub struct ConsumablePools {
    pub title: Arc<ConsumablePool>,
    pub content: Arc<ConsumablePool>,
    pub cls: Arc<ConsumablePool>,
    pub url: Arc<ConsumablePool>,
    pub keyword_emoji: Arc<ConsumablePool>,
    shutdown_tx: watch::Sender<bool>,
}

impl ConsumablePools {
    /// Spin up every ring and its workers from the persisted configuration.
    pub async fn start(producers: &ProducerSet, config: &CachePoolConfig) -> Result<Self> {
        config.validate()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let start = |kind: ConsumableKind| {
            ConsumablePool::start(
                kind,
                config.tuning(kind),
                producers.for_kind(kind),
                shutdown_rx.clone(),
            )
        };

        Ok(Self {
            title: start(ConsumableKind::Title).await?,
            content: start(ConsumableKind::Content).await?,
            cls: start(ConsumableKind::Cls).await?,
            url: start(ConsumableKind::Url).await?,
            keyword_emoji: start(ConsumableKind::KeywordEmoji).await?,
            shutdown_tx,
        })
    }

    pub fn pool(&self, kind: ConsumableKind) -> &Arc<ConsumablePool> {
        match kind {
            ConsumableKind::Title => &self.title,
            ConsumableKind::Content => &self.content,
            ConsumableKind::Cls => &self.cls,
            ConsumableKind::Url => &self.url,
            ConsumableKind::KeywordEmoji => &self.keyword_emoji,
        }
    }

    /// Apply a full configuration record to every pool.
    pub async fn apply_config(&self, config: &CachePoolConfig) -> Result<()> {
        config.validate()?;
        for kind in ConsumableKind::ALL {
            self.pool(kind).resize(config.tuning(kind)).await?;
        }
        Ok(())
    }

    pub async fn stats(&self) -> Vec<ConsumableStats> {
        let mut stats = Vec::with_capacity(ConsumableKind::ALL.len());
        for kind in ConsumableKind::ALL {
            stats.push(self.pool(kind).stats().await);
        }
        stats
    }

    /// Nudge refill on any ring sitting under its low-water mark.
    pub fn kick_all(&self) {
        for kind in ConsumableKind::ALL {
            self.pool(kind).ring.kick();
        }
    }

    /// Signal every refill worker to drain.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
