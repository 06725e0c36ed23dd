//! Application state: one root-scoped wiring of every subsystem, built at
//! startup and passed by reference. Nothing on the hot path is lazily
//! initialized.

use crate::config::AppConfig;
use pagemill_cache::{HtmlFileCache, SiteCache};
use pagemill_detect::SpiderDetector;
use pagemill_events::{ConfigBus, PoolReloadFrame};
use pagemill_monitoring::{AlertStream, TelemetryHub, VisitTally};
use pagemill_persistence::PgStorage;
use pagemill_pool::{
    plan_pool_sizes, ConsumablePools, ProducerSet, ReusablePools, SizingInput,
};
use pagemill_render::RenderEngine;
use pagemill_types::ports::{
    CorpusStore, PoolConfigStore, SettingsStore, SiteStore, TemplateStore, VisitLogStore,
};
use pagemill_types::{CachePoolConfig, Result, ReusableKind, SystemSettings};
use pagemill_workers::{
    run_rollup_pass, RollupConfig, Scheduler, SchedulerConfig, SpiderVisitLogger,
    VisitLoggerConfig,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{info, warn};

/// The storage ports, bundled so tests can swap in-memory implementations.
#[derive(Clone)]
pub struct StorageHandles {
    pub sites: Arc<dyn SiteStore>,
    pub templates: Arc<dyn TemplateStore>,
    pub corpus: Arc<dyn CorpusStore>,
    pub pool_config: Arc<dyn PoolConfigStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub visits: Arc<dyn VisitLogStore>,
}

impl StorageHandles {
    pub fn from_pg(storage: Arc<PgStorage>) -> Self {
        Self {
            sites: storage.clone(),
            templates: storage.clone(),
            corpus: storage.clone(),
            pool_config: storage.clone(),
            settings: storage.clone(),
            visits: storage,
        }
    }
}

/// Halving-average per-stage timings for the telemetry snapshot.
#[derive(Default)]
pub struct PageTimings {
    detect_us: AtomicU64,
    site_us: AtomicU64,
    render_us: AtomicU64,
    total_us: AtomicU64,
    requests: AtomicU64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PageTimingsSnapshot {
    pub detect_us: u64,
    pub site_us: u64,
    pub render_us: u64,
    pub total_us: u64,
    pub requests: u64,
}

impl PageTimings {
    pub fn record(&self, detect_us: u64, site_us: u64, render_us: u64, total_us: u64) {
        let n = self.requests.fetch_add(1, Ordering::Relaxed);
        let merge = |cell: &AtomicU64, sample: u64| {
            if n == 0 {
                cell.store(sample, Ordering::Relaxed);
            } else {
                let previous = cell.load(Ordering::Relaxed);
                cell.store((previous + sample) / 2, Ordering::Relaxed);
            }
        };
        merge(&self.detect_us, detect_us);
        merge(&self.site_us, site_us);
        merge(&self.render_us, render_us);
        merge(&self.total_us, total_us);
    }

    pub fn snapshot(&self) -> PageTimingsSnapshot {
        PageTimingsSnapshot {
            detect_us: self.detect_us.load(Ordering::Relaxed),
            site_us: self.site_us.load(Ordering::Relaxed),
            render_us: self.render_us.load(Ordering::Relaxed),
            total_us: self.total_us.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of a pool-config save.
#[derive(Debug, Clone, Serialize)]
pub struct SaveConfigOutcome {
    pub saved: bool,
    pub hot_applied: bool,
}

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub settings: Arc<RwLock<SystemSettings>>,
    pub storage: StorageHandles,
    pub detector: Arc<SpiderDetector>,
    pub site_cache: Arc<SiteCache>,
    pub html_cache: Arc<HtmlFileCache>,
    pub engine: Arc<RenderEngine>,
    pub reusables: Arc<ReusablePools>,
    pub consumables: Arc<ConsumablePools>,
    pub producers: Arc<ProducerSet>,
    pub telemetry: Arc<TelemetryHub>,
    pub alerts: Arc<AlertStream>,
    pub tally: Arc<VisitTally>,
    pub logger: Arc<SpiderVisitLogger>,
    pub scheduler: Arc<Scheduler>,
    pub timings: Arc<PageTimings>,
    pub bus: Option<Arc<ConfigBus>>,
}

impl AppState {
    /// Wire every subsystem. `shutdown` fans into all background loops.
    pub async fn build(
        config: AppConfig,
        storage: StorageHandles,
        bus: Option<Arc<ConfigBus>>,
        shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<Self> {
        // Settings and detector come first; detection toggles live there.
        let settings = match storage.settings.load_settings().await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "Settings unavailable, starting with defaults");
                SystemSettings::default()
            }
        };
        let mut detector_config = config.detector.clone();
        detector_config.verify_dns = settings.verify_spider_dns;
        let detector = SpiderDetector::new(detector_config);

        // Reusable corpora feed the producers behind the consumable rings.
        let reusables = Arc::new(ReusablePools::new(storage.corpus.clone()));
        if let Err(e) = reusables.load_all().await {
            warn!(error = %e, "Corpus load failed, pools start empty");
        }
        let producers = Arc::new(ProducerSet::new(reusables.clone()));

        let persisted = storage.pool_config.load_pool_config().await.ok().flatten();
        let had_persisted = persisted.is_some();
        let pool_config = persisted.unwrap_or_default();
        let consumables = Arc::new(ConsumablePools::start(&producers, &pool_config).await?);

        let engine = RenderEngine::new(storage.templates.clone(), &consumables, &reusables);
        if let Err(e) = engine.recompute_global_max().await {
            warn!(error = %e, "Template analysis unavailable at startup");
        }

        // Without a persisted record, derive capacities from the analysis.
        if !had_persisted {
            let plan = plan_pool_sizes(SizingInput {
                analysis_max: engine.global_max(),
                preset: pool_config.concurrency_preset,
                concurrency_custom: pool_config.concurrency_custom,
                buffer_seconds: pool_config.buffer_seconds,
            });
            let derived = plan.apply_to(pool_config.clone());
            info!(memory_bytes = plan.memory_bytes, "Applying derived pool sizing");
            consumables.apply_config(&derived).await?;
        }

        let site_cache = SiteCache::new(storage.sites.clone(), config.site_cache());
        let html_cache = HtmlFileCache::new(config.html_cache());

        let alerts = AlertStream::new(512);
        let tally = VisitTally::new();
        let logger = SpiderVisitLogger::new(
            storage.visits.clone(),
            tally.clone(),
            VisitLoggerConfig::default(),
        );

        let telemetry = TelemetryHub::new(consumables.clone(), reusables.clone());
        telemetry.start(shutdown.clone());

        let scheduler = Scheduler::new(SchedulerConfig::default(), alerts.clone());
        let state = Self {
            config,
            settings: Arc::new(RwLock::new(settings)),
            storage,
            detector,
            site_cache,
            html_cache,
            engine,
            reusables,
            consumables,
            producers,
            telemetry,
            alerts,
            tally,
            logger,
            scheduler,
            timings: Arc::new(PageTimings::default()),
            bus,
        };

        state.register_maintenance_tasks()?;
        state.scheduler.start(shutdown.clone());
        state.spawn_bus_listeners(shutdown);

        info!("Application state initialized");
        Ok(state)
    }

    /// Persist a pool configuration and propagate it to the live pools.
    ///
    /// Bus publish failure is not an error: the record is saved, the caller
    /// sees `hot_applied = false`, and the local pools are still resized so
    /// a single-process deployment never drifts.
    pub async fn save_pool_config(&self, config: &CachePoolConfig) -> Result<SaveConfigOutcome> {
        config.validate()?;
        self.storage.pool_config.save_pool_config(config).await?;

        let hot_applied = match &self.bus {
            Some(bus) => {
                let frame = PoolReloadFrame::from_config(config);
                match bus.publish_pool_reload(&frame).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(error = %e, "Reload publish failed, config saved but not hot-applied");
                        false
                    }
                }
            }
            // No bus: apply in-process.
            None => {
                self.consumables.apply_config(config).await?;
                true
            }
        };

        if !hot_applied {
            self.consumables.apply_config(config).await?;
        }

        Ok(SaveConfigOutcome {
            saved: true,
            hot_applied,
        })
    }

    fn register_maintenance_tasks(&self) -> Result<()> {
        let html_cache = self.html_cache.clone();
        self.scheduler.register(
            "html_rescan",
            "HTML cache rescan",
            "0 */10 * * * *",
            Arc::new(move || {
                let html_cache = html_cache.clone();
                Box::pin(async move {
                    let stats = html_cache.rescan().await?;
                    Ok(format!("{} entries, {} bytes", stats.entries, stats.bytes))
                })
            }),
        )?;

        let visits = self.storage.visits.clone();
        self.scheduler.register(
            "log_rollup",
            "Spider log rollup",
            "30 */5 * * * *",
            Arc::new(move || {
                let visits = visits.clone();
                Box::pin(async move {
                    let (written, _) =
                        run_rollup_pass(visits.as_ref(), &RollupConfig::default()).await?;
                    Ok(format!("{written} rollup rows written"))
                })
            }),
        )?;

        let visits = self.storage.visits.clone();
        self.scheduler.register(
            "retention_prune",
            "Raw log retention prune",
            "0 0 3 * * *",
            Arc::new(move || {
                let visits = visits.clone();
                Box::pin(async move {
                    let horizon = RollupConfig::default().retention;
                    let cutoff = chrono::Utc::now()
                        - chrono::Duration::from_std(horizon).unwrap_or(chrono::Duration::days(7));
                    let pruned = visits.prune_raw_before(cutoff).await?;
                    Ok(format!("{pruned} raw rows pruned"))
                })
            }),
        )?;

        let consumables = self.consumables.clone();
        self.scheduler.register(
            "pool_refill_kick",
            "Consumable pool refill kick",
            "*/30 * * * * *",
            Arc::new(move || {
                let consumables = consumables.clone();
                Box::pin(async move {
                    consumables.kick_all();
                    Ok("kicked".to_string())
                })
            }),
        )?;

        let reusables = self.reusables.clone();
        let engine = self.engine.clone();
        self.scheduler.register(
            "corpus_refresh",
            "Reusable corpus refresh",
            "0 0 * * * *",
            Arc::new(move || {
                let reusables = reusables.clone();
                let engine = engine.clone();
                Box::pin(async move {
                    for kind in ReusableKind::ALL {
                        reusables.refresh_all(kind).await?;
                    }
                    engine.recompute_global_max().await?;
                    Ok("corpora refreshed".to_string())
                })
            }),
        )?;

        Ok(())
    }

    /// Attach the `pool:reload` applier and the `system:logs` forwarder.
    fn spawn_bus_listeners(&self, shutdown: watch::Receiver<bool>) {
        let Some(bus) = &self.bus else {
            return;
        };

        let mut reload_rx = bus.subscribe_pool_reload(shutdown.clone());
        let pool_config_store = self.storage.pool_config.clone();
        let consumables = self.consumables.clone();
        let reusables = self.reusables.clone();
        tokio::spawn(async move {
            while let Some(frame) = reload_rx.recv().await {
                info!(action = %frame.action, "Reload frame received");
                if frame.action != "reload" {
                    warn!(action = %frame.action, "Unknown reload action ignored");
                    continue;
                }

                // The frame carries the sizes, but the persisted record is
                // authoritative; re-read before applying.
                match pool_config_store.load_pool_config().await {
                    Ok(Some(config)) => {
                        if let Err(e) = consumables.apply_config(&config).await {
                            warn!(error = %e, "Reload apply failed");
                        }
                    }
                    Ok(None) => {
                        warn!("Reload frame received but no persisted config found");
                    }
                    Err(e) => {
                        warn!(error = %e, "Reload re-read failed");
                    }
                }

                // One notification drives both halves of the substrate:
                // resized consumables and rebuilt reusable corpora.
                for kind in ReusableKind::ALL {
                    if let Err(e) = reusables.refresh_all(kind).await {
                        warn!(kind = kind.name(), error = %e, "Corpus refresh failed");
                    }
                }
            }
        });

        let mut logs_rx = bus.subscribe_system_logs(shutdown);
        tokio::spawn(async move {
            while let Some(line) = logs_rx.recv().await {
                info!(target: "system_logs", message = %line, "Operator log line");
            }
        });
    }
}
