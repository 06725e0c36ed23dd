//! Asynchronous spider-visit logging.
//!
//! One raw row per spider request, inserted off the request path with a
//! per-call timeout. Page assembly never waits on the insert.

use pagemill_monitoring::VisitTally;
use pagemill_types::ports::VisitLogStore;
use pagemill_types::VisitRecord;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct VisitLoggerConfig {
    pub insert_timeout: Duration,
}

impl Default for VisitLoggerConfig {
    fn default() -> Self {
        Self {
            insert_timeout: Duration::from_secs(5),
        }
    }
}

pub struct SpiderVisitLogger {
    store: Arc<dyn VisitLogStore>,
    tally: Arc<VisitTally>,
    config: VisitLoggerConfig,
}

impl SpiderVisitLogger {
    pub fn new(
        store: Arc<dyn VisitLogStore>,
        tally: Arc<VisitTally>,
        config: VisitLoggerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            tally,
            config,
        })
    }

    /// Record one visit: the in-memory tally updates immediately, the row
    /// insert is dispatched with its timeout and any failure is only logged.
    pub fn record(self: &Arc<Self>, visit: VisitRecord) {
        self.tally
            .record(&visit.spider_type, visit.status, visit.resp_time_ms);

        let logger = self.clone();
        tokio::spawn(async move {
            let result = tokio::time::timeout(
                logger.config.insert_timeout,
                logger.store.insert_visit(&visit),
            )
            .await;

            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(domain = %visit.domain, error = %e, "Visit insert failed");
                }
                Err(_) => {
                    warn!(
                        domain = %visit.domain,
                        timeout_ms = logger.config.insert_timeout.as_millis() as u64,
                        "Visit insert timed out"
                    );
                }
            }
        });
    }

    pub fn tally(&self) -> &Arc<VisitTally> {
        &self.tally
    }
}
