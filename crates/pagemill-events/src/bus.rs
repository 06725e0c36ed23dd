use futures_util::StreamExt;
use pagemill_types::{CachePoolConfig, PagemillError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Channel carrying pool-configuration reload intents.
pub const POOL_RELOAD_CHANNEL: &str = "pool:reload";
/// Channel fanning operator log lines to external subscribers.
pub const SYSTEM_LOGS_CHANNEL: &str = "system:logs";

/// JSON frame published on `pool:reload`.
///
/// Subscribers re-read the persisted record before applying, so a lost or
/// truncated frame degrades to a no-op rather than a wrong resize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolReloadFrame {
    pub action: String,
    pub concurrency: String,
    pub buffer_seconds: u32,
    pub sizes: HashMap<String, usize>,
}

impl PoolReloadFrame {
    /// Build the canonical reload frame from a full config record.
    pub fn from_config(config: &CachePoolConfig) -> Self {
        let mut sizes = HashMap::new();
        for kind in pagemill_types::ConsumableKind::ALL {
            sizes.insert(kind.name().to_string(), config.tuning(kind).pool_size);
        }
        Self {
            action: "reload".to_string(),
            concurrency: format!("{:?}", config.concurrency_preset).to_lowercase(),
            buffer_seconds: config.buffer_seconds,
            sizes,
        }
    }
}

/// Publisher plus subscription factory over one redis client.
pub struct ConfigBus {
    client: redis::Client,
}

impl ConfigBus {
    pub fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| PagemillError::internal(format!("redis client: {e}")))?;
        Ok(Self { client })
    }

    /// Publish a reload frame. Failure is surfaced to the caller, which
    /// treats it as "saved but not hot-applied" rather than an error.
    pub async fn publish_pool_reload(&self, frame: &PoolReloadFrame) -> Result<()> {
        let payload = serde_json::to_string(frame)
            .map_err(|e| PagemillError::internal(format!("encode reload frame: {e}")))?;
        self.publish(POOL_RELOAD_CHANNEL, &payload).await
    }

    /// Fan one operator log line out on `system:logs`.
    pub async fn publish_log(&self, line: &str) -> Result<()> {
        self.publish(SYSTEM_LOGS_CHANNEL, line).await
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| PagemillError::internal(format!("redis connect: {e}")))?;

        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| PagemillError::internal(format!("redis publish: {e}")))?;

        debug!(channel, receivers, "Bus message published");
        Ok(())
    }

    /// Subscribe to `pool:reload`; decoded frames arrive on the returned
    /// receiver.
    pub fn subscribe_pool_reload(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> mpsc::Receiver<PoolReloadFrame> {
        let (tx, rx) = mpsc::channel(16);
        let raw = self.subscribe_raw(POOL_RELOAD_CHANNEL, shutdown);

        tokio::spawn(async move {
            let mut raw = raw;
            while let Some(payload) = raw.recv().await {
                match serde_json::from_str::<PoolReloadFrame>(&payload) {
                    Ok(frame) => {
                        if tx.send(frame).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Malformed reload frame dropped");
                    }
                }
            }
        });

        rx
    }

    /// Subscribe to the operator log channel.
    pub fn subscribe_system_logs(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> mpsc::Receiver<String> {
        self.subscribe_raw(SYSTEM_LOGS_CHANNEL, shutdown)
    }

    /// Channel subscription with flat-backoff reconnects, so a redis restart
    /// does not strand the subscriber.
    fn subscribe_raw(
        &self,
        channel: &'static str,
        mut shutdown: watch::Receiver<bool>,
    ) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(64);
        let client = self.client.clone();

        tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }

                let pubsub = match client.get_async_pubsub().await {
                    Ok(pubsub) => pubsub,
                    Err(e) => {
                        warn!(error = %e, "Bus subscriber connect failed, retrying");
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_secs(5)) => continue,
                            _ = shutdown.changed() => break,
                        }
                    }
                };

                let mut pubsub = pubsub;
                if let Err(e) = pubsub.subscribe(channel).await {
                    warn!(error = %e, "Bus channel subscribe failed, retrying");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
                info!(channel, "Bus subscriber attached");

                let mut messages = pubsub.on_message();
                loop {
                    tokio::select! {
                        message = messages.next() => {
                            let Some(message) = message else { break };
                            match message.get_payload::<String>() {
                                Ok(payload) => {
                                    if tx.send(payload).await.is_err() {
                                        return;
                                    }
                                }
                                Err(e) => {
                                    warn!(error = %e, "Undecodable bus payload dropped");
                                }
                            }
                        }
                        _ = shutdown.changed() => return,
                    }
                }

                warn!(channel, "Bus subscription ended, reconnecting");
            }
        });

        rx
    }
}
