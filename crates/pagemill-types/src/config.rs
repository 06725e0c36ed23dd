use crate::error::{PagemillError, Result};
use crate::model::ConsumableKind;
use serde::{Deserialize, Serialize};

/// Request-concurrency preset feeding the pool sizing engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyPreset {
    Low,
    Medium,
    High,
    Custom,
}

impl ConcurrencyPreset {
    /// Effective concurrent-request target. `custom` is clamped to the
    /// recognized 10..=10_000 range.
    pub fn concurrency(&self, custom: u32) -> u32 {
        match self {
            ConcurrencyPreset::Low => 50,
            ConcurrencyPreset::Medium => 200,
            ConcurrencyPreset::High => 1000,
            ConcurrencyPreset::Custom => custom.clamp(10, 10_000),
        }
    }
}

/// Tuning for one consumable ring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolTuning {
    pub pool_size: usize,
    pub workers: usize,
    pub refill_interval_ms: u64,
    pub threshold_ratio: f64,
}

impl Default for PoolTuning {
    fn default() -> Self {
        Self {
            pool_size: 10_000,
            workers: 2,
            refill_interval_ms: 500,
            threshold_ratio: 0.3,
        }
    }
}

impl PoolTuning {
    pub fn validate(&self, kind: &str) -> Result<()> {
        if self.pool_size < 100 {
            return Err(PagemillError::pool_invalid(format!(
                "{kind}: pool_size must be at least 100, got {}",
                self.pool_size
            )));
        }
        if self.workers == 0 {
            return Err(PagemillError::pool_invalid(format!(
                "{kind}: workers must be at least 1"
            )));
        }
        if !(0.1..=0.9).contains(&self.threshold_ratio) {
            return Err(PagemillError::pool_invalid(format!(
                "{kind}: threshold_ratio must be within [0.1, 0.9], got {}",
                self.threshold_ratio
            )));
        }
        if self.refill_interval_ms == 0 {
            return Err(PagemillError::pool_invalid(format!(
                "{kind}: refill_interval_ms must be positive"
            )));
        }
        Ok(())
    }
}

/// Persisted pool configuration; the reload event carries the whole record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachePoolConfig {
    pub concurrency_preset: ConcurrencyPreset,
    pub concurrency_custom: u32,
    pub buffer_seconds: u32,
    pub title: PoolTuning,
    pub content: PoolTuning,
    pub cls: PoolTuning,
    pub url: PoolTuning,
    pub keyword_emoji: PoolTuning,
}

impl Default for CachePoolConfig {
    fn default() -> Self {
        Self {
            concurrency_preset: ConcurrencyPreset::Medium,
            concurrency_custom: 200,
            buffer_seconds: 10,
            title: PoolTuning::default(),
            content: PoolTuning::default(),
            cls: PoolTuning::default(),
            url: PoolTuning::default(),
            keyword_emoji: PoolTuning::default(),
        }
    }
}

impl CachePoolConfig {
    pub fn tuning(&self, kind: ConsumableKind) -> PoolTuning {
        match kind {
            ConsumableKind::Title => self.title,
            ConsumableKind::Content => self.content,
            ConsumableKind::Cls => self.cls,
            ConsumableKind::Url => self.url,
            ConsumableKind::KeywordEmoji => self.keyword_emoji,
        }
    }

    pub fn tuning_mut(&mut self, kind: ConsumableKind) -> &mut PoolTuning {
        match kind {
            ConsumableKind::Title => &mut self.title,
            ConsumableKind::Content => &mut self.content,
            ConsumableKind::Cls => &mut self.cls,
            ConsumableKind::Url => &mut self.url,
            ConsumableKind::KeywordEmoji => &mut self.keyword_emoji,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(5..=30).contains(&self.buffer_seconds) {
            return Err(PagemillError::pool_invalid(format!(
                "buffer_seconds must be within [5, 30], got {}",
                self.buffer_seconds
            )));
        }
        if self.concurrency_preset == ConcurrencyPreset::Custom
            && !(10..=10_000).contains(&self.concurrency_custom)
        {
            return Err(PagemillError::pool_invalid(format!(
                "concurrency_custom must be within [10, 10000], got {}",
                self.concurrency_custom
            )));
        }
        for kind in ConsumableKind::ALL {
            self.tuning(kind).validate(kind.name())?;
        }
        Ok(())
    }
}

/// Content-processor collaborator settings, stored in `system_settings`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorSettings {
    pub enabled: bool,
    pub concurrency: u32,
    pub retry_max: u32,
    pub min_paragraph_length: u32,
    pub batch_size: u32,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            concurrency: 2,
            retry_max: 3,
            min_paragraph_length: 50,
            batch_size: 20,
        }
    }
}

impl ProcessorSettings {
    pub fn validate(&self) -> Result<()> {
        if !(1..=10).contains(&self.concurrency) {
            return Err(PagemillError::validation(format!(
                "processor.concurrency must be within [1, 10], got {}",
                self.concurrency
            )));
        }
        if self.retry_max > 10 {
            return Err(PagemillError::validation(format!(
                "processor.retry_max must be within [0, 10], got {}",
                self.retry_max
            )));
        }
        if self.min_paragraph_length == 0 {
            return Err(PagemillError::validation(
                "processor.min_paragraph_length must be at least 1",
            ));
        }
        if !(1..=200).contains(&self.batch_size) {
            return Err(PagemillError::validation(format!(
                "processor.batch_size must be within [1, 200], got {}",
                self.batch_size
            )));
        }
        Ok(())
    }
}

/// The closed set of recognized system settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSettings {
    pub api_token_enabled: bool,
    pub api_token: Option<String>,
    pub return_404_for_non_spider: bool,
    pub verify_spider_dns: bool,
    pub processor: ProcessorSettings,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            api_token_enabled: false,
            api_token: None,
            return_404_for_non_spider: true,
            verify_spider_dns: false,
            processor: ProcessorSettings::default(),
        }
    }
}

impl SystemSettings {
    pub fn validate(&self) -> Result<()> {
        if self.api_token_enabled && self.api_token.as_deref().unwrap_or("").is_empty() {
            return Err(PagemillError::validation(
                "api_token must be set when api_token_enabled is true",
            ));
        }
        self.processor.validate()
    }
}
