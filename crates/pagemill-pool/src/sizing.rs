//! Pool sizing engine: template analysis max + concurrency preset in,
//! per-kind capacities and a memory budget out. Pure, no clocks, no I/O.

use pagemill_types::{CachePoolConfig, ConcurrencyPreset, ConsumableKind, TemplateAnalysis};
use serde::Serialize;

/// Floor shared with `PoolTuning::validate`.
pub const MIN_POOL_SIZE: usize = 100;
/// Ceiling keeping one ring's estimate under control.
pub const MAX_POOL_SIZE: usize = 2_000_000;
/// Overhead factor applied to the per-item byte budget.
const MEMORY_OVERHEAD: f64 = 1.2;

/// Inputs to one sizing run.
#[derive(Debug, Clone, Copy)]
pub struct SizingInput {
    pub analysis_max: TemplateAnalysis,
    pub preset: ConcurrencyPreset,
    pub concurrency_custom: u32,
    pub buffer_seconds: u32,
}

/// Derived capacities plus the memory estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolSizePlan {
    pub title: usize,
    pub content: usize,
    pub cls: usize,
    pub url: usize,
    pub keyword_emoji: usize,
    pub memory_bytes: u64,
}

impl PoolSizePlan {
    pub fn capacity(&self, kind: ConsumableKind) -> usize {
        match kind {
            ConsumableKind::Title => self.title,
            ConsumableKind::Content => self.content,
            ConsumableKind::Cls => self.cls,
            ConsumableKind::Url => self.url,
            ConsumableKind::KeywordEmoji => self.keyword_emoji,
        }
    }

    /// Fold the plan into an existing config, keeping worker counts,
    /// thresholds, and intervals as tuned.
    pub fn apply_to(&self, mut config: CachePoolConfig) -> CachePoolConfig {
        for kind in ConsumableKind::ALL {
            config.tuning_mut(kind).pool_size = self.capacity(kind);
        }
        config
    }
}

/// Derive pool capacities: `max_calls_per_page × concurrency × buffer`,
/// clamped into the valid range, plus the 1.2×-padded memory estimate.
pub fn plan_pool_sizes(input: SizingInput) -> PoolSizePlan {
    let concurrency = input.preset.concurrency(input.concurrency_custom) as u64;
    let buffer = input.buffer_seconds.clamp(5, 30) as u64;

    let capacity = |kind: ConsumableKind| -> usize {
        let calls = input.analysis_max.calls_for(kind).max(1) as u64;
        let raw = calls * concurrency * buffer;
        (raw as usize).clamp(MIN_POOL_SIZE, MAX_POOL_SIZE)
    };

    let title = capacity(ConsumableKind::Title);
    let content = capacity(ConsumableKind::Content);
    let cls = capacity(ConsumableKind::Cls);
    let url = capacity(ConsumableKind::Url);
    let keyword_emoji = capacity(ConsumableKind::KeywordEmoji);

    let memory_bytes = ConsumableKind::ALL
        .iter()
        .map(|kind| {
            let cap = match kind {
                ConsumableKind::Title => title,
                ConsumableKind::Content => content,
                ConsumableKind::Cls => cls,
                ConsumableKind::Url => url,
                ConsumableKind::KeywordEmoji => keyword_emoji,
            };
            (cap as f64 * kind.bytes_per_item() as f64 * MEMORY_OVERHEAD) as u64
        })
        .sum();

    PoolSizePlan {
        title,
        content,
        cls,
        url,
        keyword_emoji,
        memory_bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis(cls: u32, url: u32, content: u32) -> TemplateAnalysis {
        TemplateAnalysis {
            cls,
            random_url: url,
            keyword_with_emoji: 2,
            random_keyword: 4,
            random_image: 3,
            random_content: content,
        }
    }

    fn input(cls: u32, concurrency: u32) -> SizingInput {
        SizingInput {
            analysis_max: analysis(cls, 5, 1),
            preset: ConcurrencyPreset::Custom,
            concurrency_custom: concurrency,
            buffer_seconds: 10,
        }
    }

    #[test]
    fn same_inputs_same_outputs() {
        let a = plan_pool_sizes(input(20, 200));
        let b = plan_pool_sizes(input(20, 200));
        assert_eq!(a, b);
    }

    #[test]
    fn capacity_follows_calls_times_concurrency_times_buffer() {
        let plan = plan_pool_sizes(input(20, 200));
        assert_eq!(plan.cls, 20 * 200 * 10);
        assert_eq!(plan.url, 5 * 200 * 10);
        // One title per page.
        assert_eq!(plan.title, 200 * 10);
    }

    #[test]
    fn capacities_are_clamped() {
        // Zero calls still yields the floor.
        let floor = plan_pool_sizes(SizingInput {
            analysis_max: TemplateAnalysis::default(),
            preset: ConcurrencyPreset::Low,
            concurrency_custom: 0,
            buffer_seconds: 5,
        });
        assert_eq!(floor.content, MIN_POOL_SIZE);

        let ceiling = plan_pool_sizes(SizingInput {
            analysis_max: analysis(10_000, 1, 1),
            preset: ConcurrencyPreset::High,
            concurrency_custom: 0,
            buffer_seconds: 30,
        });
        assert_eq!(ceiling.cls, MAX_POOL_SIZE);
    }

    #[test]
    fn memory_estimate_is_monotone_in_concurrency() {
        let mut previous = 0;
        for concurrency in [10, 50, 200, 1000, 5000] {
            let plan = plan_pool_sizes(input(20, concurrency));
            assert!(
                plan.memory_bytes >= previous,
                "memory decreased at concurrency {concurrency}"
            );
            previous = plan.memory_bytes;
        }
    }

    #[test]
    fn memory_estimate_is_monotone_in_each_helper_count() {
        let mut previous = 0;
        for cls_calls in [0, 1, 5, 20, 100] {
            let plan = plan_pool_sizes(input(cls_calls, 200));
            assert!(plan.memory_bytes >= previous);
            previous = plan.memory_bytes;
        }
    }

    #[test]
    fn apply_to_preserves_worker_tuning() {
        let plan = plan_pool_sizes(input(20, 200));
        let mut config = CachePoolConfig::default();
        config.cls.workers = 7;
        let applied = plan.apply_to(config);
        assert_eq!(applied.cls.pool_size, plan.cls);
        assert_eq!(applied.cls.workers, 7);
    }
}
