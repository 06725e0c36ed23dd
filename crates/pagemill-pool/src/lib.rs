//! # Pagemill Pool
//!
//! The cache/pool substrate: bounded consumable rings with asynchronous
//! refill workers, reusable in-memory corpora with atomic group reloads,
//! and the pure sizing engine that turns template analysis into pool
//! capacities and a memory budget.

pub mod consumable;
pub mod producers;
pub mod reusable;
pub mod ring;
pub mod sizing;

pub use consumable::{ConsumablePool, ConsumablePools, ConsumableStats};
pub use producers::{ItemProducer, ProducerSet, TITLE_FALLBACK};
pub use reusable::{CorpusGroup, ReusableCorpus, ReusablePools, EMOJI_GROUP};
pub use ring::Ring;
pub use sizing::{plan_pool_sizes, PoolSizePlan, SizingInput, MAX_POOL_SIZE, MIN_POOL_SIZE};
