//! # Pagemill Events
//!
//! The config propagation bus: `pool:reload` carries full pool-config
//! frames from the admin writer to in-process subscribers, `system:logs`
//! fans operator log lines out. Single publisher, FIFO per channel.

pub mod bus;

pub use bus::{ConfigBus, PoolReloadFrame, POOL_RELOAD_CHANNEL, SYSTEM_LOGS_CHANNEL};
