//! # Pagemill Monitoring
//!
//! Operator-facing observability: the in-memory alert stream, system stats
//! collection, per-spider visit tallies, and the 1 Hz telemetry hub that
//! fans pool snapshots to WebSocket subscribers.

pub mod alerts;
pub mod system;
pub mod tally;
pub mod telemetry;

pub use alerts::AlertStream;
pub use system::{DiskStats, SystemStats, SystemStatsCollector};
pub use tally::{SpiderTallySnapshot, VisitTally};
pub use telemetry::{GroupSize, PoolSnapshot, TelemetryHub, TelemetrySnapshot};
