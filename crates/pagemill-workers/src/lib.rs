//! # Pagemill Workers
//!
//! Background machinery: the asynchronous spider-visit logger, the
//! minute/hour/day rollup pipeline with its chart fallback chain, retention
//! pruning, and the periodic-task scheduler that drives all maintenance.

pub mod logger;
pub mod rollup;
pub mod scheduler;

pub use logger::{SpiderVisitLogger, VisitLoggerConfig};
pub use rollup::{chart_series, rollup_visits, run_rollup_pass, RollupConfig};
pub use scheduler::{Scheduler, SchedulerConfig, TaskStatus, TaskView};
