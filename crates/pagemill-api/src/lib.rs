//! # Pagemill API
//!
//! The spider-facing HTTP surface: the page-assembly path, health and
//! metrics endpoints, the alert listing, and the 1 Hz WebSocket streams,
//! all over one root-scoped application state.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::AppConfig;
pub use errors::{ApiError, ApiResult};
pub use routes::build_router;
pub use state::{AppState, PageTimings, SaveConfigOutcome, StorageHandles};
