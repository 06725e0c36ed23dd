//! # Pagemill Persistence
//!
//! Relational storage adapter behind the `pagemill_types::ports` traits.
//! All lookups use parameterized SQL over a bounded connection pool; batch
//! inserts rely on `ON CONFLICT DO NOTHING` idempotence.

pub mod config;
pub mod corpus;
pub mod settings;
pub mod storage;
pub mod visits;

pub use config::DatabaseConfig;
pub use storage::PgStorage;

use pagemill_types::PagemillError;

/// Map a driver error onto the shared error kinds: pool/connectivity faults
/// are retryable `DbConnection`, everything else is `DbQuery`.
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> PagemillError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            PagemillError::db_connection(err.to_string())
        }
        other => PagemillError::db_query(other.to_string()),
    }
}
