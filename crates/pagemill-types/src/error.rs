use thiserror::Error;

/// Result type used across the Pagemill crates.
pub type Result<T> = std::result::Result<T, PagemillError>;

/// Error kinds shared by every subsystem.
///
/// Each kind carries a stable numeric code used by the API layer when
/// translating to HTTP responses. Driver-level detail travels in the
/// `detail` field where present and is only surfaced outside production.
#[derive(Error, Debug)]
pub enum PagemillError {
    #[error("Invalid parameter: {message}")]
    InvalidParam { message: String },

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Pool exhausted: {pool}")]
    PoolExhausted { pool: String },

    #[error("Invalid pool configuration: {message}")]
    PoolInvalid { message: String },

    #[error("Template not found: {site_group_id}/{name}")]
    TemplateNotFound { site_group_id: i64, name: String },

    #[error("Scheduler is not running")]
    SchedulerNotRunning,

    #[error("Scheduled task not found: {task_id}")]
    SchedulerTaskNotFound { task_id: String },

    #[error("Scheduled task execution failed: {message}")]
    SchedulerExecFailed { message: String },

    #[error("Database connection error: {message}")]
    DbConnection { message: String },

    #[error("Database query error: {message}")]
    DbQuery { message: String },

    #[error("Internal server error: {message}")]
    InternalServer { message: String },
}

impl PagemillError {
    pub fn invalid_param<S: Into<String>>(message: S) -> Self {
        Self::InvalidParam {
            message: message.into(),
        }
    }

    pub fn forbidden<S: Into<String>>(message: S) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn pool_exhausted<S: Into<String>>(pool: S) -> Self {
        Self::PoolExhausted { pool: pool.into() }
    }

    pub fn pool_invalid<S: Into<String>>(message: S) -> Self {
        Self::PoolInvalid {
            message: message.into(),
        }
    }

    pub fn db_query<S: Into<String>>(message: S) -> Self {
        Self::DbQuery {
            message: message.into(),
        }
    }

    pub fn db_connection<S: Into<String>>(message: S) -> Self {
        Self::DbConnection {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::InternalServer {
            message: message.into(),
        }
    }

    /// Stable numeric code for API responses and logs.
    pub fn code(&self) -> u32 {
        match self {
            Self::InvalidParam { .. } => 1001,
            Self::Unauthorized => 1002,
            Self::Forbidden { .. } => 1003,
            Self::NotFound { .. } => 1004,
            Self::Validation { .. } => 1005,
            Self::PoolExhausted { .. } => 2001,
            Self::PoolInvalid { .. } => 2002,
            Self::TemplateNotFound { .. } => 3001,
            Self::SchedulerNotRunning => 4001,
            Self::SchedulerTaskNotFound { .. } => 4002,
            Self::SchedulerExecFailed { .. } => 4003,
            Self::DbConnection { .. } => 5001,
            Self::DbQuery { .. } => 5002,
            Self::InternalServer { .. } => 5999,
        }
    }

    /// HTTP status the API layer maps this kind to.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidParam { .. } | Self::Validation { .. } => 400,
            Self::Unauthorized => 401,
            Self::Forbidden { .. } => 403,
            Self::NotFound { .. } | Self::SchedulerTaskNotFound { .. } => 404,
            Self::PoolExhausted { .. } | Self::DbConnection { .. } => 503,
            Self::PoolInvalid { .. }
            | Self::TemplateNotFound { .. }
            | Self::SchedulerNotRunning
            | Self::SchedulerExecFailed { .. }
            | Self::DbQuery { .. }
            | Self::InternalServer { .. } => 500,
        }
    }

    /// Whether retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PoolExhausted { .. } | Self::DbConnection { .. }
        )
    }
}
