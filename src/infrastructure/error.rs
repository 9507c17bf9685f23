use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid clock time '{0}': expected HH:MM")]
    InvalidTime(String),
    #[error("notification service unavailable: {0}")]
    PlatformUnavailable(String),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}
