use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Snapshot fields are missing or non-numeric. The poll cycle is skipped.
    #[error("Malformed snapshot: {0}")]
    MalformedSnapshot(String),

    /// No round progress between two health checks.
    #[error("Upstream source is stale: no new round since #{0:?}")]
    StaleSource(Option<u64>),

    /// Gateway call failed or timed out. Tracker state is left untouched.
    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    /// Data source adapter failed or timed out. Retryable.
    #[error("Snapshot source error: {0}")]
    Source(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// True for failures of the persistence layer, which leave the tracker
    /// state uncommitted so the next cycle replays the same writes.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            AppError::PersistenceUnavailable(_) | AppError::Database(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::PersistenceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_) | AppError::Migration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
