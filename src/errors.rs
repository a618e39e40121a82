use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("request to {url} failed with status {status}")]
    Fetch { url: String, status: u16 },
    #[error("could not resolve location: {0}")]
    Resolution(String),
    #[error("record rejected: {0}")]
    Normalization(String),
    #[error("unexpected response shape: {0}")]
    Schema(String),
    #[error("{0}")]
    Config(String),
    #[error("request cancelled before it was sent")]
    Cancelled,
}

impl AppError {
    /// True for failures of the outbound call itself (transport, status, timeout).
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, AppError::Http(_) | AppError::Fetch { .. })
    }
}
