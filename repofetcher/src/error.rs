use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoFetcherError {
    #[error("code host API error: {0}")]
    GitHub(#[from] octocrab::Error),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RepoFetcherError>;
