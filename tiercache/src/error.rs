use thiserror::Error;

/// Main error type for cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Stored value for key {key} is not a valid {expected}")]
    ConversionMismatch { key: String, expected: &'static str },

    #[error("Write failed on {failed} of {total} cache layers")]
    AggregateWrite { failed: usize, total: usize },

    #[error(transparent)]
    Load(anyhow::Error),

    #[error("Item cost {cost} exceeds cache budget {max_cost}")]
    Rejected { cost: u64, max_cost: u64 },

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Cache worker already closed")]
    Closed,
}

impl CacheError {
    /// True when the error only reports an absent key
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound(_))
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
