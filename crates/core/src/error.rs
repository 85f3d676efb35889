use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("video asset not found: {0}")]
    AssetNotFound(PathBuf),

    #[error("failed to decode video: {0}")]
    Decode(String),

    #[error("invalid segmentation config: {0}")]
    InvalidSegmentation(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("registry snapshot write failed: {0}")]
    SnapshotWrite(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("registry error: {0}")]
    Registry(String),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("video '{0}' not found in registry")]
    RegistryNotFound(String),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("search request failed: {0}")]
    Request(String),

    #[error("clip extraction failed: {0}")]
    Extraction(String),
}

impl From<ExtractError> for SearchError {
    fn from(error: ExtractError) -> Self {
        SearchError::Extraction(error.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid clip range: start {start} must be less than end {end}")]
    InvalidRange { start: f64, end: f64 },

    #[error("clip extraction failed: {0}")]
    Extraction(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
