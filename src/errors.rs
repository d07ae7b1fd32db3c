use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("BSON: {0}")]
    Bson(#[from] bson::error::Error),

    #[error("TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Collection not found: {0}")]
    NoSuchCollection(String),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Invalid index: {0}")]
    InvalidIndex(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    #[error("Bucket range error: {0}")]
    BucketRangeError(String),

    #[error("Path error: {0}")]
    PathError(String),
}
