use std::path::PathBuf;
use thiserror::Error;

use crate::embedding::EmbeddingError;

/// Main error type for prefrank
#[derive(Error, Debug)]
pub enum PrefrankError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Database errors outside of candidate queries (migrations, phrase store, cache)
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Candidate store failures. Always fatal for the ranking request.
    #[error("Candidate store error: {0}")]
    Store(#[from] StoreError),

    /// Embedding provider failures
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Malformed ranking request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors raised by the candidate store adapter
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backing store rejected or failed the query
    #[error("Query failed ({context}): {source}")]
    QueryFailed {
        context: String,
        source: rusqlite::Error,
    },

    /// No connection could be checked out of the pool
    #[error("Connection pool error: {0}")]
    Pool(String),

    /// The filter cannot be expressed against the catalog schema
    #[error("Unsupported filter '{name}': {reason}")]
    UnsupportedFilter { name: String, reason: String },
}

impl StoreError {
    pub fn query(context: impl Into<String>, source: rusqlite::Error) -> Self {
        Self::QueryFailed {
            context: context.into(),
            source,
        }
    }

    pub fn unsupported(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedFilter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for prefrank operations
pub type Result<T> = std::result::Result<T, PrefrankError>;
