//! Error types for geoview-retrieve.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("unsupported URL: {0}")]
    UnsupportedUrl(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("request timeout")]
    Timeout,

    #[error("cache error: {0}")]
    Cache(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("retrieval interrupted")]
    Interrupted,

    #[error("retriever panicked: {0}")]
    Panicked(String),
}

impl From<toml::de::Error> for RetrievalError {
    fn from(e: toml::de::Error) -> Self { RetrievalError::Config(e.to_string()) }
}

impl From<url::ParseError> for RetrievalError {
    fn from(e: url::ParseError) -> Self { RetrievalError::UnsupportedUrl(e.to_string()) }
}

pub type Result<T> = std::result::Result<T, RetrievalError>;
