//! Error types shared by every tier.
//!
//! Storage-specific failures (filesystem, SQLite, Redis) are folded into
//! [`CacheError`] at the tier boundary. The coordinator only ever looks at
//! the coarse [`ErrorKind`], so it never depends on a backing technology.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata index error: {0}")]
    Index(#[from] rusqlite::Error),

    #[error("network error: {0}")]
    Network(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("tier is unavailable")]
    Unavailable,
}

/// Coarse classification of a [`CacheError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Disk or network failure. Degrades to a miss or a failed write.
    TransientIo,
    /// A value could not be encoded or decoded. Tier-local.
    Serialization,
    /// Invalid bounds detected at construction time.
    Configuration,
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::Io(_)
            | CacheError::Index(_)
            | CacheError::Network(_)
            | CacheError::Timeout(_)
            | CacheError::Unavailable => ErrorKind::TransientIo,
            CacheError::Serialization(_) => ErrorKind::Serialization,
            CacheError::Configuration(_) => ErrorKind::Configuration,
        }
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        CacheError::Configuration(msg.into())
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        CacheError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

impl From<tokio::task::JoinError> for CacheError {
    fn from(e: tokio::task::JoinError) -> Self {
        CacheError::Io(std::io::Error::other(e))
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
