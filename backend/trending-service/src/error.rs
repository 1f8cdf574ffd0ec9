//! Trends error types

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrendsError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid trend configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

impl TrendsError {
    /// Short label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Redis(_) => "redis",
            Self::Serialization(_) => "serialization",
            Self::Storage(_) => "storage",
            Self::InvalidConfig(_) => "config",
            Self::InvalidInput(_) => "input",
            Self::Timeout(_) => "timeout",
        }
    }
}

pub type Result<T> = std::result::Result<T, TrendsError>;
