use thiserror::Error;
use uuid::Uuid;

/// Errors from the market feed collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("Snapshot is stale ({age_ms}ms old)")]
    Stale { age_ms: u64 },

    #[error("Feed call timed out")]
    Timeout,

    #[error("Feed unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown asset: {0}")]
    UnknownAsset(String),
}

pub type FeedResult<T> = std::result::Result<T, FeedError>;

/// Errors from the executor collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("Executor rejected the request: {0}")]
    Rejected(String),

    #[error("Executor call timed out")]
    Timeout,

    #[error("Executor unavailable: {0}")]
    Unavailable(String),
}

pub type ExecutorResult<T> = std::result::Result<T, ExecutorError>;

/// Errors from the position store collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Position not found: {0}")]
    NotFound(Uuid),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
