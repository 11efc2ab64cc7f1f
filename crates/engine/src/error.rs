use thiserror::Error;

/// State machine errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("Dispatch result received with no action in flight")]
    NoActionInFlight,
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
