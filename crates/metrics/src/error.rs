use thiserror::Error;
use vigil_core::AssetId;

/// Errors from pure metric calculations
///
/// These never abort an evaluation cycle: callers resolve them to the
/// cautious side. `MissingPrice` keeps the position evaluated under the
/// unknown-risk urgency floor, `InsufficientDepth` blocks the action as a
/// failed attempt, `Overflow` freezes the affected position only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetricError {
    #[error("No price available for {0}")]
    MissingPrice(AssetId),

    #[error("Order book cannot fill the requested size (requested {requested}, available {available})")]
    InsufficientDepth { requested: String, available: String },

    #[error("Requested fill size must be positive (got {0})")]
    NonPositiveSize(String),

    #[error("Arithmetic overflow in {0}")]
    Overflow(&'static str),
}

pub type MetricResult<T> = std::result::Result<T, MetricError>;
