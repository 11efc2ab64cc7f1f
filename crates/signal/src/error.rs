use thiserror::Error;

/// Scoring table configuration errors, caught at startup
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalError {
    #[error("Scoring table weights sum to {total}, above the 100-point bound")]
    WeightsExceedBound { total: u32 },

    #[error("Count rule awards {per_unit} per occurrence but caps at {cap}")]
    CountRuleExceedsCap { per_unit: u8, cap: u8 },
}

pub type SignalResult<T> = std::result::Result<T, SignalError>;
