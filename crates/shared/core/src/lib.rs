//! Vigil Core Domain
//!
//! Pure domain types for the Vigil position risk engine.
//! This crate contains no async, no I/O, and is 100% unit testable.

pub mod entities;
pub mod values;

// Re-export commonly used types at crate root
pub use entities::{
    // Actions
    ActionKind,
    ActionRequest,
    // Qualitative signals
    AuxSignals,
    CollateralLeg,
    DebtLeg,
    DepthLevel,
    // Observability
    EngineEvent,
    Exposure,
    // Market data
    MarketSnapshot,
    MarketView,
    // Position lifecycle
    Position,
    PositionSide,
    PositionState,
    // Derived values
    RiskMetric,
    UrgencyScore,
};
pub use values::{AssetId, Fraction, Price, Quantity, Timestamp};
