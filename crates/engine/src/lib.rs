//! Vigil Position State Machine
//!
//! Owns per-position lifecycle state and all transition rules:
//! - Urgency bands: trim at 40, stage a larger exit at 60, emergency-exit
//!   at 80 (inclusive, configurable)
//! - Hysteresis: leaving a band requires urgency below the entry threshold
//!   by a margin for N consecutive cycles, so boundary oscillation cannot
//!   flap the state
//! - Profit ladder: partial exits at configured profit multiples, each rung
//!   firing exactly once
//! - Trailing stop: arms at the profit-protect multiple, then ratchets
//!   toward the high-water mark and never loosens
//!
//! One action per position per cycle, and none while a previous action is
//! unresolved. Quantities advance only on dispatcher-confirmed fills.

mod config;
mod error;
mod machine;

pub use config::{EngineConfig, ProfitTier};
pub use error::{EngineError, EngineResult};
pub use machine::{CycleInput, CycleOutcome, PositionMachine, transition_event_to};
