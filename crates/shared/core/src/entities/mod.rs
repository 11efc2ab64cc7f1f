//! Domain entities for the risk engine

mod action;
mod event;
mod metric;
mod position;
mod signals;
mod snapshot;
mod state;

pub use action::{ActionKind, ActionRequest};
pub use event::EngineEvent;
pub use metric::{RiskMetric, UrgencyScore};
pub use position::{CollateralLeg, DebtLeg, Exposure, Position, PositionSide};
pub use signals::AuxSignals;
pub use snapshot::{DepthLevel, MarketSnapshot, MarketView};
pub use state::PositionState;
