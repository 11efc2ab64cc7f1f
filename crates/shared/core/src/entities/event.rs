use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::metric::{RiskMetric, UrgencyScore};
use super::state::PositionState;
use crate::values::AssetId;

/// Structured observability event
///
/// Emitted once per notable occurrence and serialized as JSON for external
/// logging/alerting. The engine itself never consumes these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A position changed state
    Transition {
        position_id: Uuid,
        from: PositionState,
        to: PositionState,
        metric: Option<RiskMetric>,
        urgency: UrgencyScore,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// A position was evaluated against stale market data
    StaleData {
        position_id: Uuid,
        asset: AssetId,
        /// Consecutive cycles served from stale data
        staleness: u32,
        timestamp: DateTime<Utc>,
    },
    /// Dispatch kept failing past the retry cap; needs external attention
    ActionStuck {
        position_id: Uuid,
        attempts: u32,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// A position was frozen after an arithmetic fault
    PositionHalted {
        position_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// Position this event concerns
    pub fn position_id(&self) -> Uuid {
        match self {
            EngineEvent::Transition { position_id, .. }
            | EngineEvent::StaleData { position_id, .. }
            | EngineEvent::ActionStuck { position_id, .. }
            | EngineEvent::PositionHalted { position_id, .. } => *position_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_transition_event_serializes_tagged() {
        let event = EngineEvent::Transition {
            position_id: Uuid::nil(),
            from: PositionState::Active,
            to: PositionState::Trimming,
            metric: Some(RiskMetric::StopDistance(dec!(0.4))),
            urgency: UrgencyScore::new(45),
            reason: "urgency in trim band".to_string(),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"transition\""));
        assert!(json.contains("\"to\":\"Trimming\""));
    }
}
