use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Graded intervention kinds, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    /// Exit a configured fraction (profit ladder or early caution)
    PartialExit,
    /// Exit everything that remains, respecting slippage limits
    FullExit,
    /// Exit everything at market, bypassing slippage limits
    EmergencyExit,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ActionKind::PartialExit => "partial-exit",
            ActionKind::FullExit => "full-exit",
            ActionKind::EmergencyExit => "emergency-exit",
        };
        write!(f, "{}", name)
    }
}

/// An execution request emitted by the state machine
///
/// Created at most once per (position, decision cycle); the idempotency key
/// is deterministic over that pair so a retried dispatch cannot
/// double-execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Position to act on
    pub position_id: Uuid,
    /// What to do
    pub kind: ActionKind,
    /// Fraction of the *original* position size to exit, in (0, 1]
    pub fraction: Decimal,
    /// Human-readable trigger description
    pub reason: String,
    /// Decision cycle that emitted this request
    pub cycle: u64,
    /// Deterministic key for exactly-once dispatch
    pub idempotency_key: String,
    /// Emergency exits ignore the max-slippage tolerance
    pub bypass_slippage_limit: bool,
    /// When the request was created
    pub created_at: DateTime<Utc>,
}

impl ActionRequest {
    pub fn new(
        position_id: Uuid,
        kind: ActionKind,
        fraction: Decimal,
        reason: impl Into<String>,
        cycle: u64,
    ) -> Self {
        Self {
            position_id,
            kind,
            fraction,
            reason: reason.into(),
            cycle,
            idempotency_key: Self::idempotency_key(position_id, cycle),
            bypass_slippage_limit: kind == ActionKind::EmergencyExit,
            created_at: Utc::now(),
        }
    }

    /// Deterministic key over (position, decision cycle)
    pub fn idempotency_key(position_id: Uuid, cycle: u64) -> String {
        format!("{}:{}", position_id, cycle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_idempotency_key_deterministic() {
        let id = Uuid::new_v4();
        let a = ActionRequest::new(id, ActionKind::PartialExit, dec!(0.25), "tier", 42);
        let b = ActionRequest::new(id, ActionKind::FullExit, dec!(1.0), "other", 42);

        // Same (position, cycle) -> same key regardless of payload
        assert_eq!(a.idempotency_key, b.idempotency_key);

        let c = ActionRequest::new(id, ActionKind::PartialExit, dec!(0.25), "tier", 43);
        assert_ne!(a.idempotency_key, c.idempotency_key);
    }

    #[test]
    fn test_emergency_bypasses_slippage() {
        let id = Uuid::new_v4();
        let req = ActionRequest::new(id, ActionKind::EmergencyExit, dec!(1.0), "exploit", 1);
        assert!(req.bypass_slippage_limit);

        let req = ActionRequest::new(id, ActionKind::PartialExit, dec!(0.25), "tier", 1);
        assert!(!req.bypass_slippage_limit);
    }
}
