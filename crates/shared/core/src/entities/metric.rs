use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Scalar risk metric for a position
///
/// Which variant applies depends on the position's exposure kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RiskMetric {
    /// Weighted collateral value / debt value. `Decimal::MAX` is the
    /// sentinel for "no debt" - never a division fault. Below 1.0 the
    /// position is conventionally liquidatable.
    HealthFactor(Decimal),
    /// (mid - stop) / entry for a directional position (sign mirrored for
    /// shorts). Non-positive means the stop is breached.
    StopDistance(Decimal),
}

impl RiskMetric {
    /// The raw metric value
    pub fn value(&self) -> Decimal {
        match self {
            RiskMetric::HealthFactor(v) | RiskMetric::StopDistance(v) => *v,
        }
    }

    /// Is this the no-debt sentinel?
    pub fn is_infinite(&self) -> bool {
        matches!(self, RiskMetric::HealthFactor(v) if *v == Decimal::MAX)
    }
}

impl std::fmt::Display for RiskMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskMetric::HealthFactor(v) if *v == Decimal::MAX => write!(f, "hf=inf"),
            RiskMetric::HealthFactor(v) => write!(f, "hf={}", v),
            RiskMetric::StopDistance(v) => write!(f, "stop_dist={}", v),
        }
    }
}

/// Bounded urgency score in [0, 100]
///
/// Composed from weighted sub-signals by the signal aggregator; drives the
/// position state machine's band thresholds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct UrgencyScore(u8);

impl UrgencyScore {
    pub const ZERO: UrgencyScore = UrgencyScore(0);
    pub const MAX: UrgencyScore = UrgencyScore(100);

    /// Create a score, clamping to [0, 100]
    pub fn new(value: u8) -> Self {
        Self(value.min(100))
    }

    /// The score value
    pub fn value(&self) -> u8 {
        self.0
    }

    /// Add a weight, saturating at 100
    pub fn saturating_add(self, weight: u8) -> Self {
        Self((self.0.saturating_add(weight)).min(100))
    }

    /// Raise the score to at least `floor`
    pub fn at_least(self, floor: u8) -> Self {
        Self(self.0.max(floor.min(100)))
    }
}

impl std::fmt::Display for UrgencyScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for UrgencyScore {
    fn from(value: u8) -> Self {
        Self::new(value)
    }
}
