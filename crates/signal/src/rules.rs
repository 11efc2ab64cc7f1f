use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{SignalError, SignalResult};

/// Which observed quantity a threshold rule tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleInput {
    /// Fractional drawdown from the position's high-water mark
    DrawdownFromPeak,
    /// Share of recent volume attributable to exiting large holders
    WhaleVolumeShare,
    /// Magnitude of a sentiment collapse since the last observation
    SentimentDrop,
    /// Jump in the contract/solvency risk score
    ContractRiskJump,
    /// Fractional drop in backing liquidity
    LiquidityDrop,
}

/// Boolean sub-signals scored by flag rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagInput {
    /// Attention/volume trending down
    AttentionDeclining,
    /// Price below its moving average
    BelowMovingAverage,
    /// Oversold technical indicator
    Oversold,
}

/// Adds `weight` when the observed input reaches `threshold`
///
/// Comparison is `>=`: a borderline reading scores, failing toward caution.
/// Several rules may watch the same input at different thresholds; their
/// weights stack (the drawdown ladder works this way).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub input: RuleInput,
    pub threshold: Decimal,
    pub weight: u8,
}

/// Adds `per_unit` for every counted occurrence, up to `cap`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountRule {
    pub per_unit: u8,
    pub cap: u8,
}

/// Adds `weight` when a boolean sub-signal is set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagRule {
    pub input: FlagInput,
    pub weight: u8,
}

/// The complete, data-driven scoring configuration
///
/// Every tier the aggregator can award lives here as a rule row, so weights
/// are tunable (and testable) without touching the evaluator. `validate`
/// checks the table cannot overflow the score bound even with every rule
/// firing at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringTable {
    /// Threshold-gated tiers
    pub threshold_rules: Vec<ThresholdRule>,
    /// Per-occurrence scoring of distinct large-holder exits
    pub whale_exit_rule: CountRule,
    /// Boolean tiers
    pub flag_rules: Vec<FlagRule>,
    /// Consecutive stale cycles after which the floor applies
    pub stale_floor_after: u32,
    /// Minimum urgency once data has been stale that long
    pub stale_floor: u8,
}

impl Default for ScoringTable {
    fn default() -> Self {
        Self {
            threshold_rules: vec![
                ThresholdRule {
                    input: RuleInput::DrawdownFromPeak,
                    threshold: dec!(0.30),
                    weight: 15,
                },
                ThresholdRule {
                    input: RuleInput::DrawdownFromPeak,
                    threshold: dec!(0.50),
                    weight: 15,
                },
                ThresholdRule {
                    input: RuleInput::WhaleVolumeShare,
                    threshold: dec!(0.40),
                    weight: 10,
                },
                ThresholdRule {
                    input: RuleInput::SentimentDrop,
                    threshold: dec!(0.30),
                    weight: 10,
                },
                ThresholdRule {
                    input: RuleInput::ContractRiskJump,
                    threshold: dec!(0.25),
                    weight: 10,
                },
                ThresholdRule {
                    input: RuleInput::LiquidityDrop,
                    threshold: dec!(0.20),
                    weight: 5,
                },
            ],
            whale_exit_rule: CountRule {
                per_unit: 5,
                cap: 15,
            },
            flag_rules: vec![
                FlagRule {
                    input: FlagInput::AttentionDeclining,
                    weight: 10,
                },
                FlagRule {
                    input: FlagInput::BelowMovingAverage,
                    weight: 5,
                },
                FlagRule {
                    input: FlagInput::Oversold,
                    weight: 5,
                },
            ],
            stale_floor_after: 3,
            stale_floor: 10,
        }
    }
}

impl ScoringTable {
    /// Worst-case score with every rule firing at full weight
    pub fn max_score(&self) -> u32 {
        let thresholds: u32 = self.threshold_rules.iter().map(|r| r.weight as u32).sum();
        let flags: u32 = self.flag_rules.iter().map(|r| r.weight as u32).sum();
        thresholds + self.whale_exit_rule.cap as u32 + flags
    }

    /// Reject tables whose weights could sum past the score bound
    pub fn validate(&self) -> SignalResult<()> {
        let total = self.max_score();
        if total > 100 {
            return Err(SignalError::WeightsExceedBound { total });
        }
        if self.whale_exit_rule.per_unit > self.whale_exit_rule.cap {
            return Err(SignalError::CountRuleExceedsCap {
                per_unit: self.whale_exit_rule.per_unit,
                cap: self.whale_exit_rule.cap,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_is_valid() {
        let table = ScoringTable::default();
        assert!(table.validate().is_ok());
        assert_eq!(table.max_score(), 100);
    }

    #[test]
    fn test_overweight_table_rejected() {
        let mut table = ScoringTable::default();
        table.flag_rules.push(FlagRule {
            input: FlagInput::Oversold,
            weight: 20,
        });

        let err = table.validate().unwrap_err();
        assert_eq!(err, SignalError::WeightsExceedBound { total: 120 });
    }

    #[test]
    fn test_count_rule_per_unit_above_cap_rejected() {
        let mut table = ScoringTable::default();
        table.whale_exit_rule = CountRule {
            per_unit: 20,
            cap: 15,
        };

        assert!(matches!(
            table.validate().unwrap_err(),
            SignalError::CountRuleExceedsCap { .. }
        ));
    }

    #[test]
    fn test_table_round_trips_through_json() {
        let table = ScoringTable::default();
        let json = serde_json::to_string(&table).unwrap();
        let back: ScoringTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back, table);
    }
}
