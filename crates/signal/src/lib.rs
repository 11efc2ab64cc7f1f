//! Vigil Signal Aggregator
//!
//! Folds the price-derived drawdown and qualitative risk inputs into one
//! bounded urgency score in [0, 100]. Pure and deterministic: the same
//! inputs always produce the same score, and no state is kept between
//! cycles.
//!
//! Scoring is data-driven. Every tier is a rule row in a [`ScoringTable`]
//! (threshold + weight, count + cap, or flag + weight) evaluated by one
//! generic fold, so weights are tuned in configuration rather than code.
//! Threshold comparisons use `>=`: borderline readings score, failing
//! toward caution.

mod error;
mod rules;

pub use error::{SignalError, SignalResult};
pub use rules::{CountRule, FlagInput, FlagRule, RuleInput, ScoringTable, ThresholdRule};

use rust_decimal::Decimal;
use vigil_core::{AuxSignals, UrgencyScore};

/// Everything one scoring pass looks at
#[derive(Debug, Clone)]
pub struct SignalInputs<'a> {
    /// Fractional drawdown from the position's high-water mark
    pub drawdown_from_peak: Decimal,
    /// Qualitative signals for the position's asset
    pub aux: &'a AuxSignals,
    /// Consecutive cycles the market view has been stale
    pub staleness: u32,
}

/// Fold the scoring table over the inputs into an urgency score
///
/// The explicit emergency flag short-circuits to the maximum score.
/// Otherwise each firing rule adds its weight with saturation at 100, and
/// prolonged stale data raises the result to the configured floor (unknown
/// risk is not zero risk).
pub fn aggregate(table: &ScoringTable, inputs: &SignalInputs<'_>) -> UrgencyScore {
    if inputs.aux.emergency {
        return UrgencyScore::MAX;
    }

    let mut score = UrgencyScore::ZERO;

    for rule in &table.threshold_rules {
        if observe(rule.input, inputs) >= rule.threshold {
            score = score.saturating_add(rule.weight);
        }
    }

    let whale_points = inputs
        .aux
        .whale_exits
        .saturating_mul(table.whale_exit_rule.per_unit as u32)
        .min(table.whale_exit_rule.cap as u32) as u8;
    score = score.saturating_add(whale_points);

    for rule in &table.flag_rules {
        if flag_set(rule.input, inputs.aux) {
            score = score.saturating_add(rule.weight);
        }
    }

    if inputs.staleness >= table.stale_floor_after {
        score = score.at_least(table.stale_floor);
    }

    score
}

fn observe(input: RuleInput, inputs: &SignalInputs<'_>) -> Decimal {
    match input {
        RuleInput::DrawdownFromPeak => inputs.drawdown_from_peak,
        RuleInput::WhaleVolumeShare => inputs.aux.whale_volume_share,
        RuleInput::SentimentDrop => inputs.aux.sentiment_drop,
        RuleInput::ContractRiskJump => inputs.aux.contract_risk_jump,
        RuleInput::LiquidityDrop => inputs.aux.liquidity_drop,
    }
}

fn flag_set(input: FlagInput, aux: &AuxSignals) -> bool {
    match input {
        FlagInput::AttentionDeclining => aux.attention_declining,
        FlagInput::BelowMovingAverage => aux.below_moving_average,
        FlagInput::Oversold => aux.oversold,
    }
}
