use rust_decimal::{Decimal, RoundingStrategy};
use vigil_core::{CollateralLeg, DebtLeg, MarketView};

use crate::error::{MetricError, MetricResult};

/// Decimal places monetary leg values are rounded to
const VALUE_DP: u32 = 8;

/// Health factor: weighted collateral value / total debt value
///
/// `Σ balance_i * price_i * liquidation_threshold_i / Σ debt_j * price_j`.
///
/// Zero debt returns the `Decimal::MAX` sentinel - "infinitely healthy",
/// never a division fault. Collateral values round toward zero and debt
/// values round away from zero, so the computed factor is a lower bound on
/// the true ratio: rounding error can tighten protection but never loosen it.
pub fn health_factor(
    collateral: &[CollateralLeg],
    debt: &[DebtLeg],
    view: &MarketView,
) -> MetricResult<Decimal> {
    let mut weighted_collateral = Decimal::ZERO;
    for leg in collateral {
        let price = view
            .price(&leg.asset)
            .ok_or_else(|| MetricError::MissingPrice(leg.asset.clone()))?;
        let value = leg
            .balance
            .checked_mul(price)
            .and_then(|v| v.checked_mul(leg.liquidation_threshold))
            .ok_or(MetricError::Overflow("collateral value"))?
            .round_dp_with_strategy(VALUE_DP, RoundingStrategy::ToZero);
        weighted_collateral = weighted_collateral
            .checked_add(value)
            .ok_or(MetricError::Overflow("collateral sum"))?;
    }

    let mut total_debt = Decimal::ZERO;
    for leg in debt {
        let price = view
            .price(&leg.asset)
            .ok_or_else(|| MetricError::MissingPrice(leg.asset.clone()))?;
        let value = leg
            .balance
            .checked_mul(price)
            .ok_or(MetricError::Overflow("debt value"))?
            .round_dp_with_strategy(VALUE_DP, RoundingStrategy::AwayFromZero);
        total_debt = total_debt
            .checked_add(value)
            .ok_or(MetricError::Overflow("debt sum"))?;
    }

    if total_debt.is_zero() {
        return Ok(Decimal::MAX);
    }

    weighted_collateral
        .checked_div(total_debt)
        .ok_or(MetricError::Overflow("health factor"))
}
