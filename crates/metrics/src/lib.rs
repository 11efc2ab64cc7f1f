//! Vigil Metric Calculator
//!
//! Pure functions turning a position plus a market view into a scalar risk
//! metric and auxiliary liquidity signals. No side effects, no shared state:
//! safe to call concurrently for disjoint positions.
//!
//! Numeric policy: all monetary math stays in `Decimal` (fixed-point) -
//! never floating point in the liquidation path. Rounding always favors the
//! position holder (collateral rounds down, debt rounds up) so rounding can
//! never trigger a premature liquidation. Overflow-prone multiplications use
//! checked arithmetic; an overflow is reported, not panicked.

mod error;
mod health;
mod slippage;
mod stop;

pub use error::{MetricError, MetricResult};
pub use health::health_factor;
pub use slippage::{FillEstimate, estimate_fill, slippage_vs_mid};
pub use stop::stop_distance;

use rust_decimal::Decimal;
use vigil_core::{Exposure, MarketView, Position, RiskMetric};

/// Compute the risk metric for a position against a market view
///
/// Leveraged positions get a health factor; directional positions get a
/// stop distance measured against the effective stop (armed trailing stop,
/// or `stop_loss_pct` from entry).
pub fn compute_metric(
    position: &Position,
    view: &MarketView,
    stop_loss_pct: Decimal,
) -> MetricResult<RiskMetric> {
    match &position.exposure {
        Exposure::Leveraged { collateral, debt } => {
            health_factor(collateral, debt, view).map(RiskMetric::HealthFactor)
        }
        Exposure::Directional { .. } => {
            let mid = view
                .price(&position.asset)
                .ok_or_else(|| MetricError::MissingPrice(position.asset.clone()))?;
            stop_distance(position, mid, stop_loss_pct).map(RiskMetric::StopDistance)
        }
    }
}
