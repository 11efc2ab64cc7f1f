use rust_decimal::Decimal;
use vigil_core::{DepthLevel, PositionSide, Quantity};

use crate::error::{MetricError, MetricResult};

/// Result of walking the order book for a hypothetical fill
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillEstimate {
    /// Size-weighted average price across consumed levels
    pub avg_fill_price: Decimal,
    /// Price of the deepest level touched
    pub worst_price: Decimal,
    /// Quantity the book absorbed (equals the request unless it errored)
    pub filled: Quantity,
}

/// Walk depth levels and estimate the average fill price for `size`
///
/// Levels must already be ordered best-first (bids descending for a sell,
/// asks ascending for a buy); `MarketSnapshot` stores them that way. A book
/// that cannot absorb the full size is an `InsufficientDepth` error rather
/// than a partial answer, so callers never act on an optimistic estimate.
pub fn estimate_fill(levels: &[DepthLevel], size: Quantity) -> MetricResult<FillEstimate> {
    if size <= Decimal::ZERO {
        return Err(MetricError::NonPositiveSize(size.to_string()));
    }

    let mut remaining = size;
    let mut cost = Decimal::ZERO;
    let mut worst_price = Decimal::ZERO;

    for level in levels {
        if remaining.is_zero() {
            break;
        }
        let take = remaining.min(level.size);
        let notional = take
            .checked_mul(level.price)
            .ok_or(MetricError::Overflow("fill notional"))?;
        cost = cost
            .checked_add(notional)
            .ok_or(MetricError::Overflow("fill cost"))?;
        worst_price = level.price;
        remaining -= take;
    }

    if remaining > Decimal::ZERO {
        return Err(MetricError::InsufficientDepth {
            requested: size.to_string(),
            available: (size - remaining).to_string(),
        });
    }

    let avg_fill_price = cost
        .checked_div(size)
        .ok_or(MetricError::Overflow("average fill price"))?;

    Ok(FillEstimate {
        avg_fill_price,
        worst_price,
        filled: size,
    })
}

/// Adverse slippage of a fill versus the mid price, as a non-negative
/// fraction of mid
///
/// A long exit sells into bids, so a fill below mid is adverse; a short
/// exit buys from asks, so a fill above mid is adverse. Favorable fills
/// clamp to zero.
pub fn slippage_vs_mid(avg_fill_price: Decimal, mid: Decimal, side: PositionSide) -> Decimal {
    if mid.is_zero() {
        return Decimal::ZERO;
    }
    let adverse = match side {
        PositionSide::Long => mid - avg_fill_price,
        PositionSide::Short => avg_fill_price - mid,
    };
    (adverse / mid).max(Decimal::ZERO)
}
