use rust_decimal::Decimal;
use vigil_core::{Position, PositionSide};

use crate::error::{MetricError, MetricResult};

/// Distance from the current mid to the effective stop, as a fraction of
/// entry price
///
/// Long positions measure `(mid - stop) / entry`, short positions measure
/// `(stop - mid) / entry`. Zero or negative means the stop is breached.
/// The effective stop is the armed trailing stop when one is tighter than
/// the static stop-loss derived from `stop_loss_pct`.
pub fn stop_distance(
    position: &Position,
    mid: Decimal,
    stop_loss_pct: Decimal,
) -> MetricResult<Decimal> {
    let stop = position.effective_stop(stop_loss_pct);
    let raw = match position.side() {
        PositionSide::Long => mid - stop,
        PositionSide::Short => stop - mid,
    };
    raw.checked_div(position.entry_price)
        .ok_or(MetricError::Overflow("stop distance"))
}
