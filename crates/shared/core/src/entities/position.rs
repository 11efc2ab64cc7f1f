use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::values::AssetId;

/// Position side - long (bought) or short (sold)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    /// Long position - bought the asset, profit when price rises
    Long,
    /// Short position - sold borrowed asset, profit when price falls
    Short,
}

impl PositionSide {
    /// Returns the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            PositionSide::Long => PositionSide::Short,
            PositionSide::Short => PositionSide::Long,
        }
    }
}

/// One collateral leg of a leveraged position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollateralLeg {
    /// Collateral asset
    pub asset: AssetId,
    /// Balance in asset units
    pub balance: Decimal,
    /// Liquidation threshold weight applied to this collateral (e.g. 0.80)
    pub liquidation_threshold: Decimal,
}

impl CollateralLeg {
    pub fn new(asset: impl Into<AssetId>, balance: Decimal, liquidation_threshold: Decimal) -> Self {
        Self {
            asset: asset.into(),
            balance,
            liquidation_threshold,
        }
    }
}

/// One debt leg of a leveraged position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebtLeg {
    /// Borrowed asset
    pub asset: AssetId,
    /// Balance owed, in asset units
    pub balance: Decimal,
}

impl DebtLeg {
    pub fn new(asset: impl Into<AssetId>, balance: Decimal) -> Self {
        Self {
            asset: asset.into(),
            balance,
        }
    }
}

/// What kind of exposure a position carries
///
/// The engine is generic over the financial product: a leveraged position is
/// scored by health factor (weighted collateral vs. debt), a directional
/// position by distance to its (trailing) stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Exposure {
    /// Collateralized debt position (lending protocol style)
    Leveraged {
        collateral: Vec<CollateralLeg>,
        debt: Vec<DebtLeg>,
    },
    /// Directional holding in a single traded asset
    Directional { side: PositionSide },
}

/// A tracked position - the engine's unit of evaluation
///
/// Exclusively owned lifecycle object: created on open, mutated only through
/// dispatch-confirmed fills, archived when quantity reaches zero after a
/// confirmed full exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Unique position identifier
    pub id: Uuid,

    /// Primary asset (the traded asset for directional positions, the
    /// reference asset for leveraged ones)
    pub asset: AssetId,

    /// Kind of exposure (decides which risk metric applies)
    pub exposure: Exposure,

    /// Average entry price of the primary asset
    pub entry_price: Decimal,

    /// Remaining quantity (always >= 0)
    pub quantity: Decimal,

    /// Quantity at open; exit fractions are expressed against this
    pub original_quantity: Decimal,

    /// Cumulative confirmed exited fraction of the original size, in [0, 1]
    pub exited_fraction: Decimal,

    /// Realized profit/loss from confirmed exits
    pub realized_pnl: Decimal,

    /// Trailing stop price, once armed. Ratchets monotonically in the
    /// profit-protecting direction and never loosens.
    pub stop_price: Option<Decimal>,

    /// Most favorable mid price observed since entry (highest for longs,
    /// lowest for shorts)
    pub high_water_mark: Decimal,

    /// When the position was opened
    pub opened_at: DateTime<Utc>,

    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// Open a new directional position
    pub fn directional(
        asset: impl Into<AssetId>,
        side: PositionSide,
        quantity: Decimal,
        entry_price: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            asset: asset.into(),
            exposure: Exposure::Directional { side },
            entry_price,
            quantity,
            original_quantity: quantity,
            exited_fraction: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            stop_price: None,
            high_water_mark: entry_price,
            opened_at: now,
            updated_at: now,
        }
    }

    /// Open a new leveraged (collateral vs. debt) position
    pub fn leveraged(
        asset: impl Into<AssetId>,
        collateral: Vec<CollateralLeg>,
        debt: Vec<DebtLeg>,
        quantity: Decimal,
        entry_price: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            asset: asset.into(),
            exposure: Exposure::Leveraged { collateral, debt },
            entry_price,
            quantity,
            original_quantity: quantity,
            exited_fraction: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            stop_price: None,
            high_water_mark: entry_price,
            opened_at: now,
            updated_at: now,
        }
    }

    /// Side of the exposure (leveraged positions behave like longs on their
    /// collateral value)
    pub fn side(&self) -> PositionSide {
        match &self.exposure {
            Exposure::Directional { side } => *side,
            Exposure::Leveraged { .. } => PositionSide::Long,
        }
    }

    /// Fraction of the original size still open, in [0, 1]
    pub fn remaining_fraction(&self) -> Decimal {
        (Decimal::ONE - self.exited_fraction).max(Decimal::ZERO)
    }

    /// Check if position is fully closed (quantity is zero)
    pub fn is_closed(&self) -> bool {
        self.quantity == Decimal::ZERO
    }

    /// Profit multiple relative to entry (1.0 = break-even, 3.0 = 3x)
    ///
    /// Side-aware: for shorts, a falling price raises the multiple.
    pub fn profit_multiple(&self, mid_price: Decimal) -> Decimal {
        if self.entry_price == Decimal::ZERO {
            return Decimal::ONE;
        }
        match self.side() {
            PositionSide::Long => mid_price / self.entry_price,
            PositionSide::Short => Decimal::TWO - mid_price / self.entry_price,
        }
    }

    /// Drawdown from the high-water mark as a fraction in [0, 1]
    pub fn drawdown_from_peak(&self, mid_price: Decimal) -> Decimal {
        if self.high_water_mark == Decimal::ZERO {
            return Decimal::ZERO;
        }
        let dd = match self.side() {
            PositionSide::Long => (self.high_water_mark - mid_price) / self.high_water_mark,
            PositionSide::Short => (mid_price - self.high_water_mark) / self.high_water_mark,
        };
        dd.max(Decimal::ZERO)
    }

    /// Observe a new mid price, ratcheting the high-water mark toward the
    /// favorable extreme
    pub fn observe_price(&mut self, mid_price: Decimal) {
        let improved = match self.side() {
            PositionSide::Long => mid_price > self.high_water_mark,
            PositionSide::Short => mid_price < self.high_water_mark,
        };
        if improved {
            self.high_water_mark = mid_price;
            self.updated_at = Utc::now();
        }
    }

    /// Propose a new trailing stop price. The stop only ever moves in the
    /// profit-protecting direction; a looser candidate is ignored.
    ///
    /// Returns true if the stop moved.
    pub fn ratchet_stop(&mut self, candidate: Decimal) -> bool {
        let tightened = match (self.stop_price, self.side()) {
            (None, _) => true,
            (Some(current), PositionSide::Long) => candidate > current,
            (Some(current), PositionSide::Short) => candidate < current,
        };
        if tightened {
            self.stop_price = Some(candidate);
            self.updated_at = Utc::now();
        }
        tightened
    }

    /// Is the (armed or implied) stop breached at this mid price?
    ///
    /// Without an armed trailing stop, the implied stop sits `stop_loss_pct`
    /// on the losing side of entry.
    pub fn stop_breached(&self, mid_price: Decimal, stop_loss_pct: Decimal) -> bool {
        let stop = self.effective_stop(stop_loss_pct);
        match self.side() {
            PositionSide::Long => mid_price <= stop,
            PositionSide::Short => mid_price >= stop,
        }
    }

    /// The stop price currently in force: the armed trailing stop, or the
    /// absolute stop-loss distance from entry
    pub fn effective_stop(&self, stop_loss_pct: Decimal) -> Decimal {
        match self.stop_price {
            Some(stop) => stop,
            None => match self.side() {
                PositionSide::Long => self.entry_price * (Decimal::ONE - stop_loss_pct),
                PositionSide::Short => self.entry_price * (Decimal::ONE + stop_loss_pct),
            },
        }
    }

    /// Apply a confirmed fill for `fraction` of the original size at
    /// `fill_price`. The fraction is capped at what remains, so confirmed
    /// exits can never sum past the original quantity.
    ///
    /// Returns the realized P&L of the exited portion.
    pub fn apply_fill(&mut self, fraction: Decimal, fill_price: Decimal) -> Decimal {
        let applied = fraction.max(Decimal::ZERO).min(self.remaining_fraction());
        let qty = (applied * self.original_quantity).min(self.quantity);

        let price_diff = fill_price - self.entry_price;
        let pnl = match self.side() {
            PositionSide::Long => qty * price_diff,
            PositionSide::Short => qty * -price_diff,
        };

        self.realized_pnl += pnl;
        self.quantity -= qty;
        self.exited_fraction = (self.exited_fraction + applied).min(Decimal::ONE);
        self.updated_at = Utc::now();
        pnl
    }
}
