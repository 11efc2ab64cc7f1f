use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// One rung of the profit-taking ladder
///
/// When the position's profit multiple reaches `multiple`, a partial exit
/// for `fraction` of the original size is emitted. Each rung fires at most
/// once over the life of a position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfitTier {
    /// Profit multiple that arms this rung (2 = price doubled)
    pub multiple: Decimal,
    /// Fraction of the original size to exit
    pub fraction: Decimal,
}

impl ProfitTier {
    pub fn new(multiple: Decimal, fraction: Decimal) -> Self {
        Self { multiple, fraction }
    }
}

/// State machine tuning for one engine instance
///
/// Validated once at startup; the machine itself never re-checks these
/// relationships.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Urgency at which trimming begins (inclusive)
    pub trim_band_start: u8,
    /// Urgency at which a larger staged exit begins (inclusive)
    pub exit_band_start: u8,
    /// Urgency at which the position is emergency-exited (inclusive)
    pub emergency_threshold: u8,

    /// Points below a band's entry threshold urgency must fall before the
    /// band is considered left
    pub hysteresis_margin: u8,
    /// Consecutive below-margin cycles required to revert toward Active
    pub hysteresis_cycles: u32,

    /// Fraction of original size exited on entering the trim band
    pub trim_fraction: Decimal,
    /// Fraction of original size exited on entering the exit band
    pub exit_fraction: Decimal,

    /// Static stop-loss distance from entry, as a fraction of entry price
    pub stop_loss_pct: Decimal,
    /// Profit multiple at which the trailing stop arms
    pub profit_protect_multiple: Decimal,
    /// Trailing distance of the armed stop below the high-water mark
    pub trail_pct: Decimal,
    /// Tighter trailing distance applied when the exit band is entered
    pub tightened_trail_pct: Decimal,

    /// Profit-taking ladder, ascending by multiple
    pub profit_tiers: Vec<ProfitTier>,

    /// Consecutive failed dispatches before the position is reported stuck
    pub max_failed_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trim_band_start: 40,
            exit_band_start: 60,
            emergency_threshold: 80,
            hysteresis_margin: 5,
            hysteresis_cycles: 3,
            trim_fraction: dec!(0.25),
            exit_fraction: dec!(0.60),
            stop_loss_pct: dec!(0.30),
            profit_protect_multiple: dec!(1.50),
            trail_pct: dec!(0.20),
            tightened_trail_pct: dec!(0.10),
            profit_tiers: vec![
                ProfitTier::new(dec!(2), dec!(0.25)),
                ProfitTier::new(dec!(3), dec!(0.25)),
                ProfitTier::new(dec!(5), dec!(0.50)),
            ],
            max_failed_attempts: 3,
        }
    }
}

impl EngineConfig {
    /// Check internal consistency; called once at startup
    pub fn validate(&self) -> EngineResult<()> {
        if !(self.trim_band_start < self.exit_band_start
            && self.exit_band_start < self.emergency_threshold)
        {
            return Err(EngineError::InvalidConfig(
                "urgency bands must be strictly ordered: trim < exit < emergency",
            ));
        }
        if self.emergency_threshold > 100 {
            return Err(EngineError::InvalidConfig(
                "emergency threshold is above the 100-point urgency bound",
            ));
        }
        if self.hysteresis_margin >= self.trim_band_start {
            return Err(EngineError::InvalidConfig(
                "hysteresis margin must stay below the trim band start",
            ));
        }
        if self.hysteresis_cycles == 0 {
            return Err(EngineError::InvalidConfig(
                "hysteresis requires at least one confirming cycle",
            ));
        }

        for fraction in [self.trim_fraction, self.exit_fraction] {
            if fraction <= Decimal::ZERO || fraction > Decimal::ONE {
                return Err(EngineError::InvalidConfig(
                    "exit fractions must lie in (0, 1]",
                ));
            }
        }

        for pct in [
            self.stop_loss_pct,
            self.trail_pct,
            self.tightened_trail_pct,
        ] {
            if pct <= Decimal::ZERO || pct >= Decimal::ONE {
                return Err(EngineError::InvalidConfig(
                    "stop and trail percentages must lie in (0, 1)",
                ));
            }
        }
        if self.profit_protect_multiple <= Decimal::ONE {
            return Err(EngineError::InvalidConfig(
                "profit protection must arm above break-even",
            ));
        }

        let mut prev = Decimal::ONE;
        for tier in &self.profit_tiers {
            if tier.multiple <= prev {
                return Err(EngineError::InvalidConfig(
                    "profit tiers must ascend strictly above break-even",
                ));
            }
            if tier.fraction <= Decimal::ZERO || tier.fraction > Decimal::ONE {
                return Err(EngineError::InvalidConfig(
                    "profit tier fractions must lie in (0, 1]",
                ));
            }
            prev = tier.multiple;
        }

        if self.max_failed_attempts == 0 {
            return Err(EngineError::InvalidConfig(
                "at least one dispatch attempt must be allowed before reporting stuck",
            ));
        }

        Ok(())
    }
}
