use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Qualitative risk inputs for one asset, alongside the price metric
///
/// Supplied by the market feed (or a dedicated intelligence source) and
/// folded into the urgency score. All ratios are fractions (0.40 = 40%).
/// The default is fully neutral: a feed with no qualitative coverage
/// contributes nothing to urgency.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AuxSignals {
    /// Distinct large holders observed exiting recently
    pub whale_exits: u32,
    /// Share of recent volume attributable to large-holder selling
    pub whale_volume_share: Decimal,
    /// Magnitude of a sentiment collapse (0 = none)
    pub sentiment_drop: Decimal,
    /// Attention/volume is declining
    pub attention_declining: bool,
    /// Jump in the external contract/solvency risk score since last cycle
    pub contract_risk_jump: Decimal,
    /// Fraction of backing liquidity withdrawn recently
    pub liquidity_drop: Decimal,
    /// Price is below its moving average (weak technical signal)
    pub below_moving_average: bool,
    /// Oversold technical reading (weak technical signal)
    pub oversold: bool,
    /// Explicit emergency: contract exploit, extreme liquidity drain
    pub emergency: bool,
}

impl AuxSignals {
    /// Fully neutral signals (no qualitative risk observed)
    pub fn neutral() -> Self {
        Self::default()
    }
}
