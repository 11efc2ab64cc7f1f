use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::values::AssetId;

/// One resting-liquidity level of a depth-banded order book
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthLevel {
    /// Representative price of the band
    pub price: Decimal,
    /// Size available at this band, in base units
    pub size: Decimal,
}

impl DepthLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// Immutable market observation for one asset
///
/// Never mutated after ingestion; calculations share it by `Arc` reference.
/// Depth is banded: levels represent liquidity within roughly 1%, 2% and 5%
/// of mid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// Asset this snapshot describes
    pub asset: AssetId,
    /// Mid price
    pub mid_price: Decimal,
    /// Bid-side depth, best (highest price) first
    pub bids: Vec<DepthLevel>,
    /// Ask-side depth, best (lowest price) first
    pub asks: Vec<DepthLevel>,
    /// Feed sequence number, for ordering pushed snapshots
    pub sequence: u64,
    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,
}

impl MarketSnapshot {
    pub fn new(
        asset: impl Into<AssetId>,
        mid_price: Decimal,
        bids: Vec<DepthLevel>,
        asks: Vec<DepthLevel>,
        sequence: u64,
    ) -> Self {
        Self {
            asset: asset.into(),
            mid_price,
            bids,
            asks,
            sequence,
            timestamp: Utc::now(),
        }
    }

    /// Build a snapshot with symmetric depth at the standard 1/2/5% bands,
    /// each band holding `band_size` base units
    pub fn with_banded_depth(
        asset: impl Into<AssetId>,
        mid_price: Decimal,
        band_size: Decimal,
        sequence: u64,
    ) -> Self {
        let bands = [Decimal::new(1, 2), Decimal::new(2, 2), Decimal::new(5, 2)];
        let bids = bands
            .iter()
            .map(|pct| DepthLevel::new(mid_price * (Decimal::ONE - pct), band_size))
            .collect();
        let asks = bands
            .iter()
            .map(|pct| DepthLevel::new(mid_price * (Decimal::ONE + pct), band_size))
            .collect();
        Self::new(asset, mid_price, bids, asks, sequence)
    }

    /// Total size resting on the bid side
    pub fn bid_depth(&self) -> Decimal {
        self.bids.iter().map(|l| l.size).sum()
    }

    /// Total size resting on the ask side
    pub fn ask_depth(&self) -> Decimal {
        self.asks.iter().map(|l| l.size).sum()
    }
}

/// The market data one evaluation cycle sees for one position
///
/// Holds shared references to the snapshots of every asset the position
/// touches, plus how many consecutive cycles have been served from stale
/// data (0 = fresh).
#[derive(Debug, Clone, Default)]
pub struct MarketView {
    snapshots: HashMap<AssetId, Arc<MarketSnapshot>>,
    /// Consecutive cycles this view has been served from stale data
    pub staleness: u32,
}

impl MarketView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a snapshot to the view
    pub fn insert(&mut self, snapshot: Arc<MarketSnapshot>) {
        self.snapshots.insert(snapshot.asset.clone(), snapshot);
    }

    /// Snapshot for an asset, if present
    pub fn snapshot(&self, asset: &AssetId) -> Option<&Arc<MarketSnapshot>> {
        self.snapshots.get(asset)
    }

    /// Mid price for an asset, if present
    pub fn price(&self, asset: &AssetId) -> Option<Decimal> {
        self.snapshots.get(asset).map(|s| s.mid_price)
    }

    /// Is this view degraded by stale data?
    pub fn is_stale(&self) -> bool {
        self.staleness > 0
    }
}
