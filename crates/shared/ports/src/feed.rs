use async_trait::async_trait;
use vigil_core::{AssetId, AuxSignals, MarketSnapshot};

use crate::error::FeedResult;

/// Port for the market data collaborator
///
/// Pull interface: the scheduler calls `snapshot` once per distinct asset
/// per decision cycle. A push-style feed adapter buffers incoming snapshots
/// (ordered by sequence number) and serves the latest from here.
#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// Fetch the current snapshot for an asset
    async fn snapshot(&self, asset: &AssetId) -> FeedResult<MarketSnapshot>;

    /// Fetch qualitative signals for an asset
    ///
    /// Feeds without qualitative coverage return neutral signals.
    async fn aux_signals(&self, asset: &AssetId) -> FeedResult<AuxSignals> {
        let _ = asset;
        Ok(AuxSignals::neutral())
    }
}
