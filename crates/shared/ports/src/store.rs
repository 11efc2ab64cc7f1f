use async_trait::async_trait;
use uuid::Uuid;
use vigil_core::Position;

use crate::error::StoreResult;

/// Port for position persistence
///
/// The engine treats storage as an external collaborator; this is a plain
/// load/save contract keyed by position id. Terminal positions are saved one
/// last time on archive.
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Load a position by id
    async fn load(&self, position_id: Uuid) -> StoreResult<Position>;

    /// Persist a position (insert or overwrite)
    async fn save(&self, position: &Position) -> StoreResult<()>;

    /// Load every position that is still open (quantity > 0)
    async fn load_open(&self) -> StoreResult<Vec<Position>>;
}
