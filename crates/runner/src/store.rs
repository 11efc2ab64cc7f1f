use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use vigil_core::Position;
use vigil_ports::{PositionStore, StoreError, StoreResult};

/// In-memory position store
///
/// The default store for tests and single-process runs; a database-backed
/// implementation plugs in behind the same port.
#[derive(Debug, Default)]
pub struct InMemoryPositionStore {
    positions: DashMap<Uuid, Position>,
}

impl InMemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Every stored position, open or closed (not part of the port)
    pub fn all(&self) -> Vec<Position> {
        self.positions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

#[async_trait]
impl PositionStore for InMemoryPositionStore {
    async fn load(&self, id: Uuid) -> StoreResult<Position> {
        self.positions
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn save(&self, position: &Position) -> StoreResult<()> {
        self.positions.insert(position.id, position.clone());
        Ok(())
    }

    async fn load_open(&self) -> StoreResult<Vec<Position>> {
        Ok(self
            .positions
            .iter()
            .filter(|entry| !entry.value().is_closed())
            .map(|entry| entry.value().clone())
            .collect())
    }
}
