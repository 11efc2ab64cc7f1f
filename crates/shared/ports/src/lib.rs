//! Vigil Ports
//!
//! Port definitions (traits) for the Vigil position risk engine.
//! These define the boundaries between the engine and its external
//! collaborators: market data, execution, persistence, and time.

mod clock;
mod error;
mod executor;
mod feed;
mod store;

pub use clock::Clock;
pub use error::{ExecutorError, ExecutorResult, FeedError, FeedResult, StoreError, StoreResult};
pub use executor::{DispatchResult, Executor};
pub use feed::MarketFeed;
pub use store::PositionStore;
