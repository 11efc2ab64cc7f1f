//! Full-engine monitoring session against simulated collaborators
//!
//! Ties together all components for demo runs and end-to-end tests:
//! - Simulated market feed (scripted prices, optional random walk)
//! - Simulated executor (fills at the feed's current mid)
//! - In-memory position store
//! - The scheduler driving decision cycles

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use log::info;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::broadcast;
use uuid::Uuid;

use vigil_clock::SystemClock;
use vigil_core::{AssetId, EngineEvent, Position, PositionSide};
use vigil_ports::MarketFeed;

use crate::config::RunnerConfig;
use crate::error::RunnerResult;
use crate::scheduler::Scheduler;
use crate::sim::{SimulatedExecutor, SimulatedFeed};
use crate::store::InMemoryPositionStore;

/// Session tuning on top of the runner configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Engine configuration
    pub runner: RunnerConfig,
    /// How often the simulated market moves
    pub price_interval: Duration,
    /// Random-walk amplitude per price move, in basis points
    pub jitter_bps: u32,
    /// Liquidity per depth band for opened assets
    pub band_size: Decimal,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            runner: RunnerConfig {
                cycle_interval_ms: 100,
                ..RunnerConfig::default()
            },
            price_interval: Duration::from_millis(50),
            jitter_bps: 30,
            band_size: dec!(1_000_000),
        }
    }
}

/// What a finished session leaves behind
#[derive(Debug, Default)]
pub struct SessionResults {
    /// Every engine event observed, in order
    pub events: Vec<EngineEvent>,
    /// Final persisted state of every position the session touched
    pub positions: Vec<Position>,
}

impl SessionResults {
    /// Total realized profit/loss across all positions
    pub fn total_realized_pnl(&self) -> Decimal {
        self.positions.iter().map(|p| p.realized_pnl).sum()
    }
}

/// A fully wired engine instance over simulated collaborators
pub struct MonitoringSession {
    config: SessionConfig,
    feed: Arc<SimulatedFeed>,
    executor: Arc<SimulatedExecutor>,
    store: Arc<InMemoryPositionStore>,
    scheduler: Arc<Scheduler>,
    /// Asset per opened position, for fill-price syncing
    position_assets: DashMap<Uuid, AssetId>,
}

impl MonitoringSession {
    pub fn new(config: SessionConfig) -> RunnerResult<Self> {
        let feed = Arc::new(SimulatedFeed::new());
        let executor = Arc::new(SimulatedExecutor::new());
        let store = Arc::new(InMemoryPositionStore::new());
        let scheduler = Arc::new(Scheduler::new(
            config.runner.clone(),
            feed.clone(),
            executor.clone(),
            store.clone(),
            Arc::new(SystemClock::new()),
        )?);

        Ok(Self {
            config,
            feed,
            executor,
            store,
            scheduler,
            position_assets: DashMap::new(),
        })
    }

    pub fn feed(&self) -> &SimulatedFeed {
        &self.feed
    }

    pub fn executor(&self) -> &SimulatedExecutor {
        &self.executor
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Open and track a directional position, seeding the feed at entry
    pub async fn open_directional(
        &self,
        asset: impl Into<AssetId>,
        side: PositionSide,
        quantity: Decimal,
        entry_price: Decimal,
    ) -> RunnerResult<Uuid> {
        let asset = asset.into();
        self.feed
            .set_price(asset.clone(), entry_price, self.config.band_size);
        let position = Position::directional(asset.clone(), side, quantity, entry_price);
        let id = position.id;
        self.executor.set_fill_price(id, entry_price);
        self.position_assets.insert(id, asset);
        self.scheduler.track(position).await?;
        Ok(id)
    }

    /// Run the engine for a wall-clock duration with a random-walk market,
    /// then stop it and collect what happened
    pub async fn run_for(&self, duration: Duration) -> SessionResults {
        let mut events_rx = self.scheduler.subscribe();
        let scheduler_task = tokio::spawn(Arc::clone(&self.scheduler).run());

        let feed = Arc::clone(&self.feed);
        let executor = Arc::clone(&self.executor);
        let jitter_bps = self.config.jitter_bps;
        let price_interval = self.config.price_interval;
        let assets: Vec<(Uuid, AssetId)> = self
            .position_assets
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        let market_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(price_interval);
            loop {
                ticker.tick().await;
                feed.jitter_prices(jitter_bps);
                // Fills execute at the moved market, not the decision price
                for (id, asset) in &assets {
                    if let Ok(snapshot) = feed.snapshot(asset).await {
                        executor.set_fill_price(*id, snapshot.mid_price);
                    }
                }
            }
        });

        tokio::time::sleep(duration).await;
        self.scheduler.stop();
        market_task.abort();
        if let Err(err) = scheduler_task.await {
            info!("scheduler task ended abnormally: {}", err);
        }

        let mut events = Vec::new();
        loop {
            match events_rx.try_recv() {
                Ok(event) => events.push(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }

        SessionResults {
            events,
            positions: self.store.all(),
        }
    }
}
