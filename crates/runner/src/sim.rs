use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use rust_decimal::Decimal;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use uuid::Uuid;

use vigil_core::{ActionRequest, AssetId, AuxSignals, MarketSnapshot};
use vigil_ports::{
    DispatchResult, Executor, ExecutorError, ExecutorResult, FeedError, FeedResult, MarketFeed,
};

/// Scriptable market feed for tests and demo runs
///
/// Prices and qualitative signals are set explicitly; `fail_next` makes the
/// following snapshot calls time out, for staleness scenarios.
#[derive(Debug, Default)]
pub struct SimulatedFeed {
    snapshots: DashMap<AssetId, MarketSnapshot>,
    signals: DashMap<AssetId, AuxSignals>,
    sequence: AtomicU64,
    fail_remaining: AtomicU32,
    fail_signals_remaining: AtomicU32,
}

impl SimulatedFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new mid price with symmetric banded depth
    pub fn set_price(&self, asset: impl Into<AssetId>, mid: Decimal, band_size: Decimal) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let snapshot = MarketSnapshot::with_banded_depth(asset, mid, band_size, sequence);
        self.snapshots.insert(snapshot.asset.clone(), snapshot);
    }

    /// Publish qualitative signals for an asset
    pub fn set_signals(&self, asset: impl Into<AssetId>, signals: AuxSignals) {
        self.signals.insert(asset.into(), signals);
    }

    /// Make the next `count` snapshot calls fail with a timeout
    pub fn fail_next(&self, count: u32) {
        self.fail_remaining.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` signal calls fail with a timeout
    pub fn fail_signals_next(&self, count: u32) {
        self.fail_signals_remaining.store(count, Ordering::SeqCst);
    }

    /// Random-walk every published price by up to `max_bps` basis points
    pub fn jitter_prices(&self, max_bps: u32) {
        let mut rng = rand::thread_rng();
        let assets: Vec<AssetId> = self.snapshots.iter().map(|e| e.key().clone()).collect();
        for asset in assets {
            if let Some(snapshot) = self.snapshots.get(&asset) {
                let bps: i64 = rng.gen_range(-(max_bps as i64)..=max_bps as i64);
                let factor = Decimal::ONE + Decimal::new(bps, 4);
                let mid = snapshot.mid_price * factor;
                let band = snapshot.bids.first().map(|l| l.size).unwrap_or(Decimal::ZERO);
                drop(snapshot);
                self.set_price(asset, mid, band);
            }
        }
    }
}

#[async_trait]
impl MarketFeed for SimulatedFeed {
    async fn snapshot(&self, asset: &AssetId) -> FeedResult<MarketSnapshot> {
        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(FeedError::Timeout);
        }
        self.snapshots
            .get(asset)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| FeedError::UnknownAsset(asset.to_string()))
    }

    async fn aux_signals(&self, asset: &AssetId) -> FeedResult<AuxSignals> {
        if self
            .fail_signals_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(FeedError::Timeout);
        }
        Ok(self
            .signals
            .get(asset)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(AuxSignals::neutral))
    }
}

/// Scriptable executor for tests and demo runs
///
/// Fills the requested fraction at a per-position price (default 1.00) and
/// records every request it sees, so tests can assert at-most-once
/// delivery. `fail_next` and `delay` script failure and timeout paths.
#[derive(Debug, Default)]
pub struct SimulatedExecutor {
    fill_prices: DashMap<Uuid, Decimal>,
    requests: Mutex<Vec<ActionRequest>>,
    fail_remaining: AtomicU32,
    delay: Mutex<Option<Duration>>,
}

impl SimulatedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Price at which fills for this position execute
    pub fn set_fill_price(&self, position_id: Uuid, price: Decimal) {
        self.fill_prices.insert(position_id, price);
    }

    /// Make the next `count` executions fail
    pub fn fail_next(&self, count: u32) {
        self.fail_remaining.store(count, Ordering::SeqCst);
    }

    /// Delay every execution (drives dispatch timeout paths)
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    /// Every request received, in arrival order
    pub fn requests(&self) -> Vec<ActionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// How many times a given idempotency key reached this executor
    pub fn deliveries_for(&self, key: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.idempotency_key == key)
            .count()
    }
}

#[async_trait]
impl Executor for SimulatedExecutor {
    async fn execute(&self, request: &ActionRequest) -> ExecutorResult<DispatchResult> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        let delay = *self.delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ExecutorError::Unavailable("scripted failure".to_string()));
        }

        let avg_price = self
            .fill_prices
            .get(&request.position_id)
            .map(|entry| *entry.value())
            .unwrap_or(Decimal::ONE);
        Ok(DispatchResult::Filled {
            fraction: request.fraction,
            avg_price,
        })
    }
}
