use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use log::{debug, info, warn};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, Semaphore, broadcast, watch};
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use vigil_core::{
    AssetId, AuxSignals, EngineEvent, Exposure, MarketSnapshot, MarketView, Position,
    PositionSide, RiskMetric, Timestamp,
};
use vigil_dispatch::Dispatcher;
use vigil_engine::{CycleInput, PositionMachine};
use vigil_metrics::{MetricError, compute_metric, estimate_fill, slippage_vs_mid};
use vigil_ports::{Clock, DispatchResult, Executor, MarketFeed, PositionStore};
use vigil_signal::{SignalInputs, aggregate};

use crate::config::RunnerConfig;
use crate::error::RunnerResult;

/// Market data shared by every evaluation in one cycle
struct CycleContext {
    cycle: u64,
    now: Timestamp,
    snapshots: HashMap<AssetId, Arc<MarketSnapshot>>,
    stale: HashMap<AssetId, u32>,
    aux: HashMap<AssetId, AuxSignals>,
}

/// The control loop driving all positions through the pipeline
///
/// Each decision cycle: fetch one snapshot per distinct asset, then fan the
/// positions out over a bounded worker pool. Positions are evaluated
/// independently; a position whose previous evaluation is somehow still
/// running is skipped, never evaluated twice concurrently. Per-position
/// faults (missing prices, arithmetic overflow, executor failures) are
/// isolated to that position while the loop keeps serving the rest.
pub struct Scheduler {
    config: RunnerConfig,
    feed: Arc<dyn MarketFeed>,
    dispatcher: Dispatcher,
    store: Arc<dyn PositionStore>,
    clock: Arc<dyn Clock>,

    machines: DashMap<Uuid, Arc<Mutex<PositionMachine>>>,
    /// Assets each position needs priced, captured at tracking time
    machine_assets: DashMap<Uuid, Vec<AssetId>>,
    /// Last good snapshot per asset, served while the feed is stale
    last_snapshots: DashMap<AssetId, Arc<MarketSnapshot>>,
    /// Last good qualitative signals per asset, served while the signal
    /// source is unreachable
    last_aux: DashMap<AssetId, AuxSignals>,
    /// Consecutive cycles each asset's snapshot fetch has failed
    stale_counts: DashMap<AssetId, u32>,

    cycle: AtomicU64,
    events: broadcast::Sender<EngineEvent>,
    shutdown: watch::Sender<bool>,
    workers: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(
        config: RunnerConfig,
        feed: Arc<dyn MarketFeed>,
        executor: Arc<dyn Executor>,
        store: Arc<dyn PositionStore>,
        clock: Arc<dyn Clock>,
    ) -> RunnerResult<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(256);
        let (shutdown, _) = watch::channel(false);
        let dispatcher = Dispatcher::new(
            executor,
            config.executor_timeout(),
            config.ledger_capacity,
        );
        let workers = Arc::new(Semaphore::new(config.worker_pool_size));

        info!(
            "scheduler ready: cycle every {}ms, {} workers, clock {}",
            config.cycle_interval_ms,
            config.worker_pool_size,
            clock.name()
        );

        Ok(Self {
            config,
            feed,
            dispatcher,
            store,
            clock,
            machines: DashMap::new(),
            machine_assets: DashMap::new(),
            last_snapshots: DashMap::new(),
            last_aux: DashMap::new(),
            stale_counts: DashMap::new(),
            cycle: AtomicU64::new(0),
            events,
            shutdown,
            workers,
        })
    }

    /// Start tracking a position
    pub async fn track(&self, position: Position) -> RunnerResult<()> {
        self.store.save(&position).await?;
        let id = position.id;
        info!("tracking position {} on {}", id, position.asset);
        self.machine_assets.insert(id, priced_assets(&position));
        self.machines.insert(
            id,
            Arc::new(Mutex::new(PositionMachine::new(position, &self.config.engine))),
        );
        Ok(())
    }

    /// Resume every open position from the store
    pub async fn restore(&self) -> RunnerResult<usize> {
        let open = self.store.load_open().await?;
        let count = open.len();
        for position in open {
            self.machine_assets
                .insert(position.id, priced_assets(&position));
            self.machines.insert(
                position.id,
                Arc::new(Mutex::new(PositionMachine::new(
                    position,
                    &self.config.engine,
                ))),
            );
        }
        info!("restored {} open positions", count);
        Ok(count)
    }

    /// Subscribe to structured engine events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Positions currently tracked (terminal ones are archived out)
    pub fn tracked(&self) -> usize {
        self.machines.len()
    }

    /// Signal the run loop to stop after the current cycle
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Drive decision cycles at the configured cadence until stopped
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.cycle_interval());
        // A cycle that overruns delays the next tick instead of bursting
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut shutdown = self.shutdown.subscribe();

        info!("scheduler running");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    Arc::clone(&self).run_cycle().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.dispatcher.abort_in_flight();
        info!("scheduler stopped after {} cycles", self.cycle.load(Ordering::SeqCst));
    }

    /// Run exactly one decision cycle across all tracked positions
    pub async fn run_cycle(self: Arc<Self>) {
        let cycle = self.cycle.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.clock.now();
        debug!("cycle {} starting with {} positions", cycle, self.machines.len());

        let context = Arc::new(self.gather_market_data(cycle, now).await);

        let mut handles = Vec::with_capacity(self.machines.len());
        for entry in self.machines.iter() {
            let scheduler = Arc::clone(&self);
            let machine = Arc::clone(entry.value());
            let context = Arc::clone(&context);
            let id = *entry.key();
            handles.push(tokio::spawn(async move {
                let Ok(_permit) = scheduler.workers.acquire().await else {
                    return;
                };
                scheduler.evaluate_position(id, machine, &context).await;
            }));
        }
        // Evaluations still running at the budget keep going in the
        // background; their positions are skipped (busy) until they finish.
        let joins = async {
            for handle in handles {
                if let Err(err) = handle.await {
                    warn!("cycle {}: evaluation task died: {}", cycle, err);
                }
            }
        };
        if tokio::time::timeout(self.config.cycle_budget(), joins)
            .await
            .is_err()
        {
            warn!("cycle {}: budget exhausted, moving on", cycle);
        }

        self.archive_terminal().await;
    }

    /// One snapshot and one signal fetch per distinct asset per cycle
    async fn gather_market_data(&self, cycle: u64, now: Timestamp) -> CycleContext {
        let mut assets: HashSet<AssetId> = HashSet::new();
        for entry in self.machine_assets.iter() {
            assets.extend(entry.value().iter().cloned());
        }

        let mut snapshots = HashMap::new();
        let mut stale = HashMap::new();
        let mut aux = HashMap::new();

        for asset in assets {
            let fetched =
                tokio::time::timeout(self.config.feed_timeout(), self.feed.snapshot(&asset))
                    .await;
            match fetched {
                Ok(Ok(snapshot)) => {
                    let snapshot = Arc::new(snapshot);
                    self.last_snapshots.insert(asset.clone(), Arc::clone(&snapshot));
                    self.stale_counts.insert(asset.clone(), 0);
                    snapshots.insert(asset.clone(), snapshot);
                    stale.insert(asset.clone(), 0);
                }
                Ok(Err(err)) => {
                    let count = self.bump_stale(&asset);
                    warn!("cycle {}: feed error for {} ({}), staleness {}", cycle, asset, err, count);
                    if let Some(last) = self.last_snapshots.get(&asset) {
                        snapshots.insert(asset.clone(), Arc::clone(last.value()));
                    }
                    stale.insert(asset.clone(), count);
                }
                Err(_) => {
                    let count = self.bump_stale(&asset);
                    warn!("cycle {}: feed timed out for {}, staleness {}", cycle, asset, count);
                    if let Some(last) = self.last_snapshots.get(&asset) {
                        snapshots.insert(asset.clone(), Arc::clone(last.value()));
                    }
                    stale.insert(asset.clone(), count);
                }
            }

            let signals = tokio::time::timeout(
                self.config.feed_timeout(),
                self.feed.aux_signals(&asset),
            )
            .await;
            match signals {
                Ok(Ok(signals)) => {
                    self.last_aux.insert(asset.clone(), signals.clone());
                    aux.insert(asset, signals);
                }
                // Qualitative coverage went dark: the last known signals
                // keep scoring rather than silently dropping to neutral
                _ => {
                    if let Some(last) = self.last_aux.get(&asset) {
                        warn!(
                            "cycle {}: signal fetch failed for {}, serving last known",
                            cycle, asset
                        );
                        aux.insert(asset.clone(), last.value().clone());
                    }
                }
            }
        }

        CycleContext {
            cycle,
            now,
            snapshots,
            stale,
            aux,
        }
    }

    fn bump_stale(&self, asset: &AssetId) -> u32 {
        let mut entry = self.stale_counts.entry(asset.clone()).or_insert(0);
        *entry += 1;
        *entry
    }

    async fn evaluate_position(
        &self,
        id: Uuid,
        machine: Arc<Mutex<PositionMachine>>,
        context: &CycleContext,
    ) {
        // A position still busy from an earlier cycle is skipped, never
        // evaluated concurrently.
        let Ok(mut machine) = machine.try_lock() else {
            debug!("cycle {}: position {} busy, skipping", context.cycle, id);
            return;
        };

        // Resolve any in-flight action first; fills advance quantities
        // before this cycle's decision.
        if let Some(pending) = machine.pending_action().cloned() {
            let result = self.dispatcher.dispatch(&pending).await;
            match machine.apply_dispatch_result(&self.config.engine, &result, context.now) {
                Ok(events) => self.publish_all(events),
                Err(err) => warn!("position {}: {}", id, err),
            }
            self.persist(machine.position()).await;
        }

        if !machine.state().is_evaluable() {
            return;
        }

        let (view, staleness) = self.build_view(&machine, context);
        if staleness > 0 {
            self.publish(EngineEvent::StaleData {
                position_id: id,
                asset: machine.position().asset.clone(),
                staleness,
                timestamp: context.now,
            });
        }

        let Some(mid) = view.price(&machine.position().asset) else {
            debug!(
                "cycle {}: no price for {} yet, position {} not evaluated",
                context.cycle,
                machine.position().asset,
                id
            );
            return;
        };

        let (metric, staleness) = match compute_metric(
            machine.position(),
            &view,
            self.config.engine.stop_loss_pct,
        ) {
            Ok(metric) => (metric, staleness),
            Err(MetricError::Overflow(what)) => {
                let event = machine.halt(format!("arithmetic overflow in {}", what), context.now);
                self.publish(event);
                self.persist(machine.position()).await;
                return;
            }
            // An unpriced leg is unknown risk, not a pass: evaluation
            // continues under the stale-data urgency floor
            Err(MetricError::MissingPrice(asset)) => {
                let degraded = staleness.max(self.config.scoring.stale_floor_after);
                warn!(
                    "cycle {}: position {} has no price for {}, applying unknown-risk floor",
                    context.cycle, id, asset
                );
                self.publish(EngineEvent::StaleData {
                    position_id: id,
                    asset,
                    staleness: degraded,
                    timestamp: context.now,
                });
                (RiskMetric::HealthFactor(Decimal::MAX), degraded)
            }
            Err(err) => {
                debug!("cycle {}: position {} not evaluated: {}", context.cycle, id, err);
                return;
            }
        };

        let neutral = AuxSignals::neutral();
        let aux = context
            .aux
            .get(&machine.position().asset)
            .unwrap_or(&neutral);
        let urgency = aggregate(
            &self.config.scoring,
            &SignalInputs {
                drawdown_from_peak: machine.position().drawdown_from_peak(mid),
                aux,
                staleness,
            },
        );

        let outcome = machine.evaluate(
            &self.config.engine,
            &CycleInput {
                cycle: context.cycle,
                metric,
                urgency,
                mid_price: mid,
                now: context.now,
            },
        );
        self.publish_all(outcome.events);

        if let Some(action) = outcome.action {
            if !action.bypass_slippage_limit
                && let Some(reason) = self.slippage_blocked(&machine, action.fraction, &view)
            {
                // A blocked action counts as a failed attempt: the state
                // falls back, the trigger re-fires next cycle, and repeated
                // blocking surfaces as ActionStuck
                let blocked = DispatchResult::Failed { reason };
                match machine.apply_dispatch_result(&self.config.engine, &blocked, context.now) {
                    Ok(events) => self.publish_all(events),
                    Err(err) => warn!("position {}: {}", id, err),
                }
                self.persist(machine.position()).await;
                return;
            }
            let result = self.dispatcher.dispatch(&action).await;
            match machine.apply_dispatch_result(&self.config.engine, &result, context.now) {
                Ok(events) => self.publish_all(events),
                Err(err) => warn!("position {}: {}", id, err),
            }
        }

        self.persist(machine.position()).await;
    }

    /// Estimated-slippage gate for non-emergency actions
    ///
    /// Returns the blocking reason, or `None` when the action may proceed.
    fn slippage_blocked(
        &self,
        machine: &PositionMachine,
        fraction: Decimal,
        view: &MarketView,
    ) -> Option<String> {
        let position = machine.position();
        let snapshot = view.snapshot(&position.asset)?;
        let size = fraction * position.original_quantity;
        if size <= Decimal::ZERO {
            return None;
        }
        // A long exit sells into bids; a short exit buys from asks
        let levels = match position.side() {
            PositionSide::Long => &snapshot.bids,
            PositionSide::Short => &snapshot.asks,
        };
        match estimate_fill(levels, size) {
            Ok(estimate) => {
                let slip = slippage_vs_mid(estimate.avg_fill_price, snapshot.mid_price, position.side());
                if slip > self.config.max_slippage {
                    warn!(
                        "position {}: estimated slippage {} above tolerance {}, holding action",
                        position.id, slip, self.config.max_slippage
                    );
                    return Some(format!(
                        "estimated slippage {} above tolerance {}",
                        slip, self.config.max_slippage
                    ));
                }
                None
            }
            Err(err) => {
                warn!(
                    "position {}: cannot estimate fill ({}), holding action",
                    position.id, err
                );
                Some(err.to_string())
            }
        }
    }

    /// Market view for one position: its assets' snapshots plus the worst
    /// staleness among them
    fn build_view(&self, machine: &PositionMachine, context: &CycleContext) -> (MarketView, u32) {
        let mut view = MarketView::new();
        let mut staleness = 0;
        if let Some(assets) = self.machine_assets.get(&machine.position().id) {
            for asset in assets.value() {
                if let Some(snapshot) = context.snapshots.get(asset) {
                    view.insert(Arc::clone(snapshot));
                }
                staleness = staleness.max(context.stale.get(asset).copied().unwrap_or(0));
            }
        }
        view.staleness = staleness;
        (view, staleness)
    }

    /// Drop machines that reached a terminal state with nothing in flight
    async fn archive_terminal(&self) {
        let mut archived = Vec::new();
        for entry in self.machines.iter() {
            if let Ok(machine) = entry.value().try_lock()
                && machine.state().is_terminal()
                && machine.pending_action().is_none()
            {
                archived.push(*entry.key());
            }
        }
        for id in archived {
            if let Some((_, machine)) = self.machines.remove(&id) {
                let machine = machine.lock().await;
                self.persist(machine.position()).await;
                info!(
                    "position {} archived in state {} (realized pnl {})",
                    id,
                    machine.state(),
                    machine.position().realized_pnl
                );
            }
            self.machine_assets.remove(&id);
        }
    }

    async fn persist(&self, position: &Position) {
        if let Err(err) = self.store.save(position).await {
            warn!("position {}: store save failed: {}", position.id, err);
        }
    }

    fn publish(&self, event: EngineEvent) {
        if let Ok(json) = serde_json::to_string(&event) {
            debug!("event {}", json);
        }
        let _ = self.events.send(event);
    }

    fn publish_all(&self, events: Vec<EngineEvent>) {
        for event in events {
            self.publish(event);
        }
    }
}

/// Every asset a position needs priced: the primary asset plus all
/// collateral and debt legs
fn priced_assets(position: &Position) -> Vec<AssetId> {
    let mut assets = vec![position.asset.clone()];
    if let Exposure::Leveraged { collateral, debt } = &position.exposure {
        for leg in collateral {
            assets.push(leg.asset.clone());
        }
        for leg in debt {
            assets.push(leg.asset.clone());
        }
    }
    assets.sort_unstable_by(|a, b| a.as_str().cmp(b.as_str()));
    assets.dedup();
    assets
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use vigil_core::{CollateralLeg, DebtLeg};

    #[test]
    fn test_priced_assets_directional() {
        let position = Position::directional("PUMP", PositionSide::Long, dec!(1000), dec!(1.00));
        assert_eq!(priced_assets(&position), vec![AssetId::new("PUMP")]);
    }

    #[test]
    fn test_priced_assets_leveraged_dedups() {
        let position = Position::leveraged(
            "ETH",
            vec![CollateralLeg::new("ETH", dec!(10), dec!(0.80))],
            vec![DebtLeg::new("USDC", dec!(8000))],
            dec!(10),
            dec!(2000),
        );
        assert_eq!(
            priced_assets(&position),
            vec![AssetId::new("ETH"), AssetId::new("USDC")]
        );
    }
}
