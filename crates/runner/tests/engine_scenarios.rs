//! End-to-end decision-cycle scenarios over simulated collaborators

use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use tokio::sync::broadcast;

use vigil_clock::ManualClock;
use vigil_core::{
    ActionKind, AuxSignals, CollateralLeg, EngineEvent, Position, PositionSide, PositionState,
};
use vigil_ports::PositionStore;
use vigil_runner::{
    InMemoryPositionStore, MonitoringSession, RunnerConfig, Scheduler, SessionConfig,
    SimulatedExecutor, SimulatedFeed,
};

struct Harness {
    scheduler: Arc<Scheduler>,
    feed: Arc<SimulatedFeed>,
    executor: Arc<SimulatedExecutor>,
    store: Arc<InMemoryPositionStore>,
}

fn harness() -> Harness {
    harness_with(RunnerConfig {
        cycle_interval_ms: 10,
        worker_pool_size: 4,
        feed_timeout_ms: 100,
        executor_timeout_ms: 100,
        ledger_capacity: 64,
        ..RunnerConfig::default()
    })
}

fn harness_with(config: RunnerConfig) -> Harness {
    let _ = env_logger::try_init();
    let feed = Arc::new(SimulatedFeed::new());
    let executor = Arc::new(SimulatedExecutor::new());
    let store = Arc::new(InMemoryPositionStore::new());
    let scheduler = Arc::new(
        Scheduler::new(
            config,
            feed.clone(),
            executor.clone(),
            store.clone(),
            Arc::new(ManualClock::new()),
        )
        .unwrap(),
    );
    Harness {
        scheduler,
        feed,
        executor,
        store,
    }
}

impl Harness {
    async fn cycle(&self) {
        Arc::clone(&self.scheduler).run_cycle().await;
    }
}

fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}

/// Signals that score 30: below every action band
fn mild_signals() -> AuxSignals {
    AuxSignals {
        sentiment_drop: dec!(0.30),
        attention_declining: true,
        below_moving_average: true,
        oversold: true,
        ..AuxSignals::neutral()
    }
}

/// Signals that score 45: inside the trim band
fn trim_band_signals() -> AuxSignals {
    AuxSignals {
        whale_exits: 3,
        ..mild_signals()
    }
}

#[tokio::test]
async fn test_debt_free_leveraged_position_stays_active() {
    let h = harness();
    let mut events = h.scheduler.subscribe();

    h.feed.set_price("ETH", dec!(2000), dec!(1_000_000));
    h.feed.set_price("WBTC", dec!(60000), dec!(1_000_000));
    let position = Position::leveraged(
        "ETH",
        vec![
            CollateralLeg::new("ETH", dec!(10), dec!(0.80)),
            CollateralLeg::new("WBTC", dec!(0.5), dec!(0.75)),
        ],
        vec![],
        dec!(10),
        dec!(2000),
    );
    h.scheduler.track(position).await.unwrap();

    for _ in 0..3 {
        h.cycle().await;
    }

    // Infinite health factor, zero urgency: nothing happens
    assert!(h.executor.requests().is_empty());
    assert!(drain(&mut events).is_empty());
    assert_eq!(h.scheduler.tracked(), 1);
}

#[tokio::test]
async fn test_exploit_signal_exits_directly_from_active() {
    let h = harness();
    let mut events = h.scheduler.subscribe();

    h.feed.set_price("PUMP", dec!(1.00), dec!(1_000_000));
    let position = Position::directional("PUMP", PositionSide::Long, dec!(1000), dec!(1.00));
    let id = position.id;
    h.executor.set_fill_price(id, dec!(1.00));
    h.scheduler.track(position).await.unwrap();

    h.feed.set_signals("PUMP", mild_signals());
    h.cycle().await;
    assert!(h.executor.requests().is_empty());

    // Exploit detected: urgency leaps past the emergency threshold
    h.feed.set_signals(
        "PUMP",
        AuxSignals {
            emergency: true,
            ..mild_signals()
        },
    );
    h.cycle().await;

    let requests = h.executor.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].kind, ActionKind::EmergencyExit);
    assert_eq!(requests[0].fraction, dec!(1));
    assert!(requests[0].bypass_slippage_limit);

    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::Transition {
            from: PositionState::Active,
            to: PositionState::EmergencyExited,
            ..
        }
    )));

    // Fully filled and archived
    assert_eq!(h.scheduler.tracked(), 0);
    let stored = h.store.load(id).await.unwrap();
    assert!(stored.is_closed());
}

#[tokio::test]
async fn test_profit_tier_does_not_refire() {
    let h = harness();

    h.feed.set_price("PUMP", dec!(1.00), dec!(1_000_000));
    let position = Position::directional("PUMP", PositionSide::Long, dec!(1000), dec!(1.00));
    let id = position.id;
    h.scheduler.track(position).await.unwrap();

    // 3x: the 2x and 3x rungs fire together, once
    h.feed.set_price("PUMP", dec!(3.00), dec!(1_000_000));
    h.executor.set_fill_price(id, dec!(3.00));
    h.cycle().await;

    let requests = h.executor.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].kind, ActionKind::PartialExit);
    assert_eq!(requests[0].fraction, dec!(0.50));

    // Pullback above the trailing stop: no tier re-triggers
    h.feed.set_price("PUMP", dec!(2.60), dec!(1_000_000));
    h.cycle().await;
    h.cycle().await;

    assert_eq!(h.executor.requests().len(), 1);
    let stored = h.store.load(id).await.unwrap();
    assert_eq!(stored.exited_fraction, dec!(0.50));
    assert_eq!(stored.realized_pnl, dec!(1000));
}

#[tokio::test]
async fn test_stale_feed_emits_events_and_floors_urgency() {
    let h = harness();
    let mut events = h.scheduler.subscribe();

    h.feed.set_price("PUMP", dec!(1.00), dec!(1_000_000));
    let position = Position::directional("PUMP", PositionSide::Long, dec!(1000), dec!(1.00));
    h.scheduler.track(position).await.unwrap();

    h.cycle().await;
    assert!(drain(&mut events).is_empty());

    // Three consecutive feed timeouts: evaluation continues on the last
    // good snapshot, staleness counts up, the floor kicks in at three
    h.feed.fail_next(3);
    for _ in 0..3 {
        h.cycle().await;
    }

    let staleness: Vec<u32> = drain(&mut events)
        .iter()
        .filter_map(|e| match e {
            EngineEvent::StaleData { staleness, .. } => Some(*staleness),
            _ => None,
        })
        .collect();
    assert_eq!(staleness, vec![1, 2, 3]);

    // The floor (10) stays far below the trim band: no actions
    assert!(h.executor.requests().is_empty());

    // Feed recovers: staleness resets
    h.cycle().await;
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn test_timed_out_dispatch_is_delivered_once() {
    let h = harness_with(RunnerConfig {
        cycle_interval_ms: 10,
        worker_pool_size: 4,
        feed_timeout_ms: 100,
        executor_timeout_ms: 10,
        ledger_capacity: 64,
        ..RunnerConfig::default()
    });

    h.feed.set_price("PUMP", dec!(1.00), dec!(1_000_000));
    let position = Position::directional("PUMP", PositionSide::Long, dec!(1000), dec!(1.00));
    let id = position.id;
    h.executor.set_fill_price(id, dec!(1.00));
    h.executor.set_delay(Some(Duration::from_millis(40)));
    h.scheduler.track(position).await.unwrap();

    // Trim fires but the executor outlives the dispatch wait: Pending
    h.feed.set_signals("PUMP", trim_band_signals());
    h.cycle().await;
    let stored = h.store.load(id).await.unwrap();
    assert_eq!(stored.exited_fraction, dec!(0));

    // The parked call finishes; the next cycle resumes it without a second
    // executor delivery
    tokio::time::sleep(Duration::from_millis(60)).await;
    h.cycle().await;

    let requests = h.executor.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(h.executor.deliveries_for(&requests[0].idempotency_key), 1);
    let stored = h.store.load(id).await.unwrap();
    assert_eq!(stored.exited_fraction, dec!(0.25));
}

#[tokio::test]
async fn test_thin_book_blocks_all_but_emergency() {
    let h = harness();
    let mut events = h.scheduler.subscribe();

    // 3M of depth against a 20M position: a 25% trim cannot fill
    h.feed.set_price("PUMP", dec!(1.00), dec!(1_000_000));
    let position = Position::directional("PUMP", PositionSide::Long, dec!(20_000_000), dec!(1.00));
    h.scheduler.track(position).await.unwrap();

    h.feed.set_signals("PUMP", trim_band_signals());
    for _ in 0..3 {
        h.cycle().await;
    }

    // Nothing reached the executor, and the repeated blocking was surfaced
    assert!(h.executor.requests().is_empty());
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        EngineEvent::ActionStuck { attempts: 3, .. }
    )));

    // The emergency path bypasses the slippage gate
    h.feed.set_signals(
        "PUMP",
        AuxSignals {
            emergency: true,
            ..AuxSignals::neutral()
        },
    );
    h.cycle().await;

    let requests = h.executor.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].kind, ActionKind::EmergencyExit);
}

#[tokio::test]
async fn test_unpriced_collateral_leg_applies_unknown_risk_floor() {
    let h = harness();
    let mut events = h.scheduler.subscribe();

    // The WBTC leg is never priced by the feed
    h.feed.set_price("ETH", dec!(2000), dec!(1_000_000));
    let position = Position::leveraged(
        "ETH",
        vec![
            CollateralLeg::new("ETH", dec!(10), dec!(0.80)),
            CollateralLeg::new("WBTC", dec!(0.5), dec!(0.75)),
        ],
        vec![],
        dec!(10),
        dec!(2000),
    );
    h.scheduler.track(position).await.unwrap();

    h.cycle().await;
    h.cycle().await;

    // The position stays evaluated under the unknown-risk floor rather
    // than being silently skipped: a degraded-data event already carries
    // the floor staleness on the first cycle
    let seen = drain(&mut events);
    assert!(seen.iter().any(|e| matches!(
        e,
        EngineEvent::StaleData { asset, staleness, .. }
            if asset.as_str() == "WBTC" && *staleness >= 3
    )));

    // The floor (10) stays far below the trim band
    assert!(h.executor.requests().is_empty());
    assert_eq!(h.scheduler.tracked(), 1);
}

#[tokio::test]
async fn test_signal_outage_serves_last_known_signals() {
    let h = harness();
    let mut events = h.scheduler.subscribe();

    h.feed.set_price("PUMP", dec!(1.00), dec!(1_000_000));
    let position = Position::directional("PUMP", PositionSide::Long, dec!(1000), dec!(1.00));
    h.executor.set_fill_price(position.id, dec!(1.00));
    h.scheduler.track(position).await.unwrap();

    // Trim fires at urgency 45 and fills
    h.feed.set_signals("PUMP", trim_band_signals());
    h.cycle().await;
    assert_eq!(h.executor.requests().len(), 1);
    drain(&mut events);

    // The signal source goes dark: the last known signals keep scoring,
    // so the elevated urgency holds and hysteresis never reverts
    h.feed.fail_signals_next(4);
    for _ in 0..4 {
        h.cycle().await;
    }

    let seen = drain(&mut events);
    assert!(seen.iter().all(|e| !matches!(
        e,
        EngineEvent::Transition {
            to: PositionState::Active,
            ..
        }
    )));
    assert_eq!(h.executor.requests().len(), 1);
}

#[tokio::test]
async fn test_session_runs_and_stops_cleanly() {
    let _ = env_logger::try_init();
    let session = MonitoringSession::new(SessionConfig {
        jitter_bps: 0,
        ..SessionConfig::default()
    })
    .unwrap();

    session
        .open_directional("PUMP", PositionSide::Long, dec!(1000), dec!(1.00))
        .await
        .unwrap();

    let results = session.run_for(Duration::from_millis(350)).await;

    // A flat market produces no transitions and no exits
    assert_eq!(results.positions.len(), 1);
    assert_eq!(results.positions[0].exited_fraction, dec!(0));
    assert_eq!(results.total_realized_pnl(), dec!(0));
    assert!(
        results
            .events
            .iter()
            .all(|e| !matches!(e, EngineEvent::Transition { .. }))
    );
}
