use log::{debug, info, warn};
use rust_decimal::Decimal;

use vigil_core::{
    ActionKind, ActionRequest, EngineEvent, Position, PositionSide, PositionState, RiskMetric,
    Timestamp, UrgencyScore,
};
use vigil_ports::DispatchResult;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

/// Everything one decision cycle feeds the machine
#[derive(Debug, Clone)]
pub struct CycleInput {
    /// Monotonic decision-cycle number, shared across all positions
    pub cycle: u64,
    /// Risk metric computed for this position
    pub metric: RiskMetric,
    /// Aggregated urgency score
    pub urgency: UrgencyScore,
    /// Current mid price of the position's asset
    pub mid_price: Decimal,
    /// Cycle timestamp
    pub now: Timestamp,
}

/// What one evaluation produced
#[derive(Debug, Default)]
pub struct CycleOutcome {
    /// At most one action per position per cycle
    pub action: Option<ActionRequest>,
    /// Observability events raised during the evaluation
    pub events: Vec<EngineEvent>,
}

/// Per-position lifecycle state machine
///
/// Owns the position exclusively. Each cycle it consumes the metric and
/// urgency score, ratchets the high-water mark and trailing stop, and emits
/// at most one action. Position quantities only change through
/// [`apply_dispatch_result`](Self::apply_dispatch_result) with a confirmed
/// fill - an emitted action is never assumed to have succeeded.
///
/// Band layout (urgency): `[trim, exit)` trims, `[exit, emergency)` stages
/// a larger exit, `>= emergency` exits everything at market. Leaving a band
/// requires urgency to sit below the band's entry threshold by the
/// hysteresis margin for a configured number of consecutive cycles.
pub struct PositionMachine {
    position: Position,
    state: PositionState,
    prev_urgency: UrgencyScore,
    /// Consecutive cycles urgency sat below the reversion threshold
    below_band_streak: u32,
    /// Which profit-ladder rungs have fired (each fires once)
    tiers_taken: Vec<bool>,
    /// Action emitted but not yet resolved by a dispatch result
    pending: Option<ActionRequest>,
    /// State to fall back to if the in-flight action's dispatch fails,
    /// so the entry action re-fires instead of being silently lost
    revert_state: Option<PositionState>,
    /// Consecutive failed dispatches
    failed_attempts: u32,
}

impl PositionMachine {
    pub fn new(position: Position, config: &EngineConfig) -> Self {
        Self {
            position,
            state: PositionState::Active,
            prev_urgency: UrgencyScore::ZERO,
            below_band_streak: 0,
            tiers_taken: vec![false; config.profit_tiers.len()],
            pending: None,
            revert_state: None,
            failed_attempts: 0,
        }
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn state(&self) -> PositionState {
        self.state
    }

    pub fn pending_action(&self) -> Option<&ActionRequest> {
        self.pending.as_ref()
    }

    pub fn prev_urgency(&self) -> UrgencyScore {
        self.prev_urgency
    }

    /// Run one decision cycle
    pub fn evaluate(&mut self, config: &EngineConfig, input: &CycleInput) -> CycleOutcome {
        let mut outcome = CycleOutcome::default();
        if !self.state.is_evaluable() {
            return outcome;
        }

        self.position.observe_price(input.mid_price);
        self.ratchet_trailing_stop(config, input.mid_price);
        self.prev_urgency = input.urgency;

        // One action in flight per position: nothing new is emitted until
        // the dispatcher resolves it.
        if self.pending.is_some() {
            debug!(
                "position {}: action in flight, skipping emission on cycle {}",
                self.position.id, input.cycle
            );
            return outcome;
        }

        let urgency = input.urgency.value();

        if urgency >= config.emergency_threshold || self.metric_breached(&input.metric) {
            self.emit_emergency(config, input, &mut outcome);
            return outcome;
        }

        if urgency >= config.exit_band_start {
            self.below_band_streak = 0;
            if self.state != PositionState::ExitPending {
                self.tighten_stop(config, input.mid_price);
                let reason = format!("urgency {} entered exit band", urgency);
                self.emit(
                    config,
                    input,
                    ActionKind::PartialExit,
                    config.exit_fraction,
                    &reason,
                    PositionState::ExitPending,
                    &mut outcome,
                );
                return outcome;
            }
        } else if urgency >= config.trim_band_start {
            self.below_band_streak = 0;
            if self.state == PositionState::Active {
                let reason = format!("urgency {} entered trim band", urgency);
                self.emit(
                    config,
                    input,
                    ActionKind::PartialExit,
                    config.trim_fraction,
                    &reason,
                    PositionState::Trimming,
                    &mut outcome,
                );
                return outcome;
            }
        } else {
            self.hysteresis_step(config, input, &mut outcome);
        }

        self.take_profit_tiers(config, input, &mut outcome);
        outcome
    }

    /// Feed back the dispatcher's outcome for the in-flight action
    pub fn apply_dispatch_result(
        &mut self,
        config: &EngineConfig,
        result: &DispatchResult,
        now: Timestamp,
    ) -> EngineResult<Vec<EngineEvent>> {
        let pending = self.pending.as_ref().ok_or(EngineError::NoActionInFlight)?;
        let mut events = Vec::new();

        match result {
            DispatchResult::Filled { fraction, avg_price }
            | DispatchResult::PartialFill { fraction, avg_price } => {
                let requested = pending.fraction;
                let pnl = self.position.apply_fill(*fraction, *avg_price);
                debug!(
                    "position {}: fill {} of original at {} (pnl {})",
                    self.position.id, fraction, avg_price, pnl
                );
                self.pending = None;
                self.failed_attempts = 0;

                if self.position.remaining_fraction().is_zero() {
                    self.revert_state = None;
                    if !self.state.is_terminal() {
                        let from = self.state;
                        self.state = PositionState::Exited;
                        info!("position {} {} -> Exited (fully filled)", self.position.id, from);
                        events.push(EngineEvent::Transition {
                            position_id: self.position.id,
                            from,
                            to: PositionState::Exited,
                            metric: None,
                            urgency: self.prev_urgency,
                            reason: "cumulative confirmed exits reached full size".to_string(),
                            timestamp: now,
                        });
                    }
                } else if *fraction < requested && self.state == PositionState::EmergencyExited {
                    // An emergency exit that only partially filled must keep
                    // being monitored so the remainder exits next cycle
                    self.revert(
                        &format!("emergency exit partially filled ({} of {})", fraction, requested),
                        now,
                        &mut events,
                    );
                } else {
                    self.revert_state = None;
                }
            }
            DispatchResult::Pending => {
                // Still in flight: keep suppressing emission, re-check next
                // cycle.
                debug!(
                    "position {}: dispatch still pending (key {})",
                    self.position.id, pending.idempotency_key
                );
            }
            DispatchResult::Failed { reason } => {
                self.failed_attempts += 1;
                warn!(
                    "position {}: dispatch failed ({} consecutive): {}",
                    self.position.id, self.failed_attempts, reason
                );
                self.pending = None;
                self.revert(&format!("dispatch failed: {}", reason), now, &mut events);
                if self.failed_attempts >= config.max_failed_attempts {
                    events.push(EngineEvent::ActionStuck {
                        position_id: self.position.id,
                        attempts: self.failed_attempts,
                        reason: reason.clone(),
                        timestamp: now,
                    });
                }
            }
        }

        Ok(events)
    }

    /// Fall back to the state the in-flight action was emitted from
    fn revert(&mut self, reason: &str, now: Timestamp, events: &mut Vec<EngineEvent>) {
        let Some(prev) = self.revert_state.take() else {
            return;
        };
        if prev == self.state {
            return;
        }
        let from = self.state;
        self.state = prev;
        info!("position {} {} -> {} ({})", self.position.id, from, prev, reason);
        events.push(EngineEvent::Transition {
            position_id: self.position.id,
            from,
            to: prev,
            metric: None,
            urgency: self.prev_urgency,
            reason: reason.to_string(),
            timestamp: now,
        });
    }

    /// Freeze the position after an arithmetic fault
    pub fn halt(&mut self, reason: impl Into<String>, now: Timestamp) -> EngineEvent {
        let reason = reason.into();
        warn!("position {} halted: {}", self.position.id, reason);
        self.state = PositionState::Halted;
        self.pending = None;
        EngineEvent::PositionHalted {
            position_id: self.position.id,
            reason,
            timestamp: now,
        }
    }

    fn metric_breached(&self, metric: &RiskMetric) -> bool {
        match metric {
            // Below 1.0 the protocol can liquidate; treat as a breached
            // stop for the leveraged case
            RiskMetric::HealthFactor(hf) => *hf < Decimal::ONE,
            RiskMetric::StopDistance(dist) => *dist <= Decimal::ZERO,
        }
    }

    fn ratchet_trailing_stop(&mut self, config: &EngineConfig, mid: Decimal) {
        if self.position.profit_multiple(mid) < config.profit_protect_multiple {
            return;
        }
        let candidate = trail_price(
            self.position.high_water_mark,
            config.trail_pct,
            self.position.side(),
        );
        if self.position.ratchet_stop(candidate) {
            debug!(
                "position {}: trailing stop ratcheted to {}",
                self.position.id, candidate
            );
        }
    }

    fn tighten_stop(&mut self, config: &EngineConfig, mid: Decimal) {
        let candidate = trail_price(mid, config.tightened_trail_pct, self.position.side());
        if self.position.ratchet_stop(candidate) {
            debug!(
                "position {}: stop tightened to {} on exit-band entry",
                self.position.id, candidate
            );
        }
    }

    fn emit_emergency(
        &mut self,
        _config: &EngineConfig,
        input: &CycleInput,
        outcome: &mut CycleOutcome,
    ) {
        let reason = if self.metric_breached(&input.metric) {
            format!("stop breached ({})", input.metric)
        } else {
            format!("urgency {} at emergency threshold", input.urgency)
        };
        let remaining = self.position.remaining_fraction();
        if remaining > Decimal::ZERO {
            let request = ActionRequest::new(
                self.position.id,
                ActionKind::EmergencyExit,
                remaining,
                reason.clone(),
                input.cycle,
            );
            self.pending = Some(request.clone());
            self.revert_state = Some(self.state);
            outcome.action = Some(request);
        }
        self.transition(PositionState::EmergencyExited, input, &reason, outcome);
    }

    fn emit(
        &mut self,
        _config: &EngineConfig,
        input: &CycleInput,
        kind: ActionKind,
        fraction: Decimal,
        reason: &str,
        to: PositionState,
        outcome: &mut CycleOutcome,
    ) {
        let remaining = self.position.remaining_fraction();
        let fraction = fraction.min(remaining);
        // An exit that covers everything left is a full exit, still subject
        // to the slippage gate
        let kind = if kind == ActionKind::PartialExit && fraction == remaining {
            ActionKind::FullExit
        } else {
            kind
        };
        if fraction > Decimal::ZERO {
            let request =
                ActionRequest::new(self.position.id, kind, fraction, reason, input.cycle);
            self.pending = Some(request.clone());
            self.revert_state = Some(self.state);
            outcome.action = Some(request);
        }
        self.transition(to, input, reason, outcome);
    }

    fn transition(
        &mut self,
        to: PositionState,
        input: &CycleInput,
        reason: &str,
        outcome: &mut CycleOutcome,
    ) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        info!(
            "position {} {} -> {} ({})",
            self.position.id, from, to, reason
        );
        outcome.events.push(EngineEvent::Transition {
            position_id: self.position.id,
            from,
            to,
            metric: Some(input.metric),
            urgency: input.urgency,
            reason: reason.to_string(),
            timestamp: input.now,
        });
    }

    /// Count consecutive cycles below the reversion threshold; after enough
    /// of them the band is left toward Active
    fn hysteresis_step(
        &mut self,
        config: &EngineConfig,
        input: &CycleInput,
        outcome: &mut CycleOutcome,
    ) {
        let entry = match self.state {
            PositionState::Trimming => config.trim_band_start,
            PositionState::ExitPending => config.exit_band_start,
            _ => return,
        };
        let reversion = entry.saturating_sub(config.hysteresis_margin);

        if input.urgency.value() < reversion {
            self.below_band_streak += 1;
            if self.below_band_streak >= config.hysteresis_cycles {
                let reason = format!(
                    "urgency {} below reversion threshold {} for {} cycles",
                    input.urgency, reversion, self.below_band_streak
                );
                self.below_band_streak = 0;
                self.transition(PositionState::Active, input, &reason, outcome);
            }
        } else {
            self.below_band_streak = 0;
        }
    }

    /// Fire newly crossed profit-ladder rungs, each at most once
    fn take_profit_tiers(
        &mut self,
        config: &EngineConfig,
        input: &CycleInput,
        outcome: &mut CycleOutcome,
    ) {
        let multiple = self.position.profit_multiple(input.mid_price);
        let mut fraction = Decimal::ZERO;
        let mut armed = None;
        for (i, tier) in config.profit_tiers.iter().enumerate() {
            if !self.tiers_taken[i] && multiple >= tier.multiple {
                self.tiers_taken[i] = true;
                fraction += tier.fraction;
                armed = Some(tier.multiple);
            }
        }
        let Some(top) = armed else { return };

        // The ladder never de-escalates: a rung crossed while the exit band
        // holds the state fires without leaving ExitPending
        let to = if self.state == PositionState::ExitPending {
            self.state
        } else {
            PositionState::Trimming
        };
        let reason = format!("profit ladder: {}x tier crossed", top);
        self.emit(
            config,
            input,
            ActionKind::PartialExit,
            fraction,
            &reason,
            to,
            outcome,
        );
    }
}

/// Stop price trailing `pct` on the losing side of `reference`
fn trail_price(reference: Decimal, pct: Decimal, side: PositionSide) -> Decimal {
    match side {
        PositionSide::Long => reference * (Decimal::ONE - pct),
        PositionSide::Short => reference * (Decimal::ONE + pct),
    }
}

/// Convenience for tests and the scheduler's bookkeeping
pub fn transition_event_to(events: &[EngineEvent], to: PositionState) -> Option<&EngineEvent> {
    events.iter().find(
        |e| matches!(e, EngineEvent::Transition { to: t, .. } if *t == to),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn create_test_machine() -> (PositionMachine, EngineConfig) {
        let config = EngineConfig::default();
        let position = Position::directional("PUMP", PositionSide::Long, dec!(1000), dec!(1.00));
        (PositionMachine::new(position, &config), config)
    }

    fn input(cycle: u64, urgency: u8, mid: Decimal) -> CycleInput {
        CycleInput {
            cycle,
            metric: RiskMetric::StopDistance(dec!(0.5)),
            urgency: UrgencyScore::new(urgency),
            mid_price: mid,
            now: Utc::now(),
        }
    }

    fn fill(machine: &mut PositionMachine, config: &EngineConfig, fraction: Decimal, price: Decimal) {
        machine
            .apply_dispatch_result(
                config,
                &DispatchResult::Filled {
                    fraction,
                    avg_price: price,
                },
                Utc::now(),
            )
            .unwrap();
    }

    #[test]
    fn test_calm_cycle_emits_nothing() {
        let (mut machine, config) = create_test_machine();

        let outcome = machine.evaluate(&config, &input(1, 10, dec!(1.00)));

        assert!(outcome.action.is_none());
        assert!(outcome.events.is_empty());
        assert_eq!(machine.state(), PositionState::Active);
    }

    #[test]
    fn test_trim_band_entry() {
        let (mut machine, config) = create_test_machine();

        let outcome = machine.evaluate(&config, &input(1, 45, dec!(1.00)));

        let action = outcome.action.unwrap();
        assert_eq!(action.kind, ActionKind::PartialExit);
        assert_eq!(action.fraction, dec!(0.25));
        assert!(!action.bypass_slippage_limit);
        assert_eq!(machine.state(), PositionState::Trimming);
        assert!(transition_event_to(&outcome.events, PositionState::Trimming).is_some());
    }

    #[test]
    fn test_exit_band_entry_tightens_stop() {
        let (mut machine, config) = create_test_machine();

        let outcome = machine.evaluate(&config, &input(1, 65, dec!(1.00)));

        let action = outcome.action.unwrap();
        assert_eq!(action.fraction, dec!(0.60));
        assert_eq!(machine.state(), PositionState::ExitPending);
        // Stop tightened to 10% under mid
        assert_eq!(machine.position().stop_price, Some(dec!(0.90)));
    }

    #[test]
    fn test_emergency_urgency_jump() {
        // Urgency 30 -> 85 in one cycle exits everything directly
        let (mut machine, config) = create_test_machine();

        let calm = machine.evaluate(&config, &input(1, 30, dec!(1.00)));
        assert!(calm.action.is_none());

        let outcome = machine.evaluate(&config, &input(2, 85, dec!(1.00)));

        let action = outcome.action.unwrap();
        assert_eq!(action.kind, ActionKind::EmergencyExit);
        assert_eq!(action.fraction, Decimal::ONE);
        assert!(action.bypass_slippage_limit);
        assert_eq!(machine.state(), PositionState::EmergencyExited);
    }

    #[test]
    fn test_stop_breach_is_emergency() {
        let (mut machine, config) = create_test_machine();

        let breached = CycleInput {
            metric: RiskMetric::StopDistance(dec!(-0.05)),
            ..input(1, 0, dec!(0.65))
        };
        let outcome = machine.evaluate(&config, &breached);

        assert_eq!(outcome.action.unwrap().kind, ActionKind::EmergencyExit);
        assert_eq!(machine.state(), PositionState::EmergencyExited);
    }

    #[test]
    fn test_liquidatable_health_factor_is_emergency() {
        let config = EngineConfig::default();
        let position = Position::leveraged(
            "ETH",
            vec![],
            vec![],
            dec!(10),
            dec!(2000),
        );
        let mut machine = PositionMachine::new(position, &config);

        let breached = CycleInput {
            metric: RiskMetric::HealthFactor(dec!(0.95)),
            ..input(1, 0, dec!(2000))
        };
        let outcome = machine.evaluate(&config, &breached);

        assert_eq!(outcome.action.unwrap().kind, ActionKind::EmergencyExit);
    }

    #[test]
    fn test_infinite_health_factor_stays_active() {
        let config = EngineConfig::default();
        let position = Position::leveraged(
            "ETH",
            vec![],
            vec![],
            dec!(10),
            dec!(2000),
        );
        let mut machine = PositionMachine::new(position, &config);

        let sentinel = CycleInput {
            metric: RiskMetric::HealthFactor(Decimal::MAX),
            ..input(1, 0, dec!(2000))
        };
        let outcome = machine.evaluate(&config, &sentinel);

        assert!(outcome.action.is_none());
        assert_eq!(machine.state(), PositionState::Active);
    }

    #[test]
    fn test_pending_action_suppresses_emission() {
        let (mut machine, config) = create_test_machine();

        let first = machine.evaluate(&config, &input(1, 45, dec!(1.00)));
        assert!(first.action.is_some());

        // No dispatch result yet: nothing new even at higher urgency
        let second = machine.evaluate(&config, &input(2, 50, dec!(1.00)));
        assert!(second.action.is_none());
    }

    #[test]
    fn test_profit_ladder_fires_each_tier_once() {
        let (mut machine, config) = create_test_machine();

        // Price triples: the 2x and 3x rungs fire together for 0.50
        let outcome = machine.evaluate(&config, &input(1, 0, dec!(3.00)));
        let action = outcome.action.unwrap();
        assert_eq!(action.fraction, dec!(0.50));
        assert_eq!(machine.state(), PositionState::Trimming);
        fill(&mut machine, &config, dec!(0.50), dec!(3.00));

        // Price falls back to 2x: no re-trigger
        let outcome = machine.evaluate(&config, &input(2, 0, dec!(2.00)));
        assert!(outcome.action.is_none());

        // New high past 5x fires the last rung, capped at what remains
        let outcome = machine.evaluate(&config, &input(3, 0, dec!(5.50)));
        assert_eq!(outcome.action.unwrap().fraction, dec!(0.50));
    }

    #[test]
    fn test_hysteresis_prevents_flapping() {
        let (mut machine, config) = create_test_machine();

        let outcome = machine.evaluate(&config, &input(1, 65, dec!(1.00)));
        fill(&mut machine, &config, outcome.action.unwrap().fraction, dec!(1.00));
        assert_eq!(machine.state(), PositionState::ExitPending);

        // Oscillation just under the band boundary never reverts
        for (cycle, urgency) in [(2, 59), (3, 61), (4, 59), (5, 61), (6, 59)] {
            machine.evaluate(&config, &input(cycle, urgency, dec!(1.00)));
            assert_eq!(machine.state(), PositionState::ExitPending);
        }

        // Two deep drops are not enough at hysteresis_cycles = 3
        machine.evaluate(&config, &input(7, 30, dec!(1.00)));
        machine.evaluate(&config, &input(8, 30, dec!(1.00)));
        assert_eq!(machine.state(), PositionState::ExitPending);

        // An interruption resets the streak
        machine.evaluate(&config, &input(9, 58, dec!(1.00)));
        machine.evaluate(&config, &input(10, 30, dec!(1.00)));
        machine.evaluate(&config, &input(11, 30, dec!(1.00)));
        assert_eq!(machine.state(), PositionState::ExitPending);

        // Three consecutive below-margin cycles revert
        let outcome = machine.evaluate(&config, &input(12, 30, dec!(1.00)));
        assert_eq!(machine.state(), PositionState::Active);
        assert!(transition_event_to(&outcome.events, PositionState::Active).is_some());
    }

    #[test]
    fn test_confirmed_exits_reach_terminal_state() {
        let (mut machine, config) = create_test_machine();

        let outcome = machine.evaluate(&config, &input(1, 65, dec!(1.00)));
        fill(&mut machine, &config, outcome.action.unwrap().fraction, dec!(1.00));
        assert_eq!(machine.state(), PositionState::ExitPending);

        // Remaining 0.40 exits via the ladder at 2x
        let outcome = machine.evaluate(&config, &input(2, 65, dec!(2.00)));
        // Already ExitPending: band does not re-emit, ladder does
        let action = outcome.action.unwrap();
        assert_eq!(action.fraction, dec!(0.25));
        fill(&mut machine, &config, dec!(0.25), dec!(2.00));

        let outcome = machine.evaluate(&config, &input(3, 65, dec!(3.00)));
        let action = outcome.action.unwrap();
        // 3x rung wants 0.25 but only 0.15 remains
        assert_eq!(action.fraction, dec!(0.15));
        fill(&mut machine, &config, dec!(0.15), dec!(3.00));

        assert_eq!(machine.state(), PositionState::Exited);
        assert_eq!(machine.position().exited_fraction, Decimal::ONE);
        assert!(machine.position().is_closed());

        // Terminal: further cycles are inert
        let outcome = machine.evaluate(&config, &input(4, 90, dec!(3.00)));
        assert!(outcome.action.is_none());
    }

    #[test]
    fn test_exits_never_sum_past_original() {
        let (mut machine, config) = create_test_machine();

        let mut total = Decimal::ZERO;
        for cycle in 1..20 {
            let outcome = machine.evaluate(&config, &input(cycle, 65, dec!(1.00) + Decimal::from(cycle)));
            if let Some(action) = outcome.action {
                total += action.fraction;
                fill(&mut machine, &config, action.fraction, dec!(2.00));
            }
        }

        assert!(total <= Decimal::ONE);
        assert!(machine.position().exited_fraction <= Decimal::ONE);
    }

    #[test]
    fn test_trailing_stop_monotonic_over_price_path() {
        let (mut machine, config) = create_test_machine();

        let path = [
            dec!(1.40), dec!(1.60), dec!(1.55), dec!(2.10), dec!(1.90),
            dec!(2.50), dec!(2.40), dec!(3.10), dec!(2.00),
        ];
        let mut last_stop = Decimal::ZERO;
        for (i, mid) in path.iter().enumerate() {
            let outcome = machine.evaluate(&config, &input(i as u64 + 1, 0, *mid));
            if let Some(action) = outcome.action {
                fill(&mut machine, &config, action.fraction, *mid);
            }
            if let Some(stop) = machine.position().stop_price {
                assert!(stop >= last_stop, "stop loosened: {} -> {}", last_stop, stop);
                last_stop = stop;
            }
        }

        // Armed at 1.60 (>= 1.5x) and trailing 20% under the 3.10 peak
        assert_eq!(machine.position().stop_price, Some(dec!(2.480)));
    }

    #[test]
    fn test_failed_dispatches_raise_action_stuck() {
        let (mut machine, config) = create_test_machine();

        let mut stuck = Vec::new();
        for cycle in 1..=3 {
            let outcome = machine.evaluate(&config, &input(cycle, 45, dec!(1.00)));
            assert!(outcome.action.is_some(), "failed dispatch must re-emit next cycle");
            stuck = machine
                .apply_dispatch_result(
                    &config,
                    &DispatchResult::Failed {
                        reason: "venue offline".to_string(),
                    },
                    Utc::now(),
                )
                .unwrap();
        }

        assert!(
            stuck
                .iter()
                .any(|e| matches!(e, EngineEvent::ActionStuck { attempts: 3, .. }))
        );
        // Each failure fell back to Active so the trim could re-fire
        assert_eq!(machine.state(), PositionState::Active);
    }

    #[test]
    fn test_pending_dispatch_keeps_action_in_flight() {
        let (mut machine, config) = create_test_machine();

        let outcome = machine.evaluate(&config, &input(1, 45, dec!(1.00)));
        let key = outcome.action.unwrap().idempotency_key;

        let events = machine
            .apply_dispatch_result(&config, &DispatchResult::Pending, Utc::now())
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(
            machine.pending_action().map(|a| a.idempotency_key.clone()),
            Some(key)
        );
    }

    #[test]
    fn test_dispatch_result_without_pending_is_rejected() {
        let (mut machine, config) = create_test_machine();

        let err = machine
            .apply_dispatch_result(
                &config,
                &DispatchResult::Filled {
                    fraction: dec!(0.25),
                    avg_price: dec!(1.00),
                },
                Utc::now(),
            )
            .unwrap_err();
        assert_eq!(err, EngineError::NoActionInFlight);
    }

    #[test]
    fn test_partial_fill_reevaluates_with_remainder() {
        let (mut machine, config) = create_test_machine();

        let outcome = machine.evaluate(&config, &input(1, 65, dec!(1.00)));
        assert_eq!(outcome.action.unwrap().fraction, dec!(0.60));

        machine
            .apply_dispatch_result(
                &config,
                &DispatchResult::PartialFill {
                    fraction: dec!(0.20),
                    avg_price: dec!(1.00),
                },
                Utc::now(),
            )
            .unwrap();

        assert_eq!(machine.position().exited_fraction, dec!(0.20));
        assert!(machine.pending_action().is_none());
        // Next cycle is free to emit again against the updated remainder
        let outcome = machine.evaluate(&config, &input(2, 0, dec!(2.00)));
        assert_eq!(outcome.action.unwrap().fraction, dec!(0.25));
    }

    #[test]
    fn test_halted_position_is_inert() {
        let (mut machine, config) = create_test_machine();

        let event = machine.halt("decimal overflow in health factor", Utc::now());
        assert!(matches!(event, EngineEvent::PositionHalted { .. }));
        assert_eq!(machine.state(), PositionState::Halted);

        let outcome = machine.evaluate(&config, &input(1, 90, dec!(1.00)));
        assert!(outcome.action.is_none());
    }

    #[test]
    fn test_ladder_does_not_downgrade_exit_pending() {
        let (mut machine, config) = create_test_machine();

        let outcome = machine.evaluate(&config, &input(1, 65, dec!(1.00)));
        fill(&mut machine, &config, outcome.action.unwrap().fraction, dec!(1.00));
        assert_eq!(machine.state(), PositionState::ExitPending);

        // 2x rung fires while urgency holds the exit band: the state stays
        // put, no de-escalation event
        let outcome = machine.evaluate(&config, &input(2, 65, dec!(2.00)));
        assert_eq!(outcome.action.unwrap().fraction, dec!(0.25));
        assert_eq!(machine.state(), PositionState::ExitPending);
        assert!(outcome.events.is_empty());
        fill(&mut machine, &config, dec!(0.25), dec!(2.00));

        // The exit band does not re-fire for the same entry next cycle
        let outcome = machine.evaluate(&config, &input(3, 65, dec!(2.00)));
        assert!(outcome.action.is_none());
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn test_failed_emergency_refires_next_cycle() {
        let (mut machine, config) = create_test_machine();

        let outcome = machine.evaluate(&config, &input(1, 90, dec!(1.00)));
        assert_eq!(outcome.action.as_ref().unwrap().kind, ActionKind::EmergencyExit);
        assert_eq!(machine.state(), PositionState::EmergencyExited);

        let events = machine
            .apply_dispatch_result(
                &config,
                &DispatchResult::Failed {
                    reason: "venue offline".to_string(),
                },
                Utc::now(),
            )
            .unwrap();

        // Fell back so the exit is not silently lost
        assert_eq!(machine.state(), PositionState::Active);
        assert!(transition_event_to(&events, PositionState::Active).is_some());

        let outcome = machine.evaluate(&config, &input(2, 90, dec!(1.00)));
        assert_eq!(outcome.action.unwrap().kind, ActionKind::EmergencyExit);
    }
}
