use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use vigil_engine::EngineConfig;
use vigil_signal::ScoringTable;

use crate::error::{RunnerError, RunnerResult};

/// Full configuration for one engine run
///
/// Everything tunable lives here; components receive their slice at
/// construction and nothing reads global state. `validate` runs once at
/// bootstrap and fails fast on inconsistent settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Decision-cycle interval in milliseconds
    pub cycle_interval_ms: u64,
    /// Budget per cycle in milliseconds; evaluations still running when it
    /// expires continue in the background and the cycle moves on
    pub cycle_budget_ms: u64,
    /// Maximum positions evaluated concurrently within one cycle
    pub worker_pool_size: usize,
    /// Market feed call timeout in milliseconds
    pub feed_timeout_ms: u64,
    /// Executor call timeout in milliseconds (after this a dispatch parks
    /// as `Pending`)
    pub executor_timeout_ms: u64,
    /// Resolved idempotency keys retained for replay
    pub ledger_capacity: usize,
    /// Maximum tolerated estimated slippage for non-emergency actions, as a
    /// fraction of mid
    pub max_slippage: Decimal,
    /// State machine tuning
    pub engine: EngineConfig,
    /// Urgency scoring table
    pub scoring: ScoringTable,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            cycle_interval_ms: 1_000,
            cycle_budget_ms: 5_000,
            worker_pool_size: 8,
            feed_timeout_ms: 250,
            executor_timeout_ms: 500,
            ledger_capacity: 4_096,
            max_slippage: dec!(0.05),
            engine: EngineConfig::default(),
            scoring: ScoringTable::default(),
        }
    }
}

impl RunnerConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }

    pub fn cycle_budget(&self) -> Duration {
        Duration::from_millis(self.cycle_budget_ms)
    }

    pub fn feed_timeout(&self) -> Duration {
        Duration::from_millis(self.feed_timeout_ms)
    }

    pub fn executor_timeout(&self) -> Duration {
        Duration::from_millis(self.executor_timeout_ms)
    }

    /// Check the whole configuration tree; called once at bootstrap
    pub fn validate(&self) -> RunnerResult<()> {
        if self.cycle_interval_ms == 0 {
            return Err(RunnerError::InvalidConfig(
                "cycle interval must be positive",
            ));
        }
        if self.cycle_budget_ms == 0 {
            return Err(RunnerError::InvalidConfig(
                "cycle budget must be positive",
            ));
        }
        if self.worker_pool_size == 0 {
            return Err(RunnerError::InvalidConfig(
                "worker pool needs at least one worker",
            ));
        }
        if self.ledger_capacity == 0 {
            return Err(RunnerError::InvalidConfig(
                "ledger must retain at least one key",
            ));
        }
        if self.max_slippage <= Decimal::ZERO || self.max_slippage >= Decimal::ONE {
            return Err(RunnerError::InvalidConfig(
                "max slippage must lie in (0, 1)",
            ));
        }
        self.engine.validate()?;
        self.scoring.validate()?;
        Ok(())
    }
}
