use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use vigil_core::ActionRequest;

use crate::error::ExecutorResult;

/// Outcome of dispatching one action request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DispatchResult {
    /// The requested fraction was fully executed
    Filled {
        /// Fraction of the original position size filled
        fraction: Decimal,
        /// Average fill price achieved
        avg_price: Decimal,
    },
    /// Only part of the requested fraction was executed
    PartialFill { fraction: Decimal, avg_price: Decimal },
    /// Still in flight - do not re-emit this cycle, re-check next cycle
    Pending,
    /// The executor rejected or errored; state is not advanced
    Failed { reason: String },
}

impl DispatchResult {
    /// Has this dispatch reached a terminal outcome?
    pub fn is_resolved(&self) -> bool {
        !matches!(self, DispatchResult::Pending)
    }
}

/// Port for the execution collaborator
///
/// Synchronous-looking but may be backed by an async broker. Must be safe
/// to call with a repeated idempotency key (server-side dedup is the second
/// line of defense; the dispatcher's ledger is the first).
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute one action request
    async fn execute(&self, request: &ActionRequest) -> ExecutorResult<DispatchResult>;
}
