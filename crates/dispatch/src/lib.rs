//! Vigil Action Dispatcher
//!
//! Sits between the state machine and the executor collaborator. Its one
//! job is delivery discipline: for every idempotency key the executor sees
//! at most one live call, retries replay the recorded outcome, and a call
//! that outlives its wait is parked and resumed rather than reissued.

mod dispatcher;
mod ledger;

pub use dispatcher::Dispatcher;
pub use ledger::KeyLedger;
