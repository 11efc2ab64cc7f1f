use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use log::{debug, warn};
use tokio::task::JoinHandle;

use vigil_core::ActionRequest;
use vigil_ports::{DispatchResult, Executor, ExecutorResult};

use crate::ledger::KeyLedger;

/// Translates emitted actions into at-most-once executor calls
///
/// Three layers keep delivery at most once per idempotency key:
/// - the ledger replays resolved results for retried keys
/// - a timed-out executor call is parked, not abandoned; a retry resumes
///   waiting on the same call instead of issuing a second one
/// - the executor's server-side dedup backstops keys the bounded ledger has
///   already evicted
pub struct Dispatcher {
    executor: Arc<dyn Executor>,
    /// How long one dispatch waits before reporting `Pending`
    timeout: Duration,
    ledger: Mutex<KeyLedger>,
    /// Executor calls that outlived their wait, keyed by idempotency key
    in_flight: DashMap<String, JoinHandle<ExecutorResult<DispatchResult>>>,
}

impl Dispatcher {
    pub fn new(executor: Arc<dyn Executor>, timeout: Duration, ledger_capacity: usize) -> Self {
        Self {
            executor,
            timeout,
            ledger: Mutex::new(KeyLedger::new(ledger_capacity)),
            in_flight: DashMap::new(),
        }
    }

    /// Dispatch one action request
    ///
    /// Safe to call repeatedly with the same key; the executor is invoked at
    /// most once per key while the key is retained.
    pub async fn dispatch(&self, request: &ActionRequest) -> DispatchResult {
        let key = request.idempotency_key.clone();

        if let Some(recorded) = self.recorded(&key) {
            debug!("dispatch {}: replaying recorded result", key);
            return recorded;
        }

        // A previous attempt timed out: resume waiting on the same call
        // rather than invoking the executor again.
        if let Some((_, handle)) = self.in_flight.remove(&key) {
            debug!("dispatch {}: resuming parked executor call", key);
            return self.await_resolution(key, handle).await;
        }

        let executor = Arc::clone(&self.executor);
        let owned = request.clone();
        let handle = tokio::spawn(async move { executor.execute(&owned).await });
        self.await_resolution(key, handle).await
    }

    /// Abort any parked executor calls (shutdown path)
    pub fn abort_in_flight(&self) {
        for entry in self.in_flight.iter() {
            entry.value().abort();
        }
        self.in_flight.clear();
    }

    async fn await_resolution(
        &self,
        key: String,
        mut handle: JoinHandle<ExecutorResult<DispatchResult>>,
    ) -> DispatchResult {
        match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(Ok(Ok(result))) => {
                self.record(&key, result.clone());
                result
            }
            Ok(Ok(Err(err))) => {
                warn!("dispatch {}: executor error: {}", key, err);
                let result = DispatchResult::Failed {
                    reason: err.to_string(),
                };
                self.record(&key, result.clone());
                result
            }
            Ok(Err(join_err)) => {
                warn!("dispatch {}: executor task died: {}", key, join_err);
                let result = DispatchResult::Failed {
                    reason: format!("executor task died: {}", join_err),
                };
                self.record(&key, result.clone());
                result
            }
            Err(_) => {
                debug!(
                    "dispatch {}: no resolution within {:?}, parking",
                    key, self.timeout
                );
                self.in_flight.insert(key, handle);
                DispatchResult::Pending
            }
        }
    }

    fn recorded(&self, key: &str) -> Option<DispatchResult> {
        self.ledger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
    }

    fn record(&self, key: &str, result: DispatchResult) {
        self.ledger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(key.to_string(), result);
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.abort_in_flight();
    }
}
