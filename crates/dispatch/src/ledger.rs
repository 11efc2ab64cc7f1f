use std::collections::{HashMap, VecDeque};

use vigil_ports::DispatchResult;

/// Bounded FIFO record of resolved dispatches, keyed by idempotency key
///
/// A key present here was delivered to the executor and resolved; a retry
/// replays the recorded result instead of calling out again. `Pending`
/// results are never recorded. When full, the oldest entry is evicted -
/// the executor's own server-side dedup is the second line of defense for
/// very late retries.
#[derive(Debug)]
pub struct KeyLedger {
    capacity: usize,
    order: VecDeque<String>,
    results: HashMap<String, DispatchResult>,
}

impl KeyLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::with_capacity(capacity.max(1)),
            results: HashMap::with_capacity(capacity.max(1)),
        }
    }

    /// Recorded result for a key, if still retained
    pub fn get(&self, key: &str) -> Option<DispatchResult> {
        self.results.get(key).cloned()
    }

    /// Record a resolved dispatch, evicting the oldest entry when full
    pub fn record(&mut self, key: String, result: DispatchResult) {
        if self.results.contains_key(&key) {
            self.results.insert(key, result);
            return;
        }
        if self.order.len() == self.capacity
            && let Some(evicted) = self.order.pop_front()
        {
            self.results.remove(&evicted);
        }
        self.order.push_back(key.clone());
        self.results.insert(key, result);
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
