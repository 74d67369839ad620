use std::collections::HashMap;
use std::time::Duration;

use ocs_store::ObjectKey;

/// Per-key exponential backoff: `base * 2^failures`, capped at `max`.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: HashMap<ObjectKey, u32>,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: HashMap::new(),
        }
    }

    /// Record a failure of `key` and return how long to wait before retrying.
    pub fn next_delay(&mut self, key: &ObjectKey) -> Duration {
        let failures = self.failures.entry(key.clone()).or_insert(0);
        let delay = self
            .base
            .saturating_mul(2u32.saturating_pow(*failures))
            .min(self.max);
        *failures = failures.saturating_add(1);
        delay
    }

    pub fn failures(&self, key: &ObjectKey) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }

    /// Reset `key` after a successful pass.
    pub fn forget(&mut self, key: &ObjectKey) {
        self.failures.remove(key);
    }
}
