//! Coordination cache shared across running detector instances.
//!
//! A schema-free key/value map with compare-and-swap. Detectors use it to
//! elect a single winner among overlapping triggered instances (e.g. "only
//! one of us sends the alert for this subject").

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

/// Mutex-guarded key/value map with compare-and-swap semantics.
///
/// Values are owned entirely by detector code; the core never interprets
/// them.
#[derive(Debug, Default)]
pub struct CoordinationCache {
    entries: Mutex<HashMap<String, Value>>,
}

impl CoordinationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    /// Unconditional overwrite.
    pub fn put(&self, key: &str, value: Value) {
        self.lock().insert(key.to_string(), value);
    }

    /// Store `new_value` only if the current state equals `expected`
    /// (`None` = the key was never stored). Returns whether the swap
    /// happened. Atomic with respect to every other cache operation, so
    /// among racing callers attempting the same transition exactly one
    /// succeeds.
    pub fn compare_and_swap(&self, key: &str, new_value: Value, expected: Option<Value>) -> bool {
        let mut entries = self.lock();
        if entries.get(key) == expected.as_ref() {
            entries.insert(key.to_string(), new_value);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        // A poisoned lock only means some writer panicked mid-call; the map
        // itself is still a consistent HashMap.
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
