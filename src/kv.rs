//! Shared key-value state.
//!
//! Components that need small pieces of mutable shared state take an
//! `Arc<dyn KvStore>` at construction instead of reaching for a global map.
//! [`MemoryKv`] serves a single instance; a multi-instance deployment plugs
//! in an implementation over a shared cache.

use dashmap::DashMap;

pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// Insert or overwrite.
    fn set(&self, key: &str, value: String);

    /// Returns whether a value was present.
    fn delete(&self, key: &str) -> bool;

    /// Replace the value at `key` with `new` only if it currently equals
    /// `expected`. Atomic with respect to every other operation on `key`.
    fn compare_and_swap(&self, key: &str, expected: &str, new: String) -> bool;

    /// Add `by` to the integer at `key` (absent counts as 0) and return the
    /// new value.
    fn increment(&self, key: &str, by: i64) -> i64;
}

/// In-process [`KvStore`] over a sharded concurrent map.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: DashMap<String, String>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    fn set(&self, key: &str, value: String) {
        self.entries.insert(key.to_string(), value);
    }

    fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    fn compare_and_swap(&self, key: &str, expected: &str, new: String) -> bool {
        // get_mut holds the shard write lock for the compare and the store.
        match self.entries.get_mut(key) {
            Some(mut current) if constant_time_eq(current.as_bytes(), expected.as_bytes()) => {
                *current = new;
                true
            }
            _ => false,
        }
    }

    fn increment(&self, key: &str, by: i64) -> i64 {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| "0".to_string());
        let value = entry.parse::<i64>().unwrap_or(0).saturating_add(by);
        *entry = value.to_string();
        value
    }
}

/// Constant-time byte comparison to prevent timing attacks.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
