//! Page-level query cache abstraction
//!
//! The surrounding application caches fetched queries under string keys
//! (detail rows under `detail/{entity}/{id}`). The core only needs to ask
//! for invalidation after a save, so the cache is abstracted to a trait
//! with an invalidate-by-predicate operation. A small in-memory
//! implementation is provided for applications and tests.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

/// Cache key for one entity's detail row.
pub fn detail_key(entity: &str, id: &str) -> String {
    format!("detail/{entity}/{id}")
}

pub trait QueryCache {
    fn get(&self, key: &str) -> Option<Value>;
    fn put(&self, key: &str, value: Value);
    /// Drop every entry whose key matches the predicate.
    fn invalidate_matching(&self, predicate: &dyn Fn(&str) -> bool);
}

/// Simple process-local key-value cache.
#[derive(Default)]
pub struct MemoryQueryCache {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryQueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl QueryCache for MemoryQueryCache {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn put(&self, key: &str, value: Value) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value);
        }
    }

    fn invalidate_matching(&self, predicate: &dyn Fn(&str) -> bool) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|key, _| !predicate(key));
        }
    }
}
