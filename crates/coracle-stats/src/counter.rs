//! Named client counters
//!
//! Counters carry a storage class; only log+table counters are published
//! to the statistics table.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Where a counter's values end up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    /// Appears in periodic log dumps only
    LogOnly,
    /// Appears in log dumps and the statistics table
    LogAndTable,
}

/// A monotonically increasing named counter
#[derive(Debug)]
pub struct Counter {
    name: String,
    storage: StorageClass,
    value: AtomicU64,
}

impl Counter {
    fn new(name: impl Into<String>, storage: StorageClass) -> Self {
        Self {
            name: name.into(),
            storage,
            value: AtomicU64::new(0),
        }
    }

    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn storage(&self) -> StorageClass {
        self.storage
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of one counter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub name: String,
    pub storage: StorageClass,
    /// Rendered value, as it would appear in a table row
    pub value: String,
}

/// Registry of all counters owned by one client
#[derive(Debug, Default)]
pub struct CounterRegistry {
    counters: Mutex<Vec<Arc<Counter>>>,
}

impl CounterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a counter; the returned handle is cheap to clone and bump
    pub fn register(&self, name: impl Into<String>, storage: StorageClass) -> Arc<Counter> {
        let counter = Arc::new(Counter::new(name, storage));
        self.counters
            .lock()
            .expect("counter registry poisoned")
            .push(counter.clone());
        counter
    }

    /// Snapshot every registered counter
    pub fn snapshot(&self) -> Vec<CounterSnapshot> {
        self.counters
            .lock()
            .expect("counter registry poisoned")
            .iter()
            .map(|c| CounterSnapshot {
                name: c.name().to_string(),
                storage: c.storage(),
                value: c.value().to_string(),
            })
            .collect()
    }
}
