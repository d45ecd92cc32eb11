//! In-memory reference store
//!
//! A correct, linearizable implementation of the store contract: every
//! operation runs under one lock. Used as the store under test in the
//! harness's own tests and behind the simulated cluster.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use casprobe_core::{BlindKvStore, CasOutcome, Key, KvStore, Result, Value};

/// Single-lock key-value store
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<Key, Value>>,
    operations: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every key/value pair
    pub fn snapshot(&self) -> HashMap<Key, Value> {
        self.data.lock().clone()
    }

    /// Operations served so far
    pub fn operations(&self) -> u64 {
        self.operations.load(Ordering::Relaxed)
    }

    fn cas(&self, key: &Key, value: &Value, expected: Option<&Value>) -> CasOutcome {
        self.operations.fetch_add(1, Ordering::Relaxed);
        let mut data = self.data.lock();
        let previous = data.get(key).cloned();
        if previous.as_ref() == expected {
            data.insert(key.clone(), value.clone());
            CasOutcome::applied(previous)
        } else {
            CasOutcome::rejected(previous)
        }
    }

    fn get(&self, key: &Key) -> Option<Value> {
        self.operations.fetch_add(1, Ordering::Relaxed);
        self.data.lock().get(key).cloned()
    }

    fn put(&self, key: &Key, value: &Value) {
        self.operations.fetch_add(1, Ordering::Relaxed);
        self.data.lock().insert(key.clone(), value.clone());
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn read(&self, key: &Key) -> Result<Option<Value>> {
        Ok(self.get(key))
    }

    async fn write(&self, key: &Key, value: &Value) -> Result<()> {
        self.put(key, value);
        Ok(())
    }

    async fn conditional_write(
        &self,
        key: &Key,
        value: &Value,
        expected: Option<&Value>,
    ) -> Result<CasOutcome> {
        Ok(self.cas(key, value, expected))
    }
}

#[async_trait]
impl BlindKvStore for MemoryStore {
    async fn read(&self, key: &Key) -> Result<Option<Value>> {
        Ok(self.get(key))
    }

    async fn write(&self, key: &Key, value: &Value) -> Result<()> {
        self.put(key, value);
        Ok(())
    }

    async fn conditional_write_unchecked(
        &self,
        key: &Key,
        value: &Value,
        expected: Option<&Value>,
    ) -> Result<()> {
        self.cas(key, value, expected);
        Ok(())
    }
}
