//! Store wrapper that misbehaves on purpose
//!
//! Lets tests prove that the workload actually catches a broken store:
//! after a configurable number of healthy operations, the wrapper starts
//! violating the store contract in the chosen way.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use casprobe_core::{CasOutcome, Error, Key, KvStore, Result, Value};

/// How the wrapped store misbehaves once faults are active
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultMode {
    /// Report the opposite of the real `applied` flag
    FlipCasApplied,
    /// Acknowledge writes without applying them
    LoseWrites,
    /// Fail every operation with a transport error
    Unreachable,
}

/// Wraps a store and injects `mode` after `healthy_ops` operations
#[derive(Debug)]
pub struct FaultyStore<S> {
    inner: S,
    mode: FaultMode,
    healthy_ops: u64,
    seen: AtomicU64,
}

impl<S: KvStore> FaultyStore<S> {
    /// Wrap `inner`; the first `healthy_ops` operations behave correctly
    pub fn new(inner: S, mode: FaultMode, healthy_ops: u64) -> Self {
        FaultyStore {
            inner,
            mode,
            healthy_ops,
            seen: AtomicU64::new(0),
        }
    }

    /// The wrapped store
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Count one operation; true once the healthy budget is spent
    fn tick(&self) -> bool {
        self.seen.fetch_add(1, Ordering::Relaxed) >= self.healthy_ops
    }

    fn active(&self, mode: FaultMode) -> bool {
        self.tick() && self.mode == mode
    }
}

#[async_trait]
impl<S: KvStore> KvStore for FaultyStore<S> {
    async fn read(&self, key: &Key) -> Result<Option<Value>> {
        if self.active(FaultMode::Unreachable) {
            return Err(Error::transport("injected: store unreachable"));
        }
        self.inner.read(key).await
    }

    async fn write(&self, key: &Key, value: &Value) -> Result<()> {
        let faulty = self.tick();
        match self.mode {
            FaultMode::Unreachable if faulty => {
                Err(Error::transport("injected: store unreachable"))
            }
            FaultMode::LoseWrites if faulty => Ok(()),
            _ => self.inner.write(key, value).await,
        }
    }

    async fn conditional_write(
        &self,
        key: &Key,
        value: &Value,
        expected: Option<&Value>,
    ) -> Result<CasOutcome> {
        let faulty = self.tick();
        match self.mode {
            FaultMode::Unreachable if faulty => {
                Err(Error::transport("injected: store unreachable"))
            }
            FaultMode::LoseWrites if faulty => {
                // Claim success without touching the data
                let previous = self.inner.read(key).await?;
                let applied = previous.as_ref() == expected;
                Ok(CasOutcome { applied, previous })
            }
            FaultMode::FlipCasApplied if faulty => {
                let mut outcome = self.inner.conditional_write(key, value, expected).await?;
                outcome.applied = !outcome.applied;
                Ok(outcome)
            }
            _ => self.inner.conditional_write(key, value, expected).await,
        }
    }
}
