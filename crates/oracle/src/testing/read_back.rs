//! Outcome inference for stores with a silent conditional write
//!
//! Some stores accept a conditional write but never say whether it applied.
//! [`ReadBackCas`] turns such a store into a [`KvStore`] by reading the key
//! before and after the write. Only valid when the harness is the sole
//! writer of the key.

use async_trait::async_trait;
use tracing::warn;

use casprobe_core::{BlindKvStore, CasOutcome, Error, Key, KvStore, Result, Value};

/// Adapts a [`BlindKvStore`] to the [`KvStore`] contract
#[derive(Debug)]
pub struct ReadBackCas<S> {
    inner: S,
}

impl<S: BlindKvStore> ReadBackCas<S> {
    /// Wrap `inner`
    pub fn new(inner: S) -> Self {
        ReadBackCas { inner }
    }

    /// The wrapped store
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: BlindKvStore> KvStore for ReadBackCas<S> {
    async fn read(&self, key: &Key) -> Result<Option<Value>> {
        self.inner.read(key).await
    }

    async fn write(&self, key: &Key, value: &Value) -> Result<()> {
        self.inner.write(key, value).await
    }

    async fn conditional_write(
        &self,
        key: &Key,
        value: &Value,
        expected: Option<&Value>,
    ) -> Result<CasOutcome> {
        let previous = self.inner.read(key).await?;
        self.inner
            .conditional_write_unchecked(key, value, expected)
            .await?;
        let after = self.inner.read(key).await?;

        let applied = previous.as_ref() == expected;
        let consistent = if applied {
            after.as_ref() == Some(value)
        } else {
            after == previous
        };
        if !consistent {
            warn!(
                target: "casprobe::oracle",
                key = %key,
                "value after conditional write does not match its inferred outcome"
            );
            return Err(Error::invariant(format!(
                "cas on {}: before {:?}, expected {:?}, wrote {}, after {:?}",
                key, previous, expected, value, after
            )));
        }
        Ok(CasOutcome { applied, previous })
    }
}
