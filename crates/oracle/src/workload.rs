//! Randomized workload generator
//!
//! Issues a long pseudo-random sequence of reads, writes and conditional
//! writes over a small fixed key universe. Every operation goes to the store
//! under test and to the shadow model; the two outcomes must be identical.
//!
//! Conditional writes deliberately target the key touched by the previous
//! iteration, expecting either the value the model holds for it or an
//! arbitrary pool value, so both successful and failing CAS attempts race
//! the harness's own most recent mutation.
//!
//! Iterations run strictly one after another: the operation is issued, its
//! outcome compared, and only then is the next one generated.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, error, info};

use casprobe_core::{
    CancellationToken, Error, Key, KvStore, OpOutcome, Operation, Result, Value, WorkloadConfig,
};

use crate::shadow::ShadowModel;

/// Keys and values the workload draws from
///
/// [`KeyUniverse::random`] draws keys and values from one pool of random
/// lowercase strings, so every value is also a valid key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyUniverse {
    keys: Vec<Key>,
    values: Vec<Value>,
}

impl KeyUniverse {
    /// Build a universe from explicit keys and values.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if either list is empty.
    pub fn new(keys: Vec<Key>, values: Vec<Value>) -> Result<Self> {
        if keys.is_empty() || values.is_empty() {
            return Err(Error::Config(
                "key universe needs at least one key and one value".to_string(),
            ));
        }
        Ok(KeyUniverse { keys, values })
    }

    /// `count` random strings of `len` lowercase letters, used as both keys
    /// and values
    pub fn random(rng: &mut impl Rng, count: usize, len: usize) -> Self {
        let pool: Vec<String> = (0..count.max(1))
            .map(|_| random_string(rng, len.max(1)))
            .collect();
        KeyUniverse {
            keys: pool.iter().cloned().map(Key::from).collect(),
            values: pool.into_iter().map(Value::from).collect(),
        }
    }

    /// Keys in the universe
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Values in the universe
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    fn pick_key(&self, rng: &mut StdRng) -> Key {
        self.keys[rng.gen_range(0..self.keys.len())].clone()
    }

    fn pick_value(&self, rng: &mut StdRng) -> Value {
        self.values[rng.gen_range(0..self.values.len())].clone()
    }
}

fn random_string(rng: &mut impl Rng, len: usize) -> String {
    (0..len).map(|_| rng.gen_range(b'a'..=b'z') as char).collect()
}

/// Counters describing a finished (or stopped) workload run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadReport {
    /// Seed the run was generated from
    pub seed: u64,
    /// Iterations fully completed and verified
    pub iterations: usize,
    /// Reads issued
    pub reads: usize,
    /// Unconditional writes issued
    pub writes: usize,
    /// Conditional writes that applied
    pub cas_applied: usize,
    /// Conditional writes that were rejected
    pub cas_rejected: usize,
}

impl std::fmt::Display for WorkloadReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "seed {}: {} iterations ({} reads, {} writes, {} cas applied, {} cas rejected)",
            self.seed,
            self.iterations,
            self.reads,
            self.writes,
            self.cas_applied,
            self.cas_rejected
        )
    }
}

/// Generates operations, checks them against the shadow model
pub struct WorkloadGenerator {
    rng: StdRng,
    universe: KeyUniverse,
    model: ShadowModel,
    last_key: Option<Key>,
    report: WorkloadReport,
}

impl WorkloadGenerator {
    /// Build a generator from configuration. A missing seed is drawn at
    /// random and logged so the run can be replayed.
    pub fn new(config: &WorkloadConfig) -> Self {
        let seed = config.seed.unwrap_or_else(rand::random);
        let mut rng = StdRng::seed_from_u64(seed);
        let universe = KeyUniverse::random(&mut rng, config.key_count, config.string_length);
        Self::from_parts(rng, seed, universe)
    }

    /// Build a generator over an explicit universe
    pub fn with_universe(universe: KeyUniverse, seed: u64) -> Self {
        Self::from_parts(StdRng::seed_from_u64(seed), seed, universe)
    }

    fn from_parts(rng: StdRng, seed: u64, universe: KeyUniverse) -> Self {
        WorkloadGenerator {
            rng,
            universe,
            model: ShadowModel::new(),
            last_key: None,
            report: WorkloadReport {
                seed,
                ..WorkloadReport::default()
            },
        }
    }

    /// Seed this generator was built from
    pub fn seed(&self) -> u64 {
        self.report.seed
    }

    /// The oracle's current view of the store
    pub fn model(&self) -> &ShadowModel {
        &self.model
    }

    /// Counters so far
    pub fn report(&self) -> &WorkloadReport {
        &self.report
    }

    /// Key universe in use
    pub fn universe(&self) -> &KeyUniverse {
        &self.universe
    }

    /// Generate the next operation without issuing it
    pub fn next_operation(&mut self) -> Operation {
        let key = self.universe.pick_key(&mut self.rng);
        let op = match self.rng.gen_range(0..3u8) {
            0 => Operation::Read { key },
            1 => Operation::Write {
                key,
                value: self.universe.pick_value(&mut self.rng),
            },
            _ => {
                // First iteration has no previous key; use this one.
                let target = self.last_key.take().unwrap_or(key);
                let expected = if self.rng.gen_bool(0.5) {
                    self.model.get(&target).cloned()
                } else {
                    Some(self.universe.pick_value(&mut self.rng))
                };
                Operation::ConditionalWrite {
                    key: target,
                    value: self.universe.pick_value(&mut self.rng),
                    expected,
                }
            }
        };
        self.last_key = Some(op.key().clone());
        op
    }

    /// Run one iteration: generate, predict, issue, compare.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvariantViolation` on an outcome mismatch, or the
    /// store's own error if the operation could not be issued.
    pub async fn step<S: KvStore + ?Sized>(&mut self, store: &S) -> Result<OpOutcome> {
        let op = self.next_operation();
        let iteration = self.report.iterations;
        let expected = self.model.apply(&op);

        let observed = store.execute(&op).await.map_err(|e| {
            error!(
                target: "casprobe::workload",
                seed = self.report.seed,
                iteration,
                op = %op,
                error = %e,
                "store operation failed"
            );
            e
        })?;

        if observed != expected {
            error!(
                target: "casprobe::workload",
                seed = self.report.seed,
                iteration,
                op = %op,
                expected = %expected,
                observed = %observed,
                "outcome mismatch"
            );
            return Err(Error::invariant(format!(
                "iteration {} (seed {}): {} expected {}, observed {}",
                iteration, self.report.seed, op, expected, observed
            )));
        }

        debug!(target: "casprobe::workload", iteration, op = %op, outcome = %observed);
        self.record(&observed);
        Ok(observed)
    }

    fn record(&mut self, outcome: &OpOutcome) {
        match outcome {
            OpOutcome::Read(_) => self.report.reads += 1,
            OpOutcome::Written => self.report.writes += 1,
            OpOutcome::Cas(cas) if cas.applied => self.report.cas_applied += 1,
            OpOutcome::Cas(_) => self.report.cas_rejected += 1,
        }
        self.report.iterations += 1;
    }

    /// Run `iterations` iterations, stopping at the first failure
    pub async fn run<S: KvStore + ?Sized>(
        &mut self,
        store: &S,
        iterations: usize,
    ) -> Result<WorkloadReport> {
        info!(
            target: "casprobe::workload",
            seed = self.report.seed,
            keys = self.universe.keys.len(),
            iterations,
            "starting workload"
        );
        for _ in 0..iterations {
            self.step(store).await?;
        }
        info!(target: "casprobe::workload", report = %self.report, "workload finished");
        Ok(self.report.clone())
    }

    /// Run iterations until `token` is cancelled. Cancellation is checked
    /// between iterations, so the in-flight iteration always completes.
    pub async fn run_until_cancelled<S: KvStore + ?Sized>(
        &mut self,
        store: &S,
        token: &CancellationToken,
    ) -> Result<WorkloadReport> {
        info!(
            target: "casprobe::workload",
            seed = self.report.seed,
            keys = self.universe.keys.len(),
            "starting workload until stopped"
        );
        while !token.is_cancelled() {
            self.step(store).await?;
            // Let the foreground run even if the store never suspends.
            tokio::task::yield_now().await;
        }
        info!(target: "casprobe::workload", report = %self.report, "workload stopped");
        Ok(self.report.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn universe() -> KeyUniverse {
        KeyUniverse::new(
            vec!["a".into(), "b".into(), "c".into()],
            vec!["x".into(), "y".into()],
        )
        .unwrap()
    }

    #[test]
    fn test_random_universe_shape() {
        let mut rng = StdRng::seed_from_u64(1);
        let universe = KeyUniverse::random(&mut rng, 42, 10);
        assert_eq!(universe.keys().len(), 42);
        assert!(universe
            .keys()
            .iter()
            .all(|k| k.as_str().len() == 10 && k.as_str().bytes().all(|b| b.is_ascii_lowercase())));
        let as_values: Vec<Value> = universe
            .keys()
            .iter()
            .map(|k| Value::from(k.as_str()))
            .collect();
        assert_eq!(as_values, universe.values());
    }

    #[test]
    fn test_empty_universe_rejected() {
        assert!(KeyUniverse::new(vec![], vec!["v".into()]).is_err());
        assert!(KeyUniverse::new(vec!["k".into()], vec![]).is_err());
    }

    #[test]
    fn test_same_seed_same_operations() {
        let mut a = WorkloadGenerator::with_universe(universe(), 7);
        let mut b = WorkloadGenerator::with_universe(universe(), 7);
        for _ in 0..100 {
            assert_eq!(a.next_operation(), b.next_operation());
        }
    }

    #[test]
    fn test_cas_targets_previous_key() {
        let mut gen = WorkloadGenerator::with_universe(universe(), 3);
        let mut previous: Option<Key> = None;
        let mut saw_cas = false;
        for _ in 0..500 {
            let op = gen.next_operation();
            if let (Operation::ConditionalWrite { key, .. }, Some(prev)) = (&op, &previous) {
                assert_eq!(key, prev);
                saw_cas = true;
            }
            previous = Some(op.key().clone());
        }
        assert!(saw_cas);
    }

    #[test]
    fn test_all_kinds_generated() {
        let mut gen = WorkloadGenerator::with_universe(universe(), 11);
        let mut kinds = std::collections::HashSet::new();
        for _ in 0..200 {
            kinds.insert(gen.next_operation().kind());
        }
        assert_eq!(kinds.len(), 3);
    }

    #[test]
    fn test_config_seed_is_used() {
        let config = WorkloadConfig {
            seed: Some(1234),
            ..WorkloadConfig::default()
        };
        let gen = WorkloadGenerator::new(&config);
        assert_eq!(gen.seed(), 1234);
        assert_eq!(gen.universe().keys().len(), 42);
    }

    #[test]
    fn test_report_display() {
        let report = WorkloadReport {
            seed: 5,
            iterations: 3,
            reads: 1,
            writes: 1,
            cas_applied: 1,
            cas_rejected: 0,
        };
        assert!(report.to_string().starts_with("seed 5: 3 iterations"));
    }
}
