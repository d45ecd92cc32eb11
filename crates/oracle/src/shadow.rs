//! Shadow model of the store under test
//!
//! The shadow model holds the harness's belief about the remote store: the
//! value of every key the harness itself wrote. Before an operation is sent
//! to the real store, the model predicts its outcome; any difference
//! between prediction and observation is an invariant violation.
//!
//! # Example
//!
//! ```ignore
//! use casprobe_oracle::ShadowModel;
//!
//! let mut model = ShadowModel::new();
//! model.apply(&Operation::Write { key: "k".into(), value: "v1".into() });
//! let expected = model.apply(&Operation::Read { key: "k".into() });
//! assert_eq!(expected, OpOutcome::Read(Some("v1".into())));
//! ```

use std::collections::HashMap;

use casprobe_core::{CasOutcome, Key, OpOutcome, Operation, Value};

/// Mapping from key to the value the harness believes is stored
///
/// A missing key means "never written".
pub type ShadowStore = HashMap<Key, Value>;

/// Predict the outcome of `op` against `store` without mutating it
///
/// Returns the expected outcome and the single-key update the operation
/// would make, if any. Applying the update yields the next store.
pub fn predict(op: &Operation, store: &ShadowStore) -> (OpOutcome, Option<(Key, Value)>) {
    match op {
        Operation::Read { key } => (OpOutcome::Read(store.get(key).cloned()), None),
        Operation::Write { key, value } => {
            (OpOutcome::Written, Some((key.clone(), value.clone())))
        }
        Operation::ConditionalWrite {
            key,
            value,
            expected,
        } => {
            let previous = store.get(key).cloned();
            // Option equality keeps "unset" distinct from every real value
            if previous.as_ref() == expected.as_ref() {
                (
                    OpOutcome::Cas(CasOutcome::applied(previous)),
                    Some((key.clone(), value.clone())),
                )
            } else {
                (OpOutcome::Cas(CasOutcome::rejected(previous)), None)
            }
        }
    }
}

/// Stateful oracle: a shadow store plus the log of operations that changed it
#[derive(Debug, Default)]
pub struct ShadowModel {
    store: ShadowStore,
    /// Operations that mutated the store, in order
    mutations: Vec<Operation>,
    /// Total operations predicted
    predicted: usize,
}

impl ShadowModel {
    /// Create an empty model
    pub fn new() -> Self {
        ShadowModel {
            store: HashMap::new(),
            mutations: Vec::new(),
            predicted: 0,
        }
    }

    /// Predict the outcome of `op` and advance the model as if the store
    /// behaved correctly
    pub fn apply(&mut self, op: &Operation) -> OpOutcome {
        let (outcome, update) = predict(op, &self.store);
        if let Some((key, value)) = update {
            self.store.insert(key, value);
            self.mutations.push(op.clone());
        }
        self.predicted += 1;
        outcome
    }

    /// Value the model expects for `key`
    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.store.get(key)
    }

    /// The whole shadow store
    pub fn store(&self) -> &ShadowStore {
        &self.store
    }

    /// Number of keys ever written
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// True if nothing has been written yet
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Operations that changed the model, in order
    pub fn mutations(&self) -> &[Operation] {
        &self.mutations
    }

    /// Total operations predicted so far
    pub fn total_predictions(&self) -> usize {
        self.predicted
    }

    /// Compare the expected state against an observed snapshot
    ///
    /// Returns list of mismatches found.
    pub fn compare(&self, actual: &HashMap<Key, Value>) -> Vec<StateMismatch> {
        let mut mismatches = Vec::new();

        for (key, expected_value) in &self.store {
            match actual.get(key) {
                Some(actual_value) if actual_value == expected_value => {}
                Some(actual_value) => mismatches.push(StateMismatch {
                    key: key.clone(),
                    expected: Some(expected_value.clone()),
                    actual: Some(actual_value.clone()),
                }),
                None => mismatches.push(StateMismatch {
                    key: key.clone(),
                    expected: Some(expected_value.clone()),
                    actual: None,
                }),
            }
        }

        for (key, actual_value) in actual {
            if !self.store.contains_key(key) {
                mismatches.push(StateMismatch {
                    key: key.clone(),
                    expected: None,
                    actual: Some(actual_value.clone()),
                });
            }
        }

        mismatches.sort_by(|a, b| a.key.cmp(&b.key));
        mismatches
    }

    /// Reset model to empty state
    pub fn reset(&mut self) {
        self.store.clear();
        self.mutations.clear();
        self.predicted = 0;
    }
}

/// Key whose observed value differs from the model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateMismatch {
    /// Key in question
    pub key: Key,
    /// Value the model expected (None = unset)
    pub expected: Option<Value>,
    /// Value observed (None = unset)
    pub actual: Option<Value>,
}

impl std::fmt::Display for StateMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |v: &Option<Value>| match v {
            Some(v) => v.to_string(),
            None => "unset".to_string(),
        };
        write!(
            f,
            "{}: expected {}, got {}",
            self.key,
            show(&self.expected),
            show(&self.actual)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(k: &str) -> Operation {
        Operation::Read { key: k.into() }
    }

    fn write(k: &str, v: &str) -> Operation {
        Operation::Write {
            key: k.into(),
            value: v.into(),
        }
    }

    fn cas(k: &str, v: &str, expected: Option<&str>) -> Operation {
        Operation::ConditionalWrite {
            key: k.into(),
            value: v.into(),
            expected: expected.map(Value::from),
        }
    }

    #[test]
    fn test_new_model_is_empty() {
        let model = ShadowModel::new();
        assert!(model.is_empty());
        assert_eq!(model.total_predictions(), 0);
    }

    #[test]
    fn test_read_unwritten_key_predicts_unset() {
        let mut model = ShadowModel::new();
        assert_eq!(model.apply(&read("k")), OpOutcome::Read(None));
        assert!(model.mutations().is_empty());
    }

    #[test]
    fn test_write_then_read_then_cas_sequence() {
        let mut model = ShadowModel::new();

        assert_eq!(model.apply(&write("k", "v1")), OpOutcome::Written);
        assert_eq!(
            model.apply(&read("k")),
            OpOutcome::Read(Some(Value::from("v1")))
        );
        assert_eq!(
            model.apply(&cas("k", "v2", Some("v1"))),
            OpOutcome::Cas(CasOutcome::applied(Some(Value::from("v1"))))
        );
        // Stale expectation
        assert_eq!(
            model.apply(&cas("k", "v3", Some("v1"))),
            OpOutcome::Cas(CasOutcome::rejected(Some(Value::from("v2"))))
        );
        assert_eq!(model.get(&"k".into()), Some(&Value::from("v2")));
        assert_eq!(model.mutations().len(), 2);
        assert_eq!(model.total_predictions(), 4);
    }

    #[test]
    fn test_cas_expecting_unset() {
        let mut model = ShadowModel::new();
        assert_eq!(
            model.apply(&cas("k", "v1", None)),
            OpOutcome::Cas(CasOutcome::applied(None))
        );
        assert_eq!(
            model.apply(&cas("k", "v2", None)),
            OpOutcome::Cas(CasOutcome::rejected(Some(Value::from("v1"))))
        );
    }

    #[test]
    fn test_textual_null_does_not_match_unset() {
        let mut model = ShadowModel::new();
        for text in ["null", "None", ""] {
            assert_eq!(
                model.apply(&cas("k", "v", Some(text))),
                OpOutcome::Cas(CasOutcome::rejected(None))
            );
        }
        assert!(model.is_empty());
    }

    #[test]
    fn test_predict_is_pure() {
        let store = ShadowStore::new();
        let (outcome, update) = predict(&write("k", "v"), &store);
        assert_eq!(outcome, OpOutcome::Written);
        assert_eq!(update, Some((Key::from("k"), Value::from("v"))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_compare_match() {
        let mut model = ShadowModel::new();
        model.apply(&write("a", "1"));
        model.apply(&write("b", "2"));

        let actual: HashMap<Key, Value> = [("a".into(), "1".into()), ("b".into(), "2".into())]
            .into_iter()
            .collect();
        assert!(model.compare(&actual).is_empty());
    }

    #[test]
    fn test_compare_reports_missing_different_and_extra() {
        let mut model = ShadowModel::new();
        model.apply(&write("a", "1"));
        model.apply(&write("b", "2"));

        let actual: HashMap<Key, Value> = [("b".into(), "x".into()), ("c".into(), "3".into())]
            .into_iter()
            .collect();
        let mismatches = model.compare(&actual);
        assert_eq!(mismatches.len(), 3);
        assert_eq!(mismatches[0].key.as_str(), "a");
        assert_eq!(mismatches[0].actual, None);
        assert_eq!(mismatches[1].actual, Some(Value::from("x")));
        assert_eq!(mismatches[2].expected, None);
    }

    #[test]
    fn test_reset() {
        let mut model = ShadowModel::new();
        model.apply(&write("a", "1"));
        model.reset();
        assert!(model.is_empty());
        assert!(model.mutations().is_empty());
        assert_eq!(model.total_predictions(), 0);
    }

    #[test]
    fn test_state_mismatch_display() {
        let mismatch = StateMismatch {
            key: "k1".into(),
            expected: Some("v1".into()),
            actual: None,
        };
        assert_eq!(mismatch.to_string(), "k1: expected v1, got unset");
    }
}
