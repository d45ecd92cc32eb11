//! Workload and oracle behaviour against in-memory stores
//!
//! These tests verify that:
//! 1. A correct store survives a full-length workload
//! 2. Replaying the same seed against the model alone gives the same state
//! 3. Each kind of broken store is caught as an invariant violation
//! 4. Stopping via the cancellation token returns a clean report

use std::sync::Arc;
use std::time::Duration;

use casprobe_core::{
    CancellationToken, CasOutcome, Error, KvStore, OpOutcome, Operation, WorkloadConfig,
};
use casprobe_oracle::testing::{FaultMode, FaultyStore, MemoryStore, ReadBackCas};
use casprobe_oracle::{KeyUniverse, ShadowModel, WorkloadGenerator};

fn config(seed: u64) -> WorkloadConfig {
    WorkloadConfig {
        seed: Some(seed),
        ..WorkloadConfig::default()
    }
}

#[tokio::test]
async fn test_correct_store_passes_full_workload() {
    let store = MemoryStore::new();
    let mut gen = WorkloadGenerator::new(&config(42));
    let report = gen.run(&store, 2137).await.unwrap();

    assert_eq!(report.iterations, 2137);
    assert_eq!(
        report.reads + report.writes + report.cas_applied + report.cas_rejected,
        2137
    );
    assert!(report.cas_applied > 0);
    assert!(report.cas_rejected > 0);
    assert!(gen.model().compare(&store.snapshot()).is_empty());
}

#[tokio::test]
async fn test_model_replay_matches_store_state() {
    let store = MemoryStore::new();
    let mut live = WorkloadGenerator::new(&config(9));
    live.run(&store, 500).await.unwrap();

    // Same seed, model only
    let mut replay = WorkloadGenerator::new(&config(9));
    let mut model = ShadowModel::new();
    for _ in 0..500 {
        model.apply(&replay.next_operation());
    }

    assert_eq!(model.store(), live.model().store());
    assert_eq!(model.store(), &store.snapshot());
}

#[tokio::test]
async fn test_stale_cas_is_rejected_by_correct_store() {
    let store = MemoryStore::new();
    let mut model = ShadowModel::new();
    let ops = [
        Operation::Write {
            key: "k".into(),
            value: "v1".into(),
        },
        Operation::ConditionalWrite {
            key: "k".into(),
            value: "v2".into(),
            expected: Some("v1".into()),
        },
        Operation::ConditionalWrite {
            key: "k".into(),
            value: "v3".into(),
            expected: Some("v1".into()),
        },
    ];
    for op in &ops {
        let expected = model.apply(op);
        assert_eq!(store.execute(op).await.unwrap(), expected);
    }
    assert_eq!(
        model.apply(&Operation::Read { key: "k".into() }),
        OpOutcome::Read(Some("v2".into()))
    );
}

#[tokio::test]
async fn test_flipped_cas_flag_detected() {
    let store = FaultyStore::new(MemoryStore::new(), FaultMode::FlipCasApplied, 100);
    let mut gen = WorkloadGenerator::new(&config(1));
    let err = gen.run(&store, 2137).await.unwrap_err();
    assert!(err.is_invariant_violation(), "got {err}");
    assert!(gen.report().iterations < 2137);
}

#[tokio::test]
async fn test_lost_writes_detected() {
    let store = FaultyStore::new(MemoryStore::new(), FaultMode::LoseWrites, 50);
    let mut gen = WorkloadGenerator::new(&config(2));
    let err = gen.run(&store, 2137).await.unwrap_err();
    assert!(err.is_invariant_violation(), "got {err}");
}

#[tokio::test]
async fn test_transport_error_is_not_a_violation() {
    let store = FaultyStore::new(MemoryStore::new(), FaultMode::Unreachable, 10);
    let mut gen = WorkloadGenerator::new(&config(3));
    let err = gen.run(&store, 100).await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
    assert_eq!(gen.report().iterations, 10);
}

#[tokio::test]
async fn test_violation_message_names_seed_and_iteration() {
    let store = FaultyStore::new(MemoryStore::new(), FaultMode::FlipCasApplied, 0);
    let mut gen = WorkloadGenerator::new(&config(77));
    match gen.run(&store, 2137).await {
        Err(Error::InvariantViolation(msg)) => {
            assert!(msg.contains("seed 77"), "{msg}");
            assert!(msg.contains("iteration"), "{msg}");
        }
        other => panic!("expected invariant violation, got {other:?}"),
    }
}

#[tokio::test]
async fn test_read_back_adapter_passes_full_workload() {
    let store = ReadBackCas::new(MemoryStore::new());
    let mut gen = WorkloadGenerator::new(&config(5));
    gen.run(&store, 1000).await.unwrap();
    assert!(gen.model().compare(&store.inner().snapshot()).is_empty());
}

#[tokio::test]
async fn test_run_until_cancelled() {
    let store = Arc::new(MemoryStore::new());
    let token = CancellationToken::new();

    let task = {
        let store = Arc::clone(&store);
        let token = token.clone();
        tokio::spawn(async move {
            let mut gen = WorkloadGenerator::new(&config(8));
            gen.run_until_cancelled(store.as_ref(), &token).await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();
    let report = tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(report.iterations > 0);
    assert_eq!(report.seed, 8);
}

#[tokio::test]
async fn test_single_key_universe_exercises_cas() {
    let universe = KeyUniverse::new(vec!["k".into()], vec!["a".into(), "b".into()]).unwrap();
    let store = MemoryStore::new();
    let mut gen = WorkloadGenerator::with_universe(universe, 4);
    let mut outcomes = Vec::new();
    for _ in 0..200 {
        if let OpOutcome::Cas(cas) = gen.step(&store).await.unwrap() {
            outcomes.push(cas);
        }
    }
    assert!(outcomes.iter().any(|c: &CasOutcome| c.applied));
    assert!(outcomes.iter().any(|c| !c.applied));
}
