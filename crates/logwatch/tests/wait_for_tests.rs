//! Log tailing tests
//!
//! These tests verify that `wait_for`:
//! 1. Never matches a line that starts before the mark
//! 2. Returns promptly when a matching line is appended during the wait
//! 3. Times out when no matching line appears
//! 4. Reports cancellation distinctly from timeout and frees its reader

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use casprobe_core::{CancellationToken, Error, LogMark};
use casprobe_logwatch::{LogFile, LogPattern, ReadPool};
use tempfile::TempDir;

fn append(path: &Path, text: &str) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.flush().unwrap();
}

fn setup(initial: &str) -> (TempDir, LogFile, Arc<ReadPool>) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("node.log");
    std::fs::write(&path, initial).unwrap();
    let pool = Arc::new(ReadPool::new(2, 64).unwrap());
    let log = LogFile::open(&path, Arc::clone(&pool))
        .unwrap()
        .with_poll_interval(Duration::from_millis(5));
    (dir, log, pool)
}

#[tokio::test]
async fn test_never_matches_before_mark() {
    let (_dir, log, _pool) = setup("Scylla version\nmarker old\n");
    let mark = log.mark().unwrap();
    let pattern = LogPattern::new("marker").unwrap();

    let path = log.path().to_path_buf();
    let writer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        append(&path, "unrelated\nmarker new\n");
    });

    let found = log
        .wait_for(&pattern, Some(mark), Duration::from_secs(10))
        .await
        .unwrap();
    writer.await.unwrap();

    assert!(found.offset >= mark);
    assert_eq!(found.line, "marker new");
}

#[tokio::test]
async fn test_returns_soon_after_line_appended() {
    let (_dir, log, _pool) = setup("Scylla version\n");
    let mark = log.mark().unwrap();
    let pattern = LogPattern::new(r"joined as (\S+)").unwrap();

    let path = log.path().to_path_buf();
    let writer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        append(&path, "node joined as normal\n");
    });

    let started = Instant::now();
    let found = log
        .wait_for(&pattern, Some(mark), Duration::from_secs(10))
        .await
        .unwrap();
    writer.await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(found.groups, vec![Some("normal".to_string())]);
}

#[tokio::test]
async fn test_partial_line_waits_for_newline() {
    let (_dir, log, _pool) = setup("");
    let pattern = LogPattern::new("^complete line$").unwrap();

    let path = log.path().to_path_buf();
    let writer = tokio::spawn(async move {
        append(&path, "complete");
        tokio::time::sleep(Duration::from_millis(50)).await;
        append(&path, " line\n");
    });

    let found = log
        .wait_for(&pattern, None, Duration::from_secs(10))
        .await
        .unwrap();
    writer.await.unwrap();
    assert_eq!(found.offset, LogMark::START);
}

#[tokio::test]
async fn test_timeout() {
    let (_dir, log, _pool) = setup("Scylla version\nnothing here\n");
    let started = Instant::now();
    let err = log
        .wait_for(
            &LogPattern::new("never").unwrap(),
            None,
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();

    assert!(err.is_timeout(), "got {err}");
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_cancellation_is_not_timeout() {
    let (_dir, log, pool) = setup("Scylla version\n");
    let token = CancellationToken::new();

    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        })
    };

    let err = log
        .wait_for_cancellable(
            &LogPattern::new("never").unwrap(),
            None,
            Duration::from_secs(60),
            &token,
        )
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, Error::Cancelled(_)), "got {err}");
    assert!(!err.is_timeout());

    // The in-flight read finishes on its own and nothing stays queued
    for _ in 0..200 {
        let stats = pool.stats();
        if stats.active_jobs == 0 && stats.queue_depth == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("log reader was not released");
}

#[tokio::test]
async fn test_already_cancelled_token() {
    let (_dir, log, _pool) = setup("match me\n");
    let token = CancellationToken::new();
    token.cancel();
    let err = log
        .wait_for_cancellable(
            &LogPattern::new("match").unwrap(),
            None,
            Duration::from_secs(1),
            &token,
        )
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn test_grep_is_a_snapshot() {
    let (_dir, log, _pool) = setup("hit 1\nmiss\nhit 2\n");
    let pattern = LogPattern::new("hit").unwrap();
    let before = log.grep(&pattern, None).unwrap();
    append(log.path(), "hit 3\n");
    assert_eq!(before.len(), 2);
    assert_eq!(log.grep(&pattern, None).unwrap().len(), 3);
}
