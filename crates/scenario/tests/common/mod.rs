//! Shared helpers for scenario tests

use std::sync::{Arc, Once};
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use casprobe_core::WorkloadConfig;
use casprobe_logwatch::ReadPool;
use casprobe_scenario::testing::SimCluster;

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

pub fn workload(seed: u64) -> WorkloadConfig {
    WorkloadConfig {
        seed: Some(seed),
        ..WorkloadConfig::default()
    }
}

/// Cluster with `breakpoint_timeout`, logging into a fresh temp dir
pub fn sim_cluster(breakpoint_timeout: Duration) -> (tempfile::TempDir, Arc<SimCluster>) {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let cluster = SimCluster::new(dir.path().join("logs"))
        .unwrap()
        .with_breakpoint_timeout(breakpoint_timeout);
    (dir, Arc::new(cluster))
}

pub fn read_pool() -> Arc<ReadPool> {
    Arc::new(ReadPool::new(2, 64).unwrap())
}
