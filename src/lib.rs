//! casprobe - correctness harness for replicated control-plane key-value stores
//!
//! casprobe drives randomized read / write / compare-and-swap workloads
//! against a live store, checks every result against a shadow model, and
//! disrupts the cluster underneath (replacing, stopping and removing nodes,
//! parking servers on breakpoints) while watching the server logs.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use casprobe::{Harness, replace_node_under_workload};
//!
//! let harness = Harness::open("/var/tmp/casprobe")?;
//! let scenario = harness.scenario("replace", Arc::new(my_store));
//! let report = replace_node_under_workload(&scenario, &cluster, replace).await?;
//! assert!(report.workload.iterations > 0);
//! ```
//!
//! # Crates
//!
//! - `casprobe-core`: data model, errors, consumed-interface traits, config
//! - `casprobe-oracle`: shadow model and workload generator
//! - `casprobe-logwatch`: log tailing and process location
//! - `casprobe-scenario`: fault-injection orchestration

pub mod harness;

pub use harness::Harness;

pub use casprobe_core::*;
pub use casprobe_logwatch::{LogFile, LogMatch, LogPattern, ProcFs, ReadPool};
pub use casprobe_oracle::{predict, KeyUniverse, ShadowModel, WorkloadGenerator, WorkloadReport};
pub use casprobe_scenario::{
    recipes, replace_node, replace_node_under_workload, skip_on_unavailable, spawn_dependent,
    topology_cycle, topology_cycle_under_workload, with_injection, BackgroundTask, FaultScenario,
    RestInjector, ScenarioReport, StagedShutdown, StepOutcome,
};

/// In-memory stores and clusters for exercising scenarios
pub mod testing {
    pub use casprobe_oracle::testing::*;
    pub use casprobe_scenario::testing::*;
}
