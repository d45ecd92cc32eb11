//! Fault-injection scenarios for casprobe
//!
//! Runs the randomized workload against the store while foreground steps
//! stop, replace and remove servers or park them on breakpoints.
//!
//! - [`FaultScenario`]: workload in the background, disruption in the
//!   foreground, every failure surfaced after cleanup
//! - [`BackgroundTask`] / [`spawn_dependent`]: cancellable tasks and steps
//!   that may be cut short
//! - [`recipes`]: node replacement, topology cycling, staged shutdown
//! - [`RestInjector`]: error injection over the servers' REST API
//! - [`testing::SimCluster`]: in-process cluster for exercising scenarios

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod background;
pub mod orchestrator;
pub mod recipes;
pub mod rest;
pub mod testing;

pub use background::{spawn_dependent, BackgroundTask, DependentStep, StepOutcome};
pub use orchestrator::{skip_on_unavailable, with_injection, FaultScenario, ScenarioReport};
pub use recipes::{
    replace_node, replace_node_under_workload, topology_cycle, topology_cycle_under_workload,
    StagedShutdown,
};
pub use rest::RestInjector;
