//! Test doubles for scenarios

mod sim_cluster;

pub use sim_cluster::{is_sim_log, NodeState, SimCluster, SIM_LOG_HEADER};
