//! Shadow-model oracle and randomized CAS workload for casprobe
//!
//! The oracle predicts the outcome of every operation the harness sends to
//! the store under test; the workload generator drives a long random
//! sequence of reads, writes and conditional writes and stops at the first
//! disagreement.
//!
//! # Architecture
//!
//! ```text
//! WorkloadGenerator ──► Operation ──► ShadowModel::apply ──► expected
//!                              └────► KvStore::execute ───► observed
//!                                          expected == observed ?
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod shadow;
pub mod testing;
pub mod workload;

pub use shadow::{predict, ShadowModel, ShadowStore, StateMismatch};
pub use workload::{KeyUniverse, WorkloadGenerator, WorkloadReport};
