//! Core types and traits for casprobe
//!
//! This crate defines the foundational pieces every other crate builds on:
//! - Key / Value / Operation / CasOutcome: the store data model
//! - LogMark: positions in a server log
//! - Error: the failure taxonomy (invariant violation, timeout, cancellation, ...)
//! - CancellationToken: the stop signal handed to background tasks
//! - Traits: the consumed interfaces (KvStore, ErrorInjector, ClusterManager)
//! - HarnessConfig: `casprobe.toml`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use cancel::CancellationToken;
pub use config::{EndpointConfig, HarnessConfig, LogConfig, WorkloadConfig, CONFIG_FILE_NAME};
pub use error::{Error, Result};
pub use traits::{
    inject_one_shot, BlindKvStore, ClusterManager, ErrorInjector, InjectionHandle, KvStore,
};
pub use types::{
    CasOutcome, ConfigOverrides, Key, LogMark, OpOutcome, Operation, ReplaceConfig, ServerId,
    ServerInfo, Value,
};
