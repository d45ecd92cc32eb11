//! Server log watching for casprobe
//!
//! - [`ReadPool`]: worker threads that perform blocking file reads
//! - [`LogPattern`]: include/exclude regex pair for single lines
//! - [`LogFile`]: mark, tail (`wait_for`) and search (`grep`) a growing log
//! - [`ProcFs`]: find the local process listening on an endpoint and its log

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod locator;
pub mod log_file;
pub mod pattern;
pub mod pool;

pub use locator::{encode_address, encode_port, ProcFs};
pub use log_file::{LogFile, LogMatch};
pub use pattern::LogPattern;
pub use pool::{PoolStats, ReadPool, DEFAULT_QUEUE_DEPTH};
