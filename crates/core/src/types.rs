//! Core types for the harness
//!
//! This module defines the data model shared by every crate:
//! - Key / Value: opaque strings with byte-exact equality
//! - Operation: the closed set of operations issued to the store
//! - CasOutcome / OpOutcome: the canonical outcome representation
//! - LogMark: a byte offset into one specific log file
//! - ServerId / ServerInfo / ReplaceConfig: cluster-management values

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use uuid::Uuid;

/// Key in the replicated key-value store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(String);

impl Key {
    /// Create a key from any string
    pub fn new(key: impl Into<String>) -> Self {
        Key(key.into())
    }

    /// Borrow the key text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key(s)
    }
}

/// Value in the replicated key-value store
///
/// Absence of a value is always `Option::None`, never a sentinel string, so
/// a value whose text is `"null"` or `""` compares unequal to "unset".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(String);

impl Value {
    /// Create a value from any string
    pub fn new(value: impl Into<String>) -> Self {
        Value(value.into())
    }

    /// Borrow the value text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value(s)
    }
}

/// An operation issued to the store under test
///
/// New kinds are added by extending this enum; every match site is
/// exhaustive so the compiler points at the oracle and generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Point read of a key
    Read {
        /// Key to read
        key: Key,
    },
    /// Unconditional write; always applies
    Write {
        /// Key to write
        key: Key,
        /// New value
        value: Value,
    },
    /// Compare-and-swap write
    ConditionalWrite {
        /// Key to write
        key: Key,
        /// New value, stored only if the condition holds
        value: Value,
        /// Expected current value; `None` expects the key to be unset
        expected: Option<Value>,
    },
}

impl Operation {
    /// Key this operation targets
    pub fn key(&self) -> &Key {
        match self {
            Operation::Read { key }
            | Operation::Write { key, .. }
            | Operation::ConditionalWrite { key, .. } => key,
        }
    }

    /// Short kind label for logs and reports
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Read { .. } => "read",
            Operation::Write { .. } => "write",
            Operation::ConditionalWrite { .. } => "cas",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Read { key } => write!(f, "read({})", key),
            Operation::Write { key, value } => write!(f, "write({} = {})", key, value),
            Operation::ConditionalWrite {
                key,
                value,
                expected,
            } => match expected {
                Some(expected) => write!(f, "cas({} = {} if {})", key, value, expected),
                None => write!(f, "cas({} = {} if unset)", key, value),
            },
        }
    }
}

/// Result of a conditional write
///
/// `applied` is true iff the value before the attempt (or its absence)
/// equalled the expectation. `previous` is that prior value regardless of
/// whether the write applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CasOutcome {
    /// Whether the write took effect
    pub applied: bool,
    /// Value immediately before the attempt
    pub previous: Option<Value>,
}

impl CasOutcome {
    /// Outcome of a CAS whose condition held
    pub fn applied(previous: Option<Value>) -> Self {
        CasOutcome {
            applied: true,
            previous,
        }
    }

    /// Outcome of a CAS whose condition did not hold
    pub fn rejected(previous: Option<Value>) -> Self {
        CasOutcome {
            applied: false,
            previous,
        }
    }
}

/// Observable outcome of any [`Operation`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpOutcome {
    /// Value returned by a read (None = key unset)
    Read(Option<Value>),
    /// An unconditional write was accepted
    Written,
    /// Outcome of a conditional write
    Cas(CasOutcome),
}

impl fmt::Display for OpOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpOutcome::Read(Some(v)) => write!(f, "value {}", v),
            OpOutcome::Read(None) => write!(f, "unset"),
            OpOutcome::Written => write!(f, "written"),
            OpOutcome::Cas(cas) => {
                let verdict = if cas.applied { "applied" } else { "rejected" };
                match &cas.previous {
                    Some(prev) => write!(f, "{} (previous {})", verdict, prev),
                    None => write!(f, "{} (previous unset)", verdict),
                }
            }
        }
    }
}

/// Byte offset into a log file
///
/// Only meaningful for the file it was taken from. Marks taken later on a
/// growing file never compare less than earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LogMark(u64);

impl LogMark {
    /// Mark at the start of the file
    pub const START: LogMark = LogMark(0);

    /// Wrap a raw offset
    pub fn new(offset: u64) -> Self {
        LogMark(offset)
    }

    /// Raw byte offset
    pub fn offset(&self) -> u64 {
        self.0
    }
}

/// Identifier the cluster manager assigns to a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerId(pub u64);

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "server-{}", self.0)
    }
}

/// A server known to the cluster manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// Manager-assigned id
    pub server_id: ServerId,
    /// Address the server listens on
    pub ip_addr: IpAddr,
    /// Host id the server reports to the cluster
    pub host_id: Uuid,
}

impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.server_id, self.ip_addr)
    }
}

/// How a new server replaces a stopped one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceConfig {
    /// Server being replaced; must be stopped
    pub replaced_id: ServerId,
    /// Reuse the replaced server's address
    pub reuse_ip_addr: bool,
    /// Identify the replaced node by host id instead of address
    pub use_host_id: bool,
}

/// Per-server configuration overrides passed on addition
pub type ConfigOverrides = BTreeMap<String, String>;
