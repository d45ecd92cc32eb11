//! Traits for the interfaces the harness consumes
//!
//! The store under test, its error-injection endpoint and the cluster
//! manager are external collaborators. This module pins down the boundary
//! the harness relies on so real transports and in-process simulations are
//! interchangeable.
//!
//! Every call is a suspension point. Implementations must be `Send + Sync`
//! so scenarios can share them between a background workload and the
//! foreground steps.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    CasOutcome, ConfigOverrides, Key, OpOutcome, Operation, ReplaceConfig, ServerId, ServerInfo,
    Value,
};

/// Point-read / write / compare-and-swap access to the store under test
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read the current value of `key` (None if unset)
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if the store cannot be queried.
    async fn read(&self, key: &Key) -> Result<Option<Value>>;

    /// Unconditionally set `key` to `value`
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if the store cannot be queried.
    async fn write(&self, key: &Key, value: &Value) -> Result<()>;

    /// Set `key` to `value` only if its current value equals `expected`
    /// (`None` = key unset). Returns whether the write applied and the value
    /// seen immediately before the attempt.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if the store cannot be queried.
    async fn conditional_write(
        &self,
        key: &Key,
        value: &Value,
        expected: Option<&Value>,
    ) -> Result<CasOutcome>;

    /// Issue any [`Operation`] and return its canonical outcome
    async fn execute(&self, op: &Operation) -> Result<OpOutcome> {
        match op {
            Operation::Read { key } => Ok(OpOutcome::Read(self.read(key).await?)),
            Operation::Write { key, value } => {
                self.write(key, value).await?;
                Ok(OpOutcome::Written)
            }
            Operation::ConditionalWrite {
                key,
                value,
                expected,
            } => Ok(OpOutcome::Cas(
                self.conditional_write(key, value, expected.as_ref()).await?,
            )),
        }
    }
}

/// A store whose conditional write reports nothing back
///
/// Outcomes must be inferred from reads around the write; see
/// `casprobe_oracle::testing::ReadBackCas`.
#[async_trait]
pub trait BlindKvStore: Send + Sync {
    /// Read the current value of `key`
    async fn read(&self, key: &Key) -> Result<Option<Value>>;

    /// Unconditionally set `key` to `value`
    async fn write(&self, key: &Key, value: &Value) -> Result<()>;

    /// Fire a conditional write without learning whether it applied
    async fn conditional_write_unchecked(
        &self,
        key: &Key,
        value: &Value,
        expected: Option<&Value>,
    ) -> Result<()>;
}

/// Server-side named breakpoints ("error injections")
#[async_trait]
pub trait ErrorInjector: Send + Sync {
    /// Arm breakpoint `name` on `node`. A one-shot injection fires once and
    /// then blocks the server until messaged. An unreachable node fails open.
    async fn enable(&self, node: IpAddr, name: &str, one_shot: bool) -> Result<()>;

    /// Disarm breakpoint `name` on `node`
    async fn disable(&self, node: IpAddr, name: &str) -> Result<()>;

    /// Names of the breakpoints currently armed on `node`
    async fn enabled(&self, node: IpAddr) -> Result<Vec<String>>;

    /// Release a server blocked on breakpoint `name`
    async fn message(&self, node: IpAddr, name: &str) -> Result<()>;
}

/// Handle to an armed one-shot breakpoint
///
/// Released exactly once per scenario step via [`InjectionHandle::message`].
pub struct InjectionHandle {
    injector: Arc<dyn ErrorInjector>,
    node: IpAddr,
    name: String,
}

impl InjectionHandle {
    /// Node the breakpoint is armed on
    pub fn node(&self) -> IpAddr {
        self.node
    }

    /// Breakpoint name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Let the server proceed past the breakpoint
    pub async fn message(&self) -> Result<()> {
        self.injector.message(self.node, &self.name).await
    }
}

impl std::fmt::Debug for InjectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InjectionHandle")
            .field("node", &self.node)
            .field("name", &self.name)
            .finish()
    }
}

/// Arm a one-shot breakpoint and return a handle that releases it
pub async fn inject_one_shot(
    injector: Arc<dyn ErrorInjector>,
    node: IpAddr,
    name: &str,
) -> Result<InjectionHandle> {
    injector.enable(node, name, true).await?;
    Ok(InjectionHandle {
        injector,
        node,
        name: name.to_string(),
    })
}

/// Cluster topology operations
///
/// Every call may block for an unspecified time and fails if the cluster
/// cannot reach a stable state.
#[async_trait]
pub trait ClusterManager: Send + Sync {
    /// Add a server, optionally replacing a stopped one
    async fn server_add(
        &self,
        replace: Option<ReplaceConfig>,
        config: ConfigOverrides,
    ) -> Result<ServerInfo>;

    /// Stop a server abruptly
    async fn server_stop(&self, id: ServerId) -> Result<()>;

    /// Stop a server through its orderly shutdown path
    async fn server_stop_gracefully(&self, id: ServerId) -> Result<()>;

    /// Start a previously stopped server
    async fn server_start(&self, id: ServerId) -> Result<()>;

    /// Remove stopped server `to_remove`, coordinated by `initiator`
    async fn remove_node(&self, initiator: ServerId, to_remove: ServerId) -> Result<()>;

    /// Decommission a running server
    async fn decommission_node(&self, id: ServerId) -> Result<()>;

    /// Servers currently running
    async fn running_servers(&self) -> Result<Vec<ServerInfo>>;
}
