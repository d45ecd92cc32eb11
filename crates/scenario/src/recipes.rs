//! Ready-made fault scenarios
//!
//! - [`replace_node`]: stop a node and replace it
//! - [`topology_cycle`]: replace, remove and decommission nodes in turn
//! - [`StagedShutdown`]: stop a node while a topology change it
//!   coordinates is parked on a breakpoint, and check that the change is
//!   cut short rather than half-applied
//!
//! The first two also come in `_under_workload` form, running inside a
//! [`FaultScenario`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use casprobe_core::{
    inject_one_shot, CancellationToken, ClusterManager, ConfigOverrides, Error,
    ErrorInjector, InjectionHandle, KvStore, ReplaceConfig, Result, ServerInfo,
};
use casprobe_logwatch::{LogFile, LogPattern};

use crate::background::{spawn_dependent, StepOutcome};
use crate::orchestrator::{FaultScenario, ScenarioReport};

/// Breakpoint before a node hands a new topology to its CDC generation
/// service
pub const APPLY_BREAKPOINT: &str = "handle_cdc_generation::wait";

/// Logged right before [`APPLY_BREAKPOINT`] is passed
pub const APPLY_REACHED_MARKER: &str = "topology_state_load: before handle_cdc_generation";

/// Breakpoint in the shutdown path of the CDC generation service
pub const SHUTDOWN_BREAKPOINT: &str = "stop_cdc_generation_service::wait";

/// Logged when [`SHUTDOWN_BREAKPOINT`] is reached
pub const SHUTDOWN_REACHED_MARKER: &str = "stop_cdc_generation_service wait";

/// Stop `replace.replaced_id` abruptly and add its replacement.
///
/// # Errors
///
/// Whatever the cluster manager reports.
pub async fn replace_node(
    cluster: &dyn ClusterManager,
    replace: ReplaceConfig,
) -> Result<ServerInfo> {
    info!(target: "casprobe::scenario", server = %replace.replaced_id, "replacing server");
    cluster.server_stop(replace.replaced_id).await?;
    let replacement = cluster
        .server_add(Some(replace.clone()), ConfigOverrides::new())
        .await?;
    info!(
        target: "casprobe::scenario",
        replaced = %replace.replaced_id,
        replacement = %replacement,
        "server replaced"
    );
    Ok(replacement)
}

/// [`replace_node`] while the scenario's workload runs
pub async fn replace_node_under_workload<S: KvStore + ?Sized + 'static>(
    scenario: &FaultScenario<S>,
    cluster: &dyn ClusterManager,
    replace: ReplaceConfig,
) -> Result<ScenarioReport<ServerInfo>> {
    scenario.run(replace_node(cluster, replace)).await
}

/// Walk a cluster through every membership change: gracefully stop and
/// replace a node under a new address, stop another and remove it through
/// a peer, then decommission a third. Nodes are added first until three
/// are running.
///
/// Returns the servers still running afterwards.
///
/// # Errors
///
/// Whatever the cluster manager reports.
pub async fn topology_cycle(cluster: &dyn ClusterManager) -> Result<Vec<ServerInfo>> {
    let mut servers = cluster.running_servers().await?;
    while servers.len() < 3 {
        servers.push(cluster.server_add(None, ConfigOverrides::new()).await?);
    }

    let first = servers.remove(0);
    info!(target: "casprobe::scenario", server = %first, "stopping and replacing");
    cluster.server_stop_gracefully(first.server_id).await?;
    let replacement = cluster
        .server_add(
            Some(ReplaceConfig {
                replaced_id: first.server_id,
                reuse_ip_addr: false,
                use_host_id: false,
            }),
            ConfigOverrides::new(),
        )
        .await?;
    servers.push(replacement);

    let removed = servers.remove(0);
    info!(target: "casprobe::scenario", server = %removed, initiator = %servers[0], "stopping and removing");
    cluster.server_stop_gracefully(removed.server_id).await?;
    cluster
        .remove_node(servers[0].server_id, removed.server_id)
        .await?;

    let decommissioned = servers.remove(0);
    info!(target: "casprobe::scenario", server = %decommissioned, "decommissioning");
    cluster.decommission_node(decommissioned.server_id).await?;

    cluster.running_servers().await
}

/// [`topology_cycle`] while the scenario's workload runs
pub async fn topology_cycle_under_workload<S: KvStore + ?Sized + 'static>(
    scenario: &FaultScenario<S>,
    cluster: &dyn ClusterManager,
) -> Result<ScenarioReport<Vec<ServerInfo>>> {
    scenario.run(topology_cycle(cluster)).await
}

/// Graceful shutdown racing a parked topology change.
///
/// 1. park [`APPLY_BREAKPOINT`] on the node and start adding a second node,
///    which makes the first node load the new topology;
/// 2. arm [`SHUTDOWN_BREAKPOINT`], wait until the apply is parked;
/// 3. stop the node gracefully while, once the shutdown reaches its
///    breakpoint, releasing the parked apply;
/// 4. cancel the node addition, which lost its coordinator.
///
/// A correct server finishes the apply before stopping the service it
/// needs, and the addition never completes.
///
/// Whatever happens, the scenario leaves no breakpoint armed or parked on
/// the node.
pub struct StagedShutdown {
    cluster: Arc<dyn ClusterManager>,
    injector: Arc<dyn ErrorInjector>,
    wait_timeout: Duration,
}

impl StagedShutdown {
    /// Build the scenario; each log wait gives up after `wait_timeout`
    pub fn new(
        cluster: Arc<dyn ClusterManager>,
        injector: Arc<dyn ErrorInjector>,
        wait_timeout: Duration,
    ) -> Self {
        StagedShutdown {
            cluster,
            injector,
            wait_timeout,
        }
    }

    /// Run against `node`, whose log is `log`. Returns how the node
    /// addition ended; callers normally require
    /// [`StepOutcome::Cancelled`].
    ///
    /// # Errors
    ///
    /// Log wait timeouts, injection failures and cluster failures. Before
    /// any error is returned both breakpoints are disarmed, the parked apply
    /// is released, and the node addition is cancelled and joined.
    pub async fn run(
        &self,
        node: &ServerInfo,
        log: &LogFile,
    ) -> Result<StepOutcome<Result<ServerInfo>>> {
        let mark = log.mark()?;
        let apply_handler =
            inject_one_shot(Arc::clone(&self.injector), node.ip_addr, APPLY_BREAKPOINT).await?;
        let apply_released = AtomicBool::new(false);

        let stop_addition = CancellationToken::new();
        let cluster = Arc::clone(&self.cluster);
        let addition = spawn_dependent("second node addition", &stop_addition, async move {
            cluster.server_add(None, ConfigOverrides::new()).await
        });

        let staged = async {
            inject_one_shot(Arc::clone(&self.injector), node.ip_addr, SHUTDOWN_BREAKPOINT)
                .await?;
            log.wait_for(
                &LogPattern::literal(APPLY_REACHED_MARKER)?,
                Some(mark),
                self.wait_timeout,
            )
            .await?;
            info!(target: "casprobe::scenario", server = %node, "topology apply parked; stopping server");

            let stop = self.cluster.server_stop_gracefully(node.server_id);
            let release = async {
                log.wait_for(
                    &LogPattern::literal(SHUTDOWN_REACHED_MARKER)?,
                    Some(mark),
                    self.wait_timeout,
                )
                .await?;
                apply_handler.message().await?;
                apply_released.store(true, Ordering::Relaxed);
                Ok::<(), Error>(())
            };
            tokio::try_join!(stop, release).map(|_| ())
        }
        .await;

        let cleanup = self
            .release_breakpoints(node, &apply_handler, apply_released.load(Ordering::Relaxed))
            .await;
        stop_addition.cancel();
        let outcome = addition.join().await?;

        if let Err(e) = staged {
            if let Err(c) = cleanup {
                warn!(target: "casprobe::scenario", server = %node, error = %c, "breakpoint cleanup failed");
            }
            warn!(target: "casprobe::scenario", server = %node, error = %e, "staged shutdown failed");
            return Err(e);
        }
        cleanup?;
        info!(
            target: "casprobe::scenario",
            server = %node,
            addition_cancelled = outcome.is_cancelled(),
            "staged shutdown finished"
        );
        Ok(outcome)
    }

    /// Release the apply breakpoint unless already released, then disarm
    /// both breakpoints. Every step runs; the first error is returned.
    async fn release_breakpoints(
        &self,
        node: &ServerInfo,
        apply_handler: &InjectionHandle,
        apply_released: bool,
    ) -> Result<()> {
        let released = if apply_released {
            Ok(())
        } else {
            apply_handler.message().await
        };
        let apply_disabled = self.injector.disable(node.ip_addr, APPLY_BREAKPOINT).await;
        let shutdown_disabled = self
            .injector
            .disable(node.ip_addr, SHUTDOWN_BREAKPOINT)
            .await;
        released.and(apply_disabled).and(shutdown_disabled)
    }
}
