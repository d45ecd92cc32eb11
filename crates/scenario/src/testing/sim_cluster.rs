//! In-process simulated cluster
//!
//! `SimCluster` implements both [`ClusterManager`] and [`ErrorInjector`]
//! without real servers, so scenarios can be exercised end to end:
//!
//! - every node writes a log file that starts with the server sentinel and
//!   carries the markers scenarios wait for;
//! - adding a node applies the new topology on every running node; each
//!   apply logs `topology_state_load: before handle_cdc_generation` and
//!   then passes breakpoint `handle_cdc_generation::wait`;
//! - a graceful stop first waits for in-flight topology applies on the
//!   node, then passes breakpoint `stop_cdc_generation_service::wait`
//!   (logging `stop_cdc_generation_service wait` when armed);
//! - a node addition whose coordinator stopped during the apply never
//!   completes;
//! - all nodes serve one shared [`MemoryStore`].
//!
//! Armed breakpoints log `<name>: waiting for message` when hit and block
//! until messaged, until the node stops abruptly, or until the breakpoint
//! timeout elapses.

use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use casprobe_core::{
    CancellationToken, ClusterManager, ConfigOverrides, Error, ErrorInjector, ReplaceConfig,
    Result, ServerId, ServerInfo,
};
use casprobe_logwatch::{LogFile, ReadPool};
use casprobe_oracle::testing::MemoryStore;

use crate::recipes::{
    APPLY_BREAKPOINT, APPLY_REACHED_MARKER, SHUTDOWN_BREAKPOINT, SHUTDOWN_REACHED_MARKER,
};

/// First line of every simulated log
pub const SIM_LOG_HEADER: &str = "Scylla version 0.0.0-sim starting";

const DEFAULT_BREAKPOINT_TIMEOUT: Duration = Duration::from_secs(60);

/// Lifecycle of a simulated node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Being added to the cluster
    Joining,
    /// Serving
    Running,
    /// Graceful shutdown in progress
    Stopping,
    /// Stopped; may be started again or replaced
    Stopped,
    /// Replaced, removed or decommissioned
    Gone,
}

/// Append-only node log
#[derive(Debug)]
struct SimLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl SimLog {
    fn create(path: PathBuf) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        if file.metadata()?.len() == 0 {
            writeln!(file, "{}", SIM_LOG_HEADER)?;
        }
        Ok(SimLog {
            path,
            file: Mutex::new(file),
        })
    }

    fn line(&self, level: &str, component: &str, msg: &str) -> Result<()> {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S,%3f");
        let mut file = self.file.lock();
        writeln!(file, "{:<5} {} [shard 0] {} - {}", level, now, component, msg)?;
        file.flush()?;
        Ok(())
    }

    fn info(&self, component: &str, msg: &str) -> Result<()> {
        self.line("INFO", component, msg)
    }
}

#[derive(Debug)]
struct Injection {
    one_shot: bool,
    release: Arc<Notify>,
}

#[derive(Debug)]
struct SimNode {
    info: ServerInfo,
    state: NodeState,
    log: Arc<SimLog>,
    /// Cancelled when the node stops; unblocks its breakpoints
    stopped: CancellationToken,
    /// Topology applies in flight on this node
    applying: Arc<watch::Sender<usize>>,
    injections: HashMap<String, Injection>,
    /// One-shot breakpoints that fired and wait for a message
    waiting: HashMap<String, Arc<Notify>>,
}

#[derive(Debug)]
struct SimState {
    nodes: BTreeMap<ServerId, SimNode>,
    next_id: u64,
}

/// Decrements a node's in-flight apply count, even when the apply is dropped
struct ApplyGuard {
    applying: Arc<watch::Sender<usize>>,
}

impl ApplyGuard {
    fn enter(applying: Arc<watch::Sender<usize>>) -> Self {
        applying.send_modify(|n| *n += 1);
        ApplyGuard { applying }
    }
}

impl Drop for ApplyGuard {
    fn drop(&mut self) {
        self.applying.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Simulated cluster of in-process nodes
#[derive(Debug)]
pub struct SimCluster {
    dir: PathBuf,
    state: Mutex<SimState>,
    store: Arc<MemoryStore>,
    breakpoint_timeout: Duration,
}

impl SimCluster {
    /// Create an empty cluster writing node logs into `dir`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if `dir` cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(SimCluster {
            dir,
            state: Mutex::new(SimState {
                nodes: BTreeMap::new(),
                next_id: 1,
            }),
            store: Arc::new(MemoryStore::new()),
            breakpoint_timeout: DEFAULT_BREAKPOINT_TIMEOUT,
        })
    }

    /// How long an armed breakpoint blocks without a message
    pub fn with_breakpoint_timeout(mut self, timeout: Duration) -> Self {
        self.breakpoint_timeout = timeout;
        self
    }

    /// The store every node serves
    pub fn store(&self) -> Arc<MemoryStore> {
        Arc::clone(&self.store)
    }

    /// Add `count` fresh nodes one after another
    pub async fn bootstrap(&self, count: usize) -> Result<Vec<ServerInfo>> {
        let mut servers = Vec::with_capacity(count);
        for _ in 0..count {
            servers.push(self.server_add(None, ConfigOverrides::new()).await?);
        }
        Ok(servers)
    }

    /// Server info of `id`, whatever its state
    pub fn server(&self, id: ServerId) -> Option<ServerInfo> {
        self.state.lock().nodes.get(&id).map(|n| n.info.clone())
    }

    /// Lifecycle state of `id`
    pub fn node_state(&self, id: ServerId) -> Option<NodeState> {
        self.state.lock().nodes.get(&id).map(|n| n.state)
    }

    /// Path of the log of `id`
    pub fn log_path(&self, id: ServerId) -> Result<PathBuf> {
        self.with_node(id, |node| Ok(node.log.path.clone()))
    }

    /// Open the log of `id` for watching
    pub fn open_log(&self, id: ServerId, pool: Arc<ReadPool>) -> Result<LogFile> {
        LogFile::open(self.log_path(id)?, pool)
    }

    fn log_file_for(&self, id: ServerId) -> PathBuf {
        self.dir.join(format!("node-{}.log", id.0))
    }

    fn with_node<T>(&self, id: ServerId, f: impl FnOnce(&mut SimNode) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock();
        let node = state
            .nodes
            .get_mut(&id)
            .ok_or_else(|| Error::transport(format!("unknown server {}", id)))?;
        f(node)
    }

    fn node_log(&self, id: ServerId) -> Result<Arc<SimLog>> {
        self.with_node(id, |node| Ok(Arc::clone(&node.log)))
    }

    fn node_by_ip(&self, ip: IpAddr) -> Option<ServerId> {
        self.state
            .lock()
            .nodes
            .values()
            .find(|n| {
                n.info.ip_addr == ip
                    && matches!(
                        n.state,
                        NodeState::Joining | NodeState::Running | NodeState::Stopping
                    )
            })
            .map(|n| n.info.server_id)
    }

    /// Pass breakpoint `name` on `id`. Returns immediately unless armed.
    async fn hit(&self, id: ServerId, name: &str, marker: Option<&str>) -> Result<()> {
        let armed = self.with_node(id, |node| {
            let Some(injection) = node.injections.get(name) else {
                return Ok(None);
            };
            let release = Arc::clone(&injection.release);
            if injection.one_shot {
                node.injections.remove(name);
                node.waiting.insert(name.to_string(), Arc::clone(&release));
            }
            Ok(Some((release, node.stopped.clone(), Arc::clone(&node.log))))
        })?;
        let Some((release, stopped, log)) = armed else {
            return Ok(());
        };

        if let Some(marker) = marker {
            log.info("sim", marker)?;
        }
        log.info("error_injection", &format!("{}: waiting for message", name))?;
        debug!(target: "casprobe::sim", server = %id, breakpoint = name, "breakpoint hit");

        let how = tokio::select! {
            _ = release.notified() => "message received",
            _ = stopped.cancelled() => "node stopped",
            _ = tokio::time::sleep(self.breakpoint_timeout) => "timed out",
        };
        self.with_node(id, |node| {
            node.waiting.remove(name);
            Ok(())
        })?;
        log.info("error_injection", &format!("{}: {}", name, how))?;
        Ok(())
    }

    /// Load the new topology on `id`
    async fn apply_topology(&self, id: ServerId, version: u64) -> Result<()> {
        let (log, applying) =
            self.with_node(id, |node| Ok((Arc::clone(&node.log), Arc::clone(&node.applying))))?;
        let _guard = ApplyGuard::enter(applying);

        log.info("raft_topology", APPLY_REACHED_MARKER)?;
        self.hit(id, APPLY_BREAKPOINT, None).await?;
        log.info(
            "raft_topology",
            &format!("topology_state_load: applied topology version {}", version),
        )?;
        Ok(())
    }

    fn running_ids(&self) -> Vec<ServerId> {
        self.state
            .lock()
            .nodes
            .values()
            .filter(|n| n.state == NodeState::Running)
            .map(|n| n.info.server_id)
            .collect()
    }

    fn require_state(&self, id: ServerId, expected: NodeState, action: &str) -> Result<()> {
        self.with_node(id, |node| {
            if node.state == expected {
                Ok(())
            } else {
                Err(Error::transport(format!(
                    "cannot {} {}: node is {:?}",
                    action, id, node.state
                )))
            }
        })
    }

    fn set_state(&self, id: ServerId, state: NodeState) -> Result<()> {
        self.with_node(id, |node| {
            node.state = state;
            if matches!(state, NodeState::Stopped | NodeState::Gone) {
                node.stopped.cancel();
            }
            Ok(())
        })
    }
}

#[async_trait]
impl ClusterManager for SimCluster {
    async fn server_add(
        &self,
        replace: Option<ReplaceConfig>,
        config: ConfigOverrides,
    ) -> Result<ServerInfo> {
        let (info, log, version) = {
            let mut state = self.state.lock();
            let id = ServerId(state.next_id);
            state.next_id += 1;

            let (ip_addr, host_id) = match &replace {
                Some(cfg) => {
                    let replaced = state.nodes.get_mut(&cfg.replaced_id).ok_or_else(|| {
                        Error::transport(format!("unknown server {}", cfg.replaced_id))
                    })?;
                    if replaced.state != NodeState::Stopped {
                        return Err(Error::transport(format!(
                            "cannot replace {}: node is {:?}",
                            cfg.replaced_id, replaced.state
                        )));
                    }
                    replaced.state = NodeState::Gone;
                    let ip = if cfg.reuse_ip_addr {
                        replaced.info.ip_addr
                    } else {
                        sim_ip(id)
                    };
                    let host_id = if cfg.use_host_id {
                        replaced.info.host_id
                    } else {
                        Uuid::new_v4()
                    };
                    (ip, host_id)
                }
                None => (sim_ip(id), Uuid::new_v4()),
            };

            let info = ServerInfo {
                server_id: id,
                ip_addr,
                host_id,
            };
            let log = Arc::new(SimLog::create(self.log_file_for(id))?);
            let (applying, _) = watch::channel(0usize);
            state.nodes.insert(
                id,
                SimNode {
                    info: info.clone(),
                    state: NodeState::Joining,
                    log: Arc::clone(&log),
                    stopped: CancellationToken::new(),
                    applying: Arc::new(applying),
                    injections: HashMap::new(),
                    waiting: HashMap::new(),
                },
            );
            (info, log, state.next_id)
        };

        let id = info.server_id;
        log.info("init", &format!("starting {} host_id={}", info, info.host_id))?;
        for (key, value) in &config {
            log.info("init", &format!("config override {} = {}", key, value))?;
        }
        if let Some(cfg) = &replace {
            log.info("init", &format!("replacing {}", cfg.replaced_id))?;
        }

        let running = self.running_ids();
        let coordinator = running.first().copied();
        if let Some(coordinator) = coordinator {
            debug!(target: "casprobe::sim", server = %id, coordinator = %coordinator, "joining");
            for node in &running {
                self.apply_topology(*node, version).await?;
            }
            if self.node_state(coordinator) != Some(NodeState::Running) {
                warn!(
                    target: "casprobe::sim",
                    server = %id,
                    coordinator = %coordinator,
                    "coordinator left during join; join cannot finish"
                );
                std::future::pending::<()>().await;
            }
        }
        self.apply_topology(id, version).await?;

        self.set_state(id, NodeState::Running)?;
        log.info("init", "serving")?;
        info!(target: "casprobe::sim", server = %info, "server added");
        Ok(info)
    }

    async fn server_stop(&self, id: ServerId) -> Result<()> {
        if self.node_state(id) == Some(NodeState::Gone) {
            return Err(Error::transport(format!("cannot stop {}: node is gone", id)));
        }
        self.set_state(id, NodeState::Stopped)?;
        self.node_log(id)?.line("WARN", "sim", "killed")?;
        info!(target: "casprobe::sim", server = %id, "server stopped");
        Ok(())
    }

    async fn server_stop_gracefully(&self, id: ServerId) -> Result<()> {
        self.require_state(id, NodeState::Running, "stop")?;
        let (log, applying) = self.with_node(id, |node| {
            node.state = NodeState::Stopping;
            Ok((Arc::clone(&node.log), node.applying.subscribe()))
        })?;
        log.info("init", "shutdown: starting")?;

        let mut applying = applying;
        // Sender lives in the node entry; an error only means it was dropped
        let _ = applying.wait_for(|n| *n == 0).await;
        log.info("init", "shutdown: topology applies drained")?;

        self.hit(id, SHUTDOWN_BREAKPOINT, Some(SHUTDOWN_REACHED_MARKER))
            .await?;
        self.set_state(id, NodeState::Stopped)?;
        log.info("init", "shutdown: done")?;
        info!(target: "casprobe::sim", server = %id, "server stopped gracefully");
        Ok(())
    }

    async fn server_start(&self, id: ServerId) -> Result<()> {
        self.require_state(id, NodeState::Stopped, "start")?;
        self.with_node(id, |node| {
            node.state = NodeState::Running;
            node.stopped = CancellationToken::new();
            Ok(())
        })?;
        self.node_log(id)?.info("init", "serving")?;
        info!(target: "casprobe::sim", server = %id, "server started");
        Ok(())
    }

    async fn remove_node(&self, initiator: ServerId, to_remove: ServerId) -> Result<()> {
        self.require_state(initiator, NodeState::Running, "coordinate removal with")?;
        self.require_state(to_remove, NodeState::Stopped, "remove")?;
        self.set_state(to_remove, NodeState::Gone)?;
        self.node_log(initiator)?
            .info("storage_service", &format!("removenode: {} removed", to_remove))?;
        info!(target: "casprobe::sim", server = %to_remove, initiator = %initiator, "server removed");
        Ok(())
    }

    async fn decommission_node(&self, id: ServerId) -> Result<()> {
        self.require_state(id, NodeState::Running, "decommission")?;
        if self.running_ids().len() < 2 {
            return Err(Error::transport(format!(
                "cannot decommission {}: it is the last running node",
                id
            )));
        }
        self.set_state(id, NodeState::Gone)?;
        self.node_log(id)?
            .info("storage_service", "decommission: done")?;
        info!(target: "casprobe::sim", server = %id, "server decommissioned");
        Ok(())
    }

    async fn running_servers(&self) -> Result<Vec<ServerInfo>> {
        Ok(self
            .state
            .lock()
            .nodes
            .values()
            .filter(|n| n.state == NodeState::Running)
            .map(|n| n.info.clone())
            .collect())
    }
}

#[async_trait]
impl ErrorInjector for SimCluster {
    async fn enable(&self, node: IpAddr, name: &str, one_shot: bool) -> Result<()> {
        let Some(id) = self.node_by_ip(node) else {
            warn!(target: "casprobe::sim", node = %node, injection = name, "node unreachable; injection not enabled");
            return Ok(());
        };
        self.with_node(id, |n| {
            n.injections.insert(
                name.to_string(),
                Injection {
                    one_shot,
                    release: Arc::new(Notify::new()),
                },
            );
            Ok(())
        })?;
        debug!(target: "casprobe::sim", server = %id, injection = name, one_shot, "injection enabled");
        Ok(())
    }

    async fn disable(&self, node: IpAddr, name: &str) -> Result<()> {
        let Some(id) = self.node_by_ip(node) else {
            warn!(target: "casprobe::sim", node = %node, injection = name, "node unreachable; injection not disabled");
            return Ok(());
        };
        self.with_node(id, |n| {
            n.injections.remove(name);
            Ok(())
        })
    }

    async fn enabled(&self, node: IpAddr) -> Result<Vec<String>> {
        let id = self
            .node_by_ip(node)
            .ok_or_else(|| Error::transport(format!("no server at {}", node)))?;
        self.with_node(id, |n| {
            let mut names: Vec<String> = n.injections.keys().cloned().collect();
            names.sort();
            Ok(names)
        })
    }

    async fn message(&self, node: IpAddr, name: &str) -> Result<()> {
        let id = self
            .node_by_ip(node)
            .ok_or_else(|| Error::transport(format!("no server at {}", node)))?;
        self.with_node(id, |n| {
            let release = n
                .waiting
                .get(name)
                .or_else(|| n.injections.get(name).map(|i| &i.release));
            match release {
                Some(release) => release.notify_one(),
                None => debug!(target: "casprobe::sim", server = %id, injection = name, "message for idle injection"),
            }
            Ok(())
        })
    }
}

fn sim_ip(id: ServerId) -> IpAddr {
    let n = id.0;
    IpAddr::V4(Ipv4Addr::new(127, 0, (n / 250) as u8, (n % 250 + 1) as u8))
}

/// Does `path` hold a simulated log?
pub fn is_sim_log(path: &Path) -> bool {
    std::fs::read_to_string(path)
        .map(|s| s.starts_with(SIM_LOG_HEADER))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster() -> (tempfile::TempDir, SimCluster) {
        let dir = tempfile::tempdir().unwrap();
        let cluster = SimCluster::new(dir.path())
            .unwrap()
            .with_breakpoint_timeout(Duration::from_millis(200));
        (dir, cluster)
    }

    #[tokio::test]
    async fn test_bootstrap_and_list() {
        let (_dir, cluster) = cluster();
        let servers = cluster.bootstrap(3).await.unwrap();
        assert_eq!(cluster.running_servers().await.unwrap(), servers);
        assert_eq!(servers[0].ip_addr, "127.0.0.2".parse::<IpAddr>().unwrap());
        assert!(is_sim_log(&cluster.log_path(servers[0].server_id).unwrap()));
    }

    #[tokio::test]
    async fn test_replace_reusing_identity() {
        let (_dir, cluster) = cluster();
        let servers = cluster.bootstrap(3).await.unwrap();
        let victim = &servers[2];

        // Running nodes cannot be replaced
        let cfg = ReplaceConfig {
            replaced_id: victim.server_id,
            reuse_ip_addr: true,
            use_host_id: true,
        };
        assert!(cluster.server_add(Some(cfg.clone()), ConfigOverrides::new()).await.is_err());

        cluster.server_stop(victim.server_id).await.unwrap();
        let new = cluster.server_add(Some(cfg), ConfigOverrides::new()).await.unwrap();
        assert_eq!(new.ip_addr, victim.ip_addr);
        assert_eq!(new.host_id, victim.host_id);
        assert_ne!(new.server_id, victim.server_id);
        assert_eq!(cluster.node_state(victim.server_id), Some(NodeState::Gone));
        assert_eq!(cluster.running_servers().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_injection_listing_and_one_shot_disarm() {
        let (_dir, cluster) = cluster();
        let s = cluster.bootstrap(1).await.unwrap().remove(0);

        cluster.enable(s.ip_addr, APPLY_BREAKPOINT, true).await.unwrap();
        cluster.enable(s.ip_addr, "other", false).await.unwrap();
        assert_eq!(
            cluster.enabled(s.ip_addr).await.unwrap(),
            vec![APPLY_BREAKPOINT.to_string(), "other".to_string()]
        );

        // Message before the hit is kept; the hit passes straight through
        cluster.message(s.ip_addr, APPLY_BREAKPOINT).await.unwrap();
        cluster.apply_topology(s.server_id, 9).await.unwrap();
        assert_eq!(cluster.enabled(s.ip_addr).await.unwrap(), vec!["other".to_string()]);

        cluster.disable(s.ip_addr, "other").await.unwrap();
        assert!(cluster.enabled(s.ip_addr).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_node_fails_open() {
        let (_dir, cluster) = cluster();
        let ip: IpAddr = "10.9.9.9".parse().unwrap();
        cluster.enable(ip, "x", true).await.unwrap();
        assert!(cluster.enabled(ip).await.is_err());
    }

    #[tokio::test]
    async fn test_remove_and_decommission() {
        let (_dir, cluster) = cluster();
        let servers = cluster.bootstrap(3).await.unwrap();

        assert!(cluster
            .remove_node(servers[1].server_id, servers[0].server_id)
            .await
            .is_err());
        cluster.server_stop_gracefully(servers[0].server_id).await.unwrap();
        cluster
            .remove_node(servers[1].server_id, servers[0].server_id)
            .await
            .unwrap();
        cluster.decommission_node(servers[1].server_id).await.unwrap();
        assert!(cluster.decommission_node(servers[2].server_id).await.is_err());
        assert_eq!(cluster.running_servers().await.unwrap(), vec![servers[2].clone()]);
    }

    #[tokio::test]
    async fn test_restart() {
        let (_dir, cluster) = cluster();
        let s = cluster.bootstrap(1).await.unwrap().remove(0);
        assert!(cluster.server_start(s.server_id).await.is_err());
        cluster.server_stop(s.server_id).await.unwrap();
        assert!(cluster.running_servers().await.unwrap().is_empty());
        cluster.server_start(s.server_id).await.unwrap();
        assert_eq!(cluster.running_servers().await.unwrap(), vec![s]);
    }
}
