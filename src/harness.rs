//! Entry point tying configuration to the harness components

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use casprobe_core::{
    ClusterManager, ErrorInjector, HarnessConfig, KvStore, Result, CONFIG_FILE_NAME,
};
use casprobe_logwatch::{LogFile, ProcFs, ReadPool, DEFAULT_QUEUE_DEPTH};
use casprobe_oracle::WorkloadGenerator;
use casprobe_scenario::{FaultScenario, RestInjector, StagedShutdown};

/// Configured harness: one log read pool shared by every watched log, plus
/// factories for workloads, scenarios and the REST injector.
#[derive(Debug)]
pub struct Harness {
    config: HarnessConfig,
    pool: Arc<ReadPool>,
    procfs: ProcFs,
}

impl Harness {
    /// Open a harness rooted at `dir`, creating `casprobe.toml` with
    /// defaults if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or config file cannot be created,
    /// read or validated.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let config_path = dir.join(CONFIG_FILE_NAME);
        HarnessConfig::write_default_if_missing(&config_path)?;
        let config = HarnessConfig::from_file(&config_path)?;
        info!(target: "casprobe::harness", path = %config_path.display(), "loaded config");
        Self::with_config(config)
    }

    /// Build a harness from an explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for invalid settings, or `Error::Io` if the
    /// read pool threads cannot be spawned.
    pub fn with_config(config: HarnessConfig) -> Result<Self> {
        config.validate()?;
        let pool = Arc::new(ReadPool::new(config.log.read_threads, DEFAULT_QUEUE_DEPTH)?);
        Ok(Harness {
            config,
            pool,
            procfs: ProcFs::new(),
        })
    }

    /// Look up processes under `procfs` instead of `/proc`
    pub fn with_procfs(mut self, procfs: ProcFs) -> Self {
        self.procfs = procfs;
        self
    }

    /// Active configuration
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Pool performing blocking log reads
    pub fn read_pool(&self) -> Arc<ReadPool> {
        Arc::clone(&self.pool)
    }

    /// Open the log of the local server whose query port listens on `host`.
    ///
    /// # Errors
    ///
    /// `Error::ResourceUnavailable` when no such server runs locally; see
    /// [`casprobe_scenario::skip_on_unavailable`].
    pub fn server_log(&self, host: &str) -> Result<LogFile> {
        self.procfs.open_log_file(
            self.read_pool(),
            host,
            self.config.endpoints.cql_port,
            &self.config.log,
        )
    }

    /// Error-injection client for the configured REST port
    pub fn injector(&self) -> RestInjector {
        RestInjector::new(&self.config.endpoints)
    }

    /// Fresh workload generator
    pub fn workload(&self) -> WorkloadGenerator {
        WorkloadGenerator::new(&self.config.workload)
    }

    /// Scenario running the configured workload against `store`
    pub fn scenario<S: KvStore + ?Sized + 'static>(
        &self,
        name: impl Into<String>,
        store: Arc<S>,
    ) -> FaultScenario<S> {
        FaultScenario::new(name, store, self.config.workload.clone())
    }

    /// Staged shutdown whose log waits use the configured timeout
    pub fn staged_shutdown(
        &self,
        cluster: Arc<dyn ClusterManager>,
        injector: Arc<dyn ErrorInjector>,
    ) -> StagedShutdown {
        StagedShutdown::new(cluster, injector, self.config.log.wait_timeout())
    }
}
