//! Fault-injection orchestrator
//!
//! A [`FaultScenario`] runs the randomized workload as a background task
//! while a foreground future disrupts the cluster. Whatever happens in the
//! foreground, the workload is stopped and joined before the scenario
//! returns, and its failures are never swallowed. Dropping the `run` future
//! stops the workload too.
//!
//! Error precedence after cleanup:
//! 1. an invariant violation from the workload
//! 2. the foreground error
//! 3. any other workload error

use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;

use tracing::{error, info, warn};

use casprobe_core::{ErrorInjector, KvStore, Result, WorkloadConfig};
use casprobe_oracle::{WorkloadGenerator, WorkloadReport};

use crate::background::BackgroundTask;

/// Result of a scenario whose foreground and workload both succeeded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioReport<T> {
    /// Value produced by the foreground steps
    pub foreground: T,
    /// What the background workload did
    pub workload: WorkloadReport,
}

/// Workload-under-disruption driver
pub struct FaultScenario<S: ?Sized> {
    name: String,
    store: Arc<S>,
    workload: WorkloadConfig,
}

impl<S: KvStore + ?Sized + 'static> FaultScenario<S> {
    /// Scenario `name` running a workload configured by `workload` against
    /// `store`
    pub fn new(name: impl Into<String>, store: Arc<S>, workload: WorkloadConfig) -> Self {
        FaultScenario {
            name: name.into(),
            store,
            workload,
        }
    }

    /// Scenario name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `foreground` while the workload runs in the background.
    ///
    /// # Errors
    ///
    /// See the module docs for which error wins when several occur.
    pub async fn run<T, Fut>(&self, foreground: Fut) -> Result<ScenarioReport<T>>
    where
        Fut: Future<Output = Result<T>>,
    {
        let mut generator = WorkloadGenerator::new(&self.workload);
        info!(
            target: "casprobe::scenario",
            scenario = %self.name,
            seed = generator.seed(),
            "starting scenario"
        );

        let store = Arc::clone(&self.store);
        let background = BackgroundTask::spawn(format!("{} workload", self.name), |token| {
            async move { generator.run_until_cancelled(store.as_ref(), &token).await }
        });

        let foreground = foreground.await;
        if let Err(e) = &foreground {
            warn!(target: "casprobe::scenario", scenario = %self.name, error = %e, "foreground failed; stopping workload");
        }
        let workload = background.stop_and_join().await;

        match (foreground, workload) {
            (Err(fg), Err(bg)) if bg.is_invariant_violation() => {
                error!(
                    target: "casprobe::scenario",
                    scenario = %self.name,
                    error = %fg,
                    "foreground error superseded by workload violation"
                );
                Err(bg)
            }
            (Ok(_), Err(bg)) => Err(bg),
            (Err(fg), Err(bg)) => {
                error!(target: "casprobe::scenario", scenario = %self.name, error = %bg, "workload also failed");
                Err(fg)
            }
            (Err(fg), Ok(_)) => Err(fg),
            (Ok(foreground), Ok(workload)) => {
                info!(
                    target: "casprobe::scenario",
                    scenario = %self.name,
                    workload = %workload,
                    "scenario passed"
                );
                Ok(ScenarioReport {
                    foreground,
                    workload,
                })
            }
        }
    }
}

/// Run `fut` with injection `name` enabled on `node`; the injection is
/// disabled afterwards whether `fut` succeeded or not.
///
/// # Errors
///
/// The error of `fut`, else the error of enabling or disabling.
pub async fn with_injection<T, Fut>(
    injector: &dyn ErrorInjector,
    node: IpAddr,
    name: &str,
    one_shot: bool,
    fut: Fut,
) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    injector.enable(node, name, one_shot).await?;
    let result = fut.await;
    let disabled = injector.disable(node, name).await;
    match (result, disabled) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), disabled) => {
            if let Err(d) = disabled {
                warn!(target: "casprobe::scenario", injection = name, error = %d, "failed to disable injection");
            }
            Err(e)
        }
    }
}

/// Turn `ResourceUnavailable` into a logged skip (`Ok(None)`)
///
/// # Errors
///
/// Every other error passes through.
pub fn skip_on_unavailable<T>(scenario: &str, result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_skip() => {
            warn!(target: "casprobe::scenario", scenario, reason = %e, "skipping scenario");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
