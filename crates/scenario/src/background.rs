//! Background tasks and dependent steps
//!
//! A [`BackgroundTask`] owns its cancellation token and its join handle, so
//! stopping it and collecting its terminal result is one call. A failure
//! recorded long before the stop is still returned by the join. Dropping an
//! unjoined task cancels its token.
//!
//! A [`DependentStep`] is a foreground step that may legitimately be cut
//! short by another step (for example a node addition whose coordinator is
//! being shut down). Joining it yields either its result or
//! [`StepOutcome::Cancelled`], never anything in between. Dropping an
//! unjoined step aborts it.

use std::future::Future;

use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error};

use casprobe_core::{CancellationToken, Error, Result};

/// A spawned task that runs until told to stop
pub struct BackgroundTask<T> {
    name: String,
    token: CancellationToken,
    /// `None` once joined
    handle: Option<JoinHandle<Result<T>>>,
}

impl<T: Send + 'static> BackgroundTask<T> {
    /// Spawn `f` with a fresh cancellation token
    pub fn spawn<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let name = name.into();
        let token = CancellationToken::new();
        let handle = tokio::spawn(f(token.clone()));
        debug!(target: "casprobe::scenario", task = %name, "background task started");
        BackgroundTask {
            name,
            token,
            handle: Some(handle),
        }
    }

    /// Task name used in logs and errors
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the task already returned (successfully or not)
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Signal the task to stop and wait for its result.
    ///
    /// # Errors
    ///
    /// The task's own error, or `Error::InvariantViolation` if it panicked.
    pub async fn stop_and_join(mut self) -> Result<T> {
        self.token.cancel();
        let Some(handle) = self.handle.take() else {
            return Err(Error::Cancelled(format!("task {} already joined", self.name)));
        };
        let result = join_result(&self.name, handle.await);
        match &result {
            Ok(_) => debug!(target: "casprobe::scenario", task = %self.name, "background task joined"),
            Err(e) => error!(target: "casprobe::scenario", task = %self.name, error = %e, "background task failed"),
        }
        result
    }
}

impl<T> Drop for BackgroundTask<T> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.token.cancel();
            debug!(target: "casprobe::scenario", task = %self.name, "background task dropped; cancelled");
        }
    }
}

impl<T> std::fmt::Debug for BackgroundTask<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTask")
            .field("name", &self.name)
            .field(
                "finished",
                &self.handle.as_ref().map_or(true, |h| h.is_finished()),
            )
            .finish()
    }
}

fn join_result<T>(name: &str, joined: std::result::Result<Result<T>, JoinError>) -> Result<T> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => {
            let payload = e.into_panic();
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "(non-string panic)".to_string());
            Err(Error::invariant(format!("task {} panicked: {}", name, msg)))
        }
        Err(e) => Err(Error::Cancelled(format!("task {}: {}", name, e))),
    }
}

/// How a dependent step ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome<T> {
    /// The step ran to completion
    Completed(T),
    /// The step was cancelled before completing
    Cancelled,
}

impl<T> StepOutcome<T> {
    /// Whether the step was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StepOutcome::Cancelled)
    }

    /// Require that the step was cancelled.
    ///
    /// # Errors
    ///
    /// `Error::InvariantViolation` naming `what` if it completed instead.
    pub fn expect_cancelled(self, what: &str) -> Result<()> {
        match self {
            StepOutcome::Cancelled => Ok(()),
            StepOutcome::Completed(_) => Err(Error::invariant(format!(
                "{} completed but was expected to be cancelled",
                what
            ))),
        }
    }

    /// Require that the step completed, returning its value.
    ///
    /// # Errors
    ///
    /// `Error::InvariantViolation` naming `what` if it was cancelled.
    pub fn expect_completed(self, what: &str) -> Result<T> {
        match self {
            StepOutcome::Completed(value) => Ok(value),
            StepOutcome::Cancelled => Err(Error::invariant(format!(
                "{} was cancelled but was expected to complete",
                what
            ))),
        }
    }
}

/// A step racing against `token`
pub struct DependentStep<T> {
    name: String,
    /// `None` once joined
    handle: Option<JoinHandle<Option<T>>>,
}

/// Spawn `fut`; if `token` is cancelled first, `fut` is dropped and the
/// step reports [`StepOutcome::Cancelled`].
pub fn spawn_dependent<T, Fut>(
    name: impl Into<String>,
    token: &CancellationToken,
    fut: Fut,
) -> DependentStep<T>
where
    T: Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
{
    let name = name.into();
    let token = token.clone();
    let handle = tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = token.cancelled() => None,
            value = fut => Some(value),
        }
    });
    DependentStep {
        name,
        handle: Some(handle),
    }
}

impl<T> DependentStep<T> {
    /// Wait for the step to complete or be cancelled.
    ///
    /// # Errors
    ///
    /// `Error::InvariantViolation` if the step panicked.
    pub async fn join(mut self) -> Result<StepOutcome<T>> {
        let Some(handle) = self.handle.take() else {
            return Ok(StepOutcome::Cancelled);
        };
        let outcome = match join_result(&self.name, handle.await.map(Ok))? {
            Some(value) => StepOutcome::Completed(value),
            None => StepOutcome::Cancelled,
        };
        debug!(
            target: "casprobe::scenario",
            step = %self.name,
            cancelled = outcome.is_cancelled(),
            "dependent step joined"
        );
        Ok(outcome)
    }
}

impl<T> Drop for DependentStep<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
