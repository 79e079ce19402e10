//! Execution orchestrator.
//!
//! Runs one snippet in one freshly created unit: resolve the language
//! profile, create and start the unit, race its exit against the deadline,
//! collect stdout, and remove the unit on every path.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::backend::{IsolationProvider, UnitConstraints, UnitHandle};
use crate::error::{ProviderError, RunError};
use crate::output::demux;
use crate::registry::LanguageRegistry;

/// Wall-clock budget for one snippet unless configured otherwise.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(10);

/// Upper bound on how long cleanup may hold up a finished request.
const REMOVAL_GRACE: Duration = Duration::from_secs(5);

/// Result of one `run` call.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// The unit exited before the deadline; only its stdout is kept.
    Completed { stdout: String },
    /// The deadline elapsed first and the unit was force-removed.
    TimedOut,
    /// Unknown language or any isolation provider failure.
    InfrastructureError { cause: RunError },
}

impl ExecutionOutcome {
    fn failed(cause: impl Into<RunError>) -> Self {
        Self::InfrastructureError {
            cause: cause.into(),
        }
    }

    /// Text shown to the client. Infrastructure causes other than an
    /// unknown language are never revealed.
    pub fn client_message(&self, deadline: Duration) -> String {
        match self {
            Self::Completed { stdout } => stdout.clone(),
            Self::TimedOut => format!(
                "Execution timed out after {} seconds.",
                deadline.as_secs()
            ),
            Self::InfrastructureError { cause } => cause.unsupported_language().map_or_else(
                || "Something went wrong while executing your code.".to_string(),
                |id| format!("Unsupported language: {id}."),
            ),
        }
    }
}

/// Orchestrates sandboxed runs against a shared provider.
///
/// Cheap to share behind an `Arc`; holds no per-request state.
pub struct Orchestrator<P> {
    registry: Arc<LanguageRegistry>,
    provider: Arc<P>,
    deadline: Duration,
    auto_remove: bool,
}

impl<P: IsolationProvider + 'static> Orchestrator<P> {
    pub fn new(registry: Arc<LanguageRegistry>, provider: Arc<P>) -> Self {
        Self {
            registry,
            provider,
            deadline: DEFAULT_DEADLINE,
            auto_remove: true,
        }
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Whether units are created with engine-side removal on exit.
    #[must_use]
    pub fn with_auto_remove(mut self, auto_remove: bool) -> Self {
        self.auto_remove = auto_remove;
        self
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    pub const fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Run `source_code` as `language_id` under the configured deadline.
    pub async fn run(&self, language_id: &str, source_code: &str) -> ExecutionOutcome {
        self.run_with_deadline(language_id, source_code, self.deadline)
            .await
    }

    /// Run `source_code` as `language_id` under an explicit deadline.
    #[instrument(
        skip(self, source_code),
        fields(language = %language_id, code_len = source_code.len())
    )]
    pub async fn run_with_deadline(
        &self,
        language_id: &str,
        source_code: &str,
        deadline: Duration,
    ) -> ExecutionOutcome {
        let profile = match self.registry.resolve(language_id) {
            Ok(profile) => profile,
            Err(e) => {
                info!(error = %e, "Rejected snippet");
                return ExecutionOutcome::failed(e);
            }
        };

        let constraints = UnitConstraints::for_profile(profile, self.auto_remove);
        let argv = profile.command(source_code);

        let unit = match self
            .provider
            .create_unit(&profile.runtime_image, &argv, &constraints)
            .await
        {
            Ok(unit) => unit,
            Err(e) => {
                error!(error = %e, image = %profile.runtime_image, "Unit creation failed");
                return ExecutionOutcome::failed(e);
            }
        };

        let guard = UnitGuard::new(Arc::clone(&self.provider), unit);
        let outcome = self.supervise(guard.unit(), deadline).await;
        guard.release().await;

        match &outcome {
            ExecutionOutcome::Completed { stdout } => {
                debug!(stdout_len = stdout.len(), "Execution completed");
            }
            ExecutionOutcome::TimedOut => warn!(?deadline, "Execution timed out"),
            ExecutionOutcome::InfrastructureError { cause } => {
                error!(error = %cause, "Execution failed");
            }
        }
        outcome
    }

    /// Drive a created unit from start to a terminal outcome. Never removes it.
    async fn supervise(&self, unit: &UnitHandle, deadline: Duration) -> ExecutionOutcome {
        let expires = Instant::now() + deadline;

        match tokio::time::timeout_at(expires, self.provider.start_unit(unit)).await {
            Ok(Ok(())) => debug!(unit = %unit, "Unit started"),
            Ok(Err(e)) => return ExecutionOutcome::failed(e),
            Err(_) => return ExecutionOutcome::TimedOut,
        }

        let exit = tokio::select! {
            res = self.provider.wait_for_exit(unit) => match res {
                Ok(exit) => exit,
                Err(e) => return ExecutionOutcome::failed(e),
            },
            () = tokio::time::sleep_until(expires) => return ExecutionOutcome::TimedOut,
        };
        debug!(unit = %unit, status_code = exit.status_code, "Unit exited");

        let frames = match self.provider.fetch_output(unit).await {
            Ok(frames) => frames,
            Err(e) => return ExecutionOutcome::failed(e),
        };

        let output = demux(frames);
        if !output.stderr.is_empty() {
            // Dropped from the result; the client only ever sees stdout
            debug!(unit = %unit, stderr_len = output.stderr.len(), "Discarding stderr");
        }
        ExecutionOutcome::Completed {
            stdout: output.stdout_lossy(),
        }
    }
}

/// Owns a created unit and removes it exactly once.
///
/// `release` removes it in-line. If the owning future is dropped before
/// that removal has finished (caller cancelled the request), `Drop` hands
/// removal to the runtime.
struct UnitGuard<P: IsolationProvider + 'static> {
    provider: Arc<P>,
    unit: Option<UnitHandle>,
}

impl<P: IsolationProvider + 'static> UnitGuard<P> {
    fn new(provider: Arc<P>, unit: UnitHandle) -> Self {
        Self {
            provider,
            unit: Some(unit),
        }
    }

    fn unit(&self) -> &UnitHandle {
        // Only `release` and `drop` take the handle, and both consume the guard
        self.unit.as_ref().unwrap_or_else(|| unreachable!("unit already released"))
    }

    async fn release(mut self) {
        // Cleared only once removal is done; a cancelled release leaves it to `drop`
        if let Some(unit) = &self.unit {
            remove_unit(self.provider.as_ref(), unit).await;
        }
        self.unit = None;
    }
}

impl<P: IsolationProvider + 'static> Drop for UnitGuard<P> {
    fn drop(&mut self) {
        let Some(unit) = self.unit.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(unit = %unit, "Request abandoned, removing unit in background");
                let provider = Arc::clone(&self.provider);
                handle.spawn(async move {
                    remove_unit(provider.as_ref(), &unit).await;
                });
            }
            Err(_) => error!(unit = %unit, "No runtime to remove abandoned unit"),
        }
    }
}

/// Force-remove a unit; failures are logged and never propagated.
async fn remove_unit<P: IsolationProvider + ?Sized>(provider: &P, unit: &UnitHandle) {
    match tokio::time::timeout(REMOVAL_GRACE, provider.force_remove(unit)).await {
        Ok(Ok(())) => debug!(unit = %unit, "Unit removed"),
        Ok(Err(ProviderError::NotFound(_))) => debug!(unit = %unit, "Unit already removed"),
        Ok(Err(e)) => warn!(unit = %unit, error = %e, "Failed to remove unit"),
        Err(_) => warn!(unit = %unit, grace = ?REMOVAL_GRACE, "Unit removal did not finish in time"),
    }
}
