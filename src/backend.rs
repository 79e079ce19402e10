//! Isolation provider trait and implementations.
//!
//! A provider owns the engine that actually creates, starts, waits on, reads
//! and removes execution units (containers). The orchestrator only talks to
//! it through this narrow capability surface.

mod docker;

pub use docker::DockerProvider;

use std::fmt;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::registry::ExecutionProfile;

/// Non-root identity every unit runs as (`nobody:nogroup`).
pub const UNPRIVILEGED_USER: &str = "65534:65534";

/// Opaque handle to one execution unit, as issued by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitHandle(String);

impl UnitHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Constraint envelope applied to a unit at creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitConstraints {
    pub network_disabled: bool,
    pub read_only_root: bool,
    pub drop_all_capabilities: bool,
    pub no_new_privileges: bool,
    pub user: String,
    pub memory_limit_bytes: i64,
    pub cpu_quota_micros: i64,
    pub cpu_period_micros: i64,
    pub max_processes: i64,
    /// Let the engine delete the unit once it exits.
    pub auto_remove: bool,
}

impl UnitConstraints {
    /// Full lockdown envelope carrying the profile's resource limits.
    pub fn for_profile(profile: &ExecutionProfile, auto_remove: bool) -> Self {
        Self {
            network_disabled: true,
            read_only_root: true,
            drop_all_capabilities: true,
            no_new_privileges: true,
            user: UNPRIVILEGED_USER.to_string(),
            memory_limit_bytes: profile.memory_limit_bytes,
            cpu_quota_micros: profile.cpu_quota.quota_micros,
            cpu_period_micros: profile.cpu_quota.period_micros,
            max_processes: profile.max_processes,
            auto_remove,
        }
    }
}

/// How a unit stopped running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitExit {
    pub status_code: i64,
}

/// One chunk of the unit's combined output, tagged with its stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFrame {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    /// Output the engine did not attribute to stdout or stderr.
    Other(Vec<u8>),
}

/// Capabilities the orchestrator needs from an isolation engine.
///
/// Implementations must be safe to share between concurrent requests; every
/// method is keyed by the unit handle and carries no per-request state.
#[async_trait]
pub trait IsolationProvider: Send + Sync {
    /// Create (but do not start) a unit running `argv` in `image`.
    async fn create_unit(
        &self,
        image: &str,
        argv: &[String],
        constraints: &UnitConstraints,
    ) -> Result<UnitHandle, ProviderError>;

    /// Start a created unit.
    async fn start_unit(&self, unit: &UnitHandle) -> Result<(), ProviderError>;

    /// Resolve once the unit is no longer running, whatever its exit status.
    ///
    /// An `Err` means the wait itself failed, not the program.
    async fn wait_for_exit(&self, unit: &UnitHandle) -> Result<UnitExit, ProviderError>;

    /// Combined stdout/stderr of a stopped unit, in emission order.
    async fn fetch_output(&self, unit: &UnitHandle) -> Result<Vec<OutputFrame>, ProviderError>;

    /// Kill and discard the unit. Removing a unit that is already gone
    /// returns [`ProviderError::NotFound`].
    async fn force_remove(&self, unit: &UnitHandle) -> Result<(), ProviderError>;
}
