//! Language registry.
//!
//! Maps a language identifier to the execution profile used to run snippets
//! of that language: which runtime image, how the command line is shaped, and
//! the resource envelope of the container. The registry is built once at
//! startup and only read afterwards.

use std::collections::BTreeMap;

use crate::error::RegistryError;

const MIB: i64 = 1024 * 1024;

/// Shape of the "evaluate this literal program text" invocation.
///
/// The snippet always becomes a single argv token after `eval_flag`; it is
/// never spliced into a shell string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    /// Interpreter executable inside the image (e.g. `python`).
    pub program: String,
    /// Flag that makes the interpreter run the next argument as code (e.g. `-c`).
    pub eval_flag: String,
}

impl CommandTemplate {
    pub fn new(program: impl Into<String>, eval_flag: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            eval_flag: eval_flag.into(),
        }
    }

    /// Build the argv for `code`.
    pub fn build(&self, code: &str) -> Vec<String> {
        vec![self.program.clone(), self.eval_flag.clone(), code.to_owned()]
    }
}

/// CPU share as `quota / period` (CFS microseconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuQuota {
    pub quota_micros: i64,
    pub period_micros: i64,
}

impl CpuQuota {
    /// Default CFS scheduling period.
    pub const DEFAULT_PERIOD_MICROS: i64 = 100_000;

    pub const fn new(quota_micros: i64, period_micros: i64) -> Self {
        Self {
            quota_micros,
            period_micros,
        }
    }
}

/// Everything needed to run one language's snippets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionProfile {
    pub language_id: String,
    pub runtime_image: String,
    pub command: CommandTemplate,
    pub memory_limit_bytes: i64,
    pub cpu_quota: CpuQuota,
    pub max_processes: i64,
}

impl ExecutionProfile {
    /// Argv that runs `code` with this profile's interpreter.
    pub fn command(&self, code: &str) -> Vec<String> {
        self.command.build(code)
    }
}

/// Read-only lookup table of execution profiles keyed by language id.
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    profiles: BTreeMap<String, ExecutionProfile>,
}

impl LanguageRegistry {
    /// Build a registry, rejecting two profiles for the same language.
    pub fn from_profiles(
        profiles: impl IntoIterator<Item = ExecutionProfile>,
    ) -> Result<Self, RegistryError> {
        let mut map = BTreeMap::new();
        for profile in profiles {
            let id = profile.language_id.clone();
            if map.insert(id.clone(), profile).is_some() {
                return Err(RegistryError::DuplicateLanguage(id));
            }
        }
        Ok(Self { profiles: map })
    }

    /// Single-language configuration: PHP only.
    pub fn php_only() -> Self {
        Self {
            profiles: BTreeMap::from([(
                "php".to_string(),
                profile("php", "php:alpine", CommandTemplate::new("php", "-r"), 40, 3),
            )]),
        }
    }

    /// Multi-language configuration: PHP, Python and Node.
    pub fn multi_language() -> Self {
        let profiles = [
            profile("php", "php:8-alpine", CommandTemplate::new("php", "-r"), 25, 10),
            profile(
                "python",
                "python:3.12-alpine",
                CommandTemplate::new("python", "-c"),
                25,
                10,
            ),
            profile("node", "node:22-alpine", CommandTemplate::new("node", "-e"), 25, 10),
        ];
        Self {
            profiles: profiles
                .into_iter()
                .map(|p| (p.language_id.clone(), p))
                .collect(),
        }
    }

    /// Look up the profile for `language_id`.
    pub fn resolve(&self, language_id: &str) -> Result<&ExecutionProfile, RegistryError> {
        self.profiles
            .get(language_id)
            .ok_or_else(|| RegistryError::UnsupportedLanguage(language_id.to_string()))
    }

    /// Registered language ids, sorted.
    pub fn languages(&self) -> Vec<&str> {
        self.profiles.keys().map(String::as_str).collect()
    }

    /// Take the profiles back out, in language id order.
    pub fn into_profiles(self) -> impl Iterator<Item = ExecutionProfile> {
        self.profiles.into_values()
    }
}

fn profile(
    id: &str,
    image: &str,
    command: CommandTemplate,
    memory_mb: i64,
    max_processes: i64,
) -> ExecutionProfile {
    ExecutionProfile {
        language_id: id.to_string(),
        runtime_image: image.to_string(),
        command,
        memory_limit_bytes: memory_mb * MIB,
        cpu_quota: CpuQuota::new(50_000, CpuQuota::DEFAULT_PERIOD_MICROS),
        max_processes,
    }
}
