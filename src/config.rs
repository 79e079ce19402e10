//! Daemon configuration.
//!
//! Configuration is JSON. It is read from the file given with `--config`,
//! otherwise from the `SNIPPET_SANDBOX_CONFIG` environment variable, and
//! otherwise the built-in defaults are used. Every field has a default.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::registry::{CommandTemplate, CpuQuota, ExecutionProfile, LanguageRegistry};

/// Environment variable holding inline JSON configuration.
pub const CONFIG_ENV: &str = "SNIPPET_SANDBOX_CONFIG";

/// Top-level configuration for the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Built-in language set to start from.
    #[serde(default)]
    pub preset: Preset,

    /// Extra or replacement language profiles, keyed by language id.
    #[serde(default)]
    pub languages: BTreeMap<String, LanguageConfig>,

    /// Wall-clock deadline per snippet.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Language used when a form submission names none.
    #[serde(default = "default_language")]
    pub default_language: String,

    #[serde(default)]
    pub docker: DockerConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Address the HTTP front-end binds to.
    #[serde(default = "default_listen")]
    pub listen: String,
}

/// Built-in language sets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// PHP, Python and Node.
    #[default]
    Multi,
    /// PHP only.
    Php,
}

impl Preset {
    pub fn registry(self) -> LanguageRegistry {
        match self {
            Self::Multi => LanguageRegistry::multi_language(),
            Self::Php => LanguageRegistry::php_only(),
        }
    }
}

/// One language profile as written in configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LanguageConfig {
    /// Runtime image (e.g. `ruby:3-alpine`).
    pub image: String,

    /// Interpreter executable inside the image.
    pub program: String,

    /// Flag that makes the interpreter evaluate its next argument.
    pub eval_flag: String,

    #[serde(default = "default_memory")]
    pub memory_mb: i64,

    /// CFS quota in microseconds per period.
    #[serde(default = "default_cpu_quota")]
    pub cpu_quota: i64,

    #[serde(default = "default_cpu_period")]
    pub cpu_period: i64,

    #[serde(default = "default_max_processes")]
    pub max_processes: i64,
}

impl LanguageConfig {
    fn into_profile(self, language_id: &str) -> Result<ExecutionProfile> {
        anyhow::ensure!(
            self.memory_mb > 0,
            "language '{language_id}': memory_mb must be positive"
        );
        anyhow::ensure!(
            self.cpu_quota > 0 && self.cpu_period > 0,
            "language '{language_id}': cpu_quota and cpu_period must be positive"
        );
        anyhow::ensure!(
            self.max_processes > 0,
            "language '{language_id}': max_processes must be positive"
        );
        anyhow::ensure!(
            !self.program.is_empty() && !self.eval_flag.is_empty(),
            "language '{language_id}': program and eval_flag are required"
        );

        let memory_limit_bytes = self
            .memory_mb
            .checked_mul(1024 * 1024)
            .with_context(|| format!("language '{language_id}': memory_mb is too large"))?;

        Ok(ExecutionProfile {
            language_id: language_id.to_string(),
            runtime_image: self.image,
            command: CommandTemplate::new(self.program, self.eval_flag),
            memory_limit_bytes,
            cpu_quota: CpuQuota::new(self.cpu_quota, self.cpu_period),
            max_processes: self.max_processes,
        })
    }
}

/// Docker Engine connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DockerConfig {
    /// Unix socket of the daemon. Uses `DOCKER_HOST` or the default socket when unset.
    #[serde(default)]
    pub socket: Option<String>,

    /// Have the engine delete containers as soon as they exit.
    #[serde(default = "default_true")]
    pub auto_remove: bool,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket: None,
            auto_remove: true,
        }
    }
}

/// Per-client admission control for the HTTP front-end.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    #[serde(default = "default_window")]
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_seconds: default_window(),
        }
    }
}

impl RateLimitConfig {
    pub const fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preset: Preset::default(),
            languages: BTreeMap::new(),
            timeout_seconds: default_timeout(),
            default_language: default_language(),
            docker: DockerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            listen: default_listen(),
        }
    }
}

impl Config {
    /// Load configuration: `path` if given, else `SNIPPET_SANDBOX_CONFIG`, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        match std::env::var(CONFIG_ENV) {
            Ok(json) => {
                debug!(var = CONFIG_ENV, "Reading configuration from environment");
                serde_json::from_str(&json).with_context(|| format!("Failed to parse {CONFIG_ENV}"))
            }
            Err(_) => {
                debug!("No configuration given, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Build the language registry: the preset, then configured profiles on top.
    ///
    /// A configured profile replaces a preset one with the same id (with info log).
    pub fn registry(&self) -> Result<LanguageRegistry> {
        let configured = self
            .languages
            .iter()
            .map(|(id, lang)| lang.clone().into_profile(id))
            .collect::<Result<Vec<_>>>()?;

        let preset = self.preset.registry().into_profiles().filter(|profile| {
            let overridden = self.languages.contains_key(&profile.language_id);
            if overridden {
                info!(language = %profile.language_id, "Configured profile overrides preset");
            }
            !overridden
        });

        Ok(LanguageRegistry::from_profiles(preset.chain(configured))?)
    }

    /// Check cross-field constraints against the assembled registry.
    pub fn validate(&self, registry: &LanguageRegistry) -> Result<()> {
        anyhow::ensure!(self.timeout_seconds > 0, "timeout_seconds must be positive");
        anyhow::ensure!(
            self.rate_limit.max_requests > 0 && self.rate_limit.window_seconds > 0,
            "rate_limit values must be positive"
        );
        registry.resolve(&self.default_language).with_context(|| {
            format!(
                "default_language '{}' is not registered (available: {:?})",
                self.default_language,
                registry.languages()
            )
        })?;
        Ok(())
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Create a config from a JSON string (for testing).
    #[cfg(test)]
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse JSON")?;
        Ok(config)
    }
}

const fn default_timeout() -> u64 {
    10
}

fn default_language() -> String {
    "php".into()
}

fn default_listen() -> String {
    "127.0.0.1:8080".into()
}

const fn default_memory() -> i64 {
    25
}

const fn default_cpu_quota() -> i64 {
    50_000
}

const fn default_cpu_period() -> i64 {
    CpuQuota::DEFAULT_PERIOD_MICROS
}

const fn default_max_processes() -> i64 {
    10
}

const fn default_true() -> bool {
    true
}

const fn default_max_requests() -> u32 {
    5
}

const fn default_window() -> u64 {
    10
}
