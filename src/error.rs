//! Error types shared across the crate.

use thiserror::Error;

/// Language registry lookup and construction failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("language registered twice: {0}")]
    DuplicateLanguage(String),
}

/// Failures reported by an isolation provider.
///
/// The message carries the provider's own description of the failure; it is
/// meant for logs and never shown to clients.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("cannot reach isolation provider: {0}")]
    Connect(String),

    #[error("failed to create unit: {0}")]
    Create(String),

    #[error("failed to start unit {unit}: {message}")]
    Start { unit: String, message: String },

    #[error("waiting for unit {unit} failed: {message}")]
    Wait { unit: String, message: String },

    #[error("failed to fetch output of unit {unit}: {message}")]
    Fetch { unit: String, message: String },

    #[error("failed to remove unit {unit}: {message}")]
    Remove { unit: String, message: String },

    #[error("unit {0} does not exist")]
    NotFound(String),
}

/// Cause attached to an infrastructure-error outcome.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    UnsupportedLanguage(#[from] RegistryError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl RunError {
    /// Language id when the failure was an unknown language.
    pub fn unsupported_language(&self) -> Option<&str> {
        match self {
            Self::UnsupportedLanguage(RegistryError::UnsupportedLanguage(id)) => Some(id),
            _ => None,
        }
    }
}
