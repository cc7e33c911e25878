//! Error types for compilekit-core

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while resolving, installing or compiling
#[derive(Error, Debug)]
pub enum CompileKitError {
    /// Missing or invalid user-supplied setting
    #[error("{0}")]
    Config(String),

    /// A path escapes the trusted root
    #[error("{0}")]
    Security(String),

    /// Expected file or directory is missing
    #[error("{0}")]
    NotFound(String),

    /// Filesystem write or permission failure
    #[error("{0}")]
    Io(String),

    /// Missing execution capability or missing tool on the host
    #[error("{0}")]
    Environment(String),

    /// Checksum mismatch or missing checksum
    #[error("{0}")]
    Integrity(String),

    /// Network or HTTP failure
    #[error("{message}")]
    Remote {
        message: String,
        /// Seconds until the remote allows another request, when advertised
        retry_after: Option<u64>,
    },
}

/// Discriminant of [`CompileKitError`], carried on failed outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Security,
    NotFound,
    Io,
    Environment,
    Integrity,
    Remote,
}

impl CompileKitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Security(_) => ErrorKind::Security,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Io(_) => ErrorKind::Io,
            Self::Environment(_) => ErrorKind::Environment,
            Self::Integrity(_) => ErrorKind::Integrity,
            Self::Remote { .. } => ErrorKind::Remote,
        }
    }

    pub(crate) fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            retry_after: None,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Config => "ConfigError",
            Self::Security => "SecurityError",
            Self::NotFound => "NotFoundError",
            Self::Io => "IOError",
            Self::Environment => "EnvironmentError",
            Self::Integrity => "IntegrityError",
            Self::Remote => "RemoteError",
        };
        f.write_str(name)
    }
}

impl From<std::io::Error> for CompileKitError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => CompileKitError::NotFound(err.to_string()),
            _ => CompileKitError::Io(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for CompileKitError {
    fn from(err: reqwest::Error) -> Self {
        CompileKitError::remote(format!("HTTP request failed: {err}"))
    }
}

impl From<serde_json::Error> for CompileKitError {
    fn from(err: serde_json::Error) -> Self {
        CompileKitError::Io(format!("JSON parsing error: {err}"))
    }
}

impl From<toml::de::Error> for CompileKitError {
    fn from(err: toml::de::Error) -> Self {
        CompileKitError::Config(format!("Invalid settings file: {err}"))
    }
}

impl From<toml::ser::Error> for CompileKitError {
    fn from(err: toml::ser::Error) -> Self {
        CompileKitError::Config(format!("Failed to serialize settings: {err}"))
    }
}

/// Result type for compilekit-core operations
pub type Result<T> = std::result::Result<T, CompileKitError>;
