//! Structured results handed back to the host for display.

use std::path::PathBuf;

use serde::{Serialize, Serializer};

use crate::backend::Backend;
use crate::error::{CompileKitError, ErrorKind};

/// Three-valued success of a compile or install action.
///
/// `Uncertain` means the work ran through an execution primitive that cannot
/// report an exit code; the artifact looks valid but completion is unconfirmed.
/// Serialized as `true` / `false` / `null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileStatus {
    Succeeded,
    Failed,
    Uncertain,
}

impl CompileStatus {
    /// Status flag stored for asynchronous display.
    pub fn as_flag(&self) -> &'static str {
        match self {
            Self::Succeeded => "success",
            Self::Failed => "error",
            Self::Uncertain => "unknown",
        }
    }

    pub fn from_flag(flag: &str) -> Option<Self> {
        match flag {
            "success" => Some(Self::Succeeded),
            "error" => Some(Self::Failed),
            "unknown" => Some(Self::Uncertain),
            _ => None,
        }
    }

    /// `Succeeded` and `Uncertain` are both acceptable results.
    pub fn is_acceptable(&self) -> bool {
        !matches!(self, Self::Failed)
    }
}

impl Serialize for CompileStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Succeeded => serializer.serialize_bool(true),
            Self::Failed => serializer.serialize_bool(false),
            Self::Uncertain => serializer.serialize_none(),
        }
    }
}

/// Result of a compile, install or remove action
#[derive(Debug, Clone, Serialize)]
pub struct CompileOutcome {
    #[serde(rename = "success")]
    pub status: CompileStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<Backend>,
    /// Output stylesheet for compiles, install location for installs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Error class when the outcome failed because of a [`CompileKitError`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Captured process output, if any process ran
    #[serde(skip_serializing_if = "String::is_empty")]
    pub output: String,
}

impl CompileOutcome {
    fn new(status: CompileStatus, message: impl Into<String>) -> Self {
        CompileOutcome {
            status,
            message: message.into(),
            backend: None,
            path: None,
            error_kind: None,
            output: String::new(),
        }
    }

    pub fn succeeded(message: impl Into<String>) -> Self {
        Self::new(CompileStatus::Succeeded, message)
    }

    pub fn uncertain(message: impl Into<String>) -> Self {
        Self::new(CompileStatus::Uncertain, message)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(CompileStatus::Failed, message)
    }

    pub fn from_error(err: CompileKitError) -> Self {
        let kind = err.kind();
        let mut outcome = Self::failed(err.to_string());
        outcome.error_kind = Some(kind);
        outcome
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn is_failed(&self) -> bool {
        self.status == CompileStatus::Failed
    }
}

impl From<CompileKitError> for CompileOutcome {
    fn from(err: CompileKitError) -> Self {
        Self::from_error(err)
    }
}
