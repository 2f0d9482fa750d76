//! Error taxonomy for the build-fix loop.
//!
//! Two layers live here:
//!
//! - [`FailureKind`]: the classification of everything that can go wrong
//!   during a run. Most kinds are recoverable and are absorbed by the fix
//!   loop as state transitions; callers query `is_recoverable()` /
//!   `surfaces_to_user()` instead of matching on strings.
//! - Typed errors (`PatchError`, `LlmError`, `ConfigError`, `FixLoopError`)
//!   returned by the individual components.
//!
//! | Kind                    | Recoverable | Surfaced to user |
//! |-------------------------|-------------|------------------|
//! | BuildFailure            | yes         | no               |
//! | BuildTimeout            | yes         | no               |
//! | ParseAmbiguous          | yes         | no               |
//! | NoSuggestion            | yes         | no               |
//! | NonActionableError      | no          | yes              |
//! | PatchConflict           | no          | yes              |
//! | AttemptBudgetExhausted  | no          | yes              |

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification used by the fix loop to decide whether a failure is
/// absorbed or handed to the human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Build exited non-zero; handled by the fix loop.
    BuildFailure,
    /// Build hit the wall-clock limit; treated as a build failure.
    BuildTimeout,
    /// A diagnostic matched no kind pattern and fell back to `Unknown`.
    ParseAmbiguous,
    /// Errors the loop will not retry automatically.
    NonActionableError,
    /// The LLM collaborator produced nothing usable.
    NoSuggestion,
    /// The target file changed on disk since its snapshot.
    PatchConflict,
    /// An error group used its whole attempt budget.
    AttemptBudgetExhausted,
}

impl FailureKind {
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            Self::BuildFailure | Self::BuildTimeout | Self::ParseAmbiguous | Self::NoSuggestion
        )
    }

    /// Whether the end user must see this failure in the final report.
    pub fn surfaces_to_user(self) -> bool {
        !self.is_recoverable()
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BuildFailure => write!(f, "build_failure"),
            Self::BuildTimeout => write!(f, "build_timeout"),
            Self::ParseAmbiguous => write!(f, "parse_ambiguous"),
            Self::NonActionableError => write!(f, "non_actionable_error"),
            Self::NoSuggestion => write!(f, "no_suggestion"),
            Self::PatchConflict => write!(f, "patch_conflict"),
            Self::AttemptBudgetExhausted => write!(f, "attempt_budget_exhausted"),
        }
    }
}

/// Errors from the patch engine.
#[derive(Debug, Error)]
pub enum PatchError {
    /// The file on disk no longer matches the snapshot the patch was built from.
    #[error("conflict: {path} changed on disk since it was read")]
    Conflict { path: PathBuf },

    /// A structured change could not be placed onto the file content.
    #[error("change rejected at line {line}: {message}")]
    InvalidChange { line: usize, message: String },

    /// The target is not valid UTF-8 text.
    #[error("{path} is not a UTF-8 text file")]
    NotText { path: PathBuf },

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PatchError {
    pub fn conflict(path: impl Into<PathBuf>) -> Self {
        Self::Conflict { path: path.into() }
    }

    pub fn invalid_change(line: usize, message: impl Into<String>) -> Self {
        Self::InvalidChange {
            line,
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Errors from the LLM collaborator.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Network / backend failure.
    #[error("inference request failed: {0}")]
    Request(String),

    /// Backend answered with a non-success status.
    #[error("inference endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body did not have the expected shape.
    #[error("malformed inference response: {0}")]
    Malformed(String),
}

/// The fix requester could not produce a usable patch.
///
/// Recoverable: the loop charges one attempt and moves on.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("no suggestion: {reason}")]
pub struct NoSuggestion {
    pub reason: String,
}

impl NoSuggestion {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Configuration problems detected while building the loop.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid pattern for {kind}: {message}")]
    InvalidPattern { kind: String, message: String },

    #[error("invalid glob '{glob}': {message}")]
    InvalidGlob { glob: String, message: String },

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

impl ConfigError {
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Infrastructure failures that end a run outside the normal terminal states.
#[derive(Debug, Error)]
pub enum FixLoopError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    IllegalTransition(#[from] crate::state_machine::IllegalTransition),
}

pub type FixLoopResult<T> = Result<T, FixLoopError>;
