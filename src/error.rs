//! Unified error taxonomy for the setup core
//!
//! Everything that can go wrong during discovery, validation, or execution
//! funnels into [`SetupError`] so the binary can map failures onto the
//! documented exit codes: 1 for validation/configuration problems, 2 for
//! infrastructure/provider problems, 130 when the operator aborted or
//! interrupted the run.

use std::fmt::Write as _;
use std::path::PathBuf;
use thiserror::Error;

use crate::provider::ProviderError;

/// A single field-level problem found while validating a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    /// Dotted path of the offending field, e.g. `integration.tenant`.
    pub field: String,
    /// Human-readable description of what is wrong.
    pub problem: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, problem: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            problem: problem.into(),
        }
    }
}

impl std::fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.problem)
    }
}

/// The unified error type for the benchlink core.
#[derive(Error, Debug)]
pub enum SetupError {
    /// A call against the infrastructure provider failed, during
    /// discovery or while executing a plan.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The merged configuration violated the profile schema.
    #[error("configuration invalid:{summary}")]
    Validation {
        summary: String,
        violations: Vec<FieldViolation>,
    },

    /// The persisted profile exists but cannot be parsed or fails schema
    /// validation. Never silently discarded.
    #[error(
        "profile '{profile}' at {path} is corrupt: {detail}; \
         move the file aside and re-run `benchlink setup`"
    )]
    CorruptProfile {
        profile: String,
        path: PathBuf,
        detail: String,
    },

    /// Another execution already holds the profile, or an unconfirmed
    /// operation is still recorded against it.
    #[error("profile '{profile}' is busy: {detail}")]
    Conflict { profile: String, detail: String },

    /// A long-running provider operation did not reach a terminal state
    /// within the polling budget. The resumability marker is retained.
    #[error(
        "operation {operation_id} still not terminal after {waited_secs}s \
         (last status: {last_status}); re-run to resume polling"
    )]
    OperationTimeout {
        operation_id: String,
        last_status: String,
        waited_secs: u64,
    },

    /// A long-running provider operation reached a terminal failure.
    #[error("operation {operation_id} failed: {last_status}")]
    OperationFailed {
        operation_id: String,
        last_status: String,
    },

    /// The external credential validator rejected the supplied secret.
    #[error("credential rejected: {detail}")]
    InvalidCredential { detail: String },

    /// Local profile storage failed (I/O, permissions, rename).
    #[error("profile storage error at {path}: {message}")]
    Storage {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// The operator declined a required confirmation or interrupted the
    /// run. Always a clean exit with no infrastructure changes attempted
    /// beyond what was already in flight.
    #[error("aborted: {reason}")]
    UserAbort { reason: String },
}

impl SetupError {
    /// Build a validation error from the full set of violations.
    ///
    /// Every violated field is listed so the operator can fix them all in
    /// one pass instead of replaying the command per field.
    pub fn validation(violations: Vec<FieldViolation>) -> Self {
        let mut summary = String::new();
        for violation in &violations {
            let _ = write!(summary, "\n  - {violation}");
        }
        Self::Validation {
            summary,
            violations,
        }
    }

    /// Convenience constructor for a single-field validation error.
    pub fn invalid_field(field: impl Into<String>, problem: impl Into<String>) -> Self {
        Self::validation(vec![FieldViolation::new(field, problem)])
    }

    pub fn conflict(profile: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Conflict {
            profile: profile.into(),
            detail: detail.into(),
        }
    }

    pub fn user_abort(reason: impl Into<String>) -> Self {
        Self::UserAbort {
            reason: reason.into(),
        }
    }

    pub fn storage(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn storage_io(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Exit code contract: 0 success, 1 validation/configuration,
    /// 2 infrastructure/provider, 130 user-interrupted.
    pub fn exit_code(&self) -> i32 {
        match self {
            SetupError::Validation { .. }
            | SetupError::CorruptProfile { .. }
            | SetupError::InvalidCredential { .. }
            | SetupError::Storage { .. } => 1,
            SetupError::Provider(_)
            | SetupError::Conflict { .. }
            | SetupError::OperationTimeout { .. }
            | SetupError::OperationFailed { .. } => 2,
            SetupError::UserAbort { .. } => 130,
        }
    }

    /// True when re-running after fixing the root cause is expected to
    /// succeed without manual cleanup.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SetupError::OperationFailed { .. })
    }
}
