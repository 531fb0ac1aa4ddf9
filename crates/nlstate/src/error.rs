//! Error types for state reconciliation.

use crate::state::AddressParseError;
use crate::verify::VerificationReport;

/// Result type for state operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Structured information about a single validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrorInfo {
    /// Path of the offending field (e.g. `interfaces.eth1.mtu`).
    pub field: String,
    /// Description of the failure.
    pub message: String,
}

impl ValidationErrorInfo {
    /// Create a new validation error record.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Errors that can occur while merging, planning, applying or verifying state.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Desired state is malformed or semantically invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Desired state failed document validation.
    #[error("validation failed: {}", format_validation(.0))]
    Validation(Vec<ValidationErrorInfo>),

    /// The requested combination is deliberately not supported.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Interface not found.
    #[error("interface not found: {name}")]
    InterfaceNotFound {
        /// The interface name that was not found.
        name: String,
    },

    /// The backend failed to apply a plan or to read state.
    #[error("backend error during {operation}: {message}")]
    Backend {
        /// The operation that failed.
        operation: String,
        /// Backend-provided detail.
        message: String,
    },

    /// Observed state did not converge to the target within the window.
    #[error("verification failed ({}): {report}", rollback_note(.rolled_back))]
    Verification {
        /// Differences observed on the last poll.
        report: VerificationReport,
        /// Whether the checkpoint was restored successfully.
        rolled_back: bool,
    },
}

fn rollback_note(rolled_back: &bool) -> &'static str {
    if *rolled_back {
        "rolled back"
    } else {
        "rollback failed"
    }
}

fn format_validation(errors: &[ValidationErrorInfo]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<AddressParseError> for Error {
    fn from(err: AddressParseError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

impl Error {
    /// Create an invalid-argument error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create a not-supported error.
    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::NotSupported(message.into())
    }

    /// Create a backend error with operation context.
    pub fn backend(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Check if the desired state itself was rejected (nothing was applied).
    pub fn is_value_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_)
                | Self::Validation(_)
                | Self::InterfaceNotFound { .. }
                | Self::Json(_)
        )
    }

    /// Check if this is a "deliberately unsupported" error.
    pub fn is_not_supported(&self) -> bool {
        matches!(self, Self::NotSupported(_))
    }

    /// Check if post-apply verification failed.
    pub fn is_verification_failure(&self) -> bool {
        matches!(self, Self::Verification { .. })
    }

    /// Check if the backend reported a failure.
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, Self::Backend { .. })
    }

    /// Check if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::InterfaceNotFound { .. })
    }

    /// Get the verification report if this is a verification failure.
    pub fn verification_report(&self) -> Option<&VerificationReport> {
        match self {
            Self::Verification { report, .. } => Some(report),
            _ => None,
        }
    }
}
