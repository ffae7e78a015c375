//! Error types for the tutoring engine.
//!
//! This module defines the error hierarchy for every engine operation,
//! including configuration loading, remote calls to the generation service,
//! response decoding, and session state transitions.

use std::path::PathBuf;

/// A specialized `Result` type for tutoring engine operations.
pub type Result<T> = std::result::Result<T, TutorError>;

/// Status codes that are retried before being reported.
pub const RETRYABLE_STATUSES: [u16; 2] = [429, 503];

/// Returns `true` if the given HTTP status is retried by the client.
#[must_use]
pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUSES.contains(&status)
}

/// Errors that can occur while running a tutoring session.
///
/// Remote failures keep the shape the presentation layer needs to pick a
/// recovery action: `NetworkError` when the server was never reached,
/// `ApiError` when it answered with a failure status.
#[derive(Debug, thiserror::Error)]
pub enum TutorError {
    // ========================================================================
    // Remote Call Errors
    // ========================================================================
    /// The transport never reached the server (connection refused, DNS,
    /// timeout) and every retry was used up.
    #[error("Network error after {attempts} attempt(s): {message}\n\nSuggestion: {}", FailureKind::Transient.suggestion())]
    NetworkError {
        /// Description of the last transport failure.
        message: String,
        /// Number of attempts made, including the first.
        attempts: u32,
    },

    /// The server responded with a non-2xx status.
    ///
    /// 429 and 503 only surface here once retries are exhausted.
    #[error("API error ({status}): {message}")]
    ApiError {
        /// HTTP status code returned by the server.
        status: u16,
        /// Server-provided message (`detail`), or `HTTP <status>`.
        message: String,
        /// Server-provided error code (`error`), if any.
        code: Option<String>,
    },

    // ========================================================================
    // Defects
    // ========================================================================
    /// The server response had an unexpected or invalid shape.
    #[error("Protocol error: {message}")]
    ProtocolError {
        /// Description of what was wrong with the response.
        message: String,
    },

    /// A session invariant was broken by the caller.
    #[error("Invariant violation: {message}")]
    InvariantViolation {
        /// Description of the broken invariant.
        message: String,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your tutor.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },
}

/// Classification of a failure, used to pick a recovery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Expected to succeed on a later attempt (network, 429, 503).
    Transient,
    /// Retrying cannot fix it.
    Permanent,
    /// The server sent something the client does not understand.
    Protocol,
    /// The caller broke a session invariant.
    InvariantViolation,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
            Self::Protocol => write!(f, "protocol"),
            Self::InvariantViolation => write!(f, "invariant_violation"),
        }
    }
}

impl FailureKind {
    /// Returns a suggestion message for this failure kind.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::Transient => "Check your connection and retry, or continue offline",
            Self::Permanent => "Retry the request; if it keeps failing, check the service configuration",
            Self::Protocol => "The tutoring service sent an unexpected response; report this issue",
            Self::InvariantViolation => "Start a new problem to continue",
        }
    }
}

/// What the presentation layer should offer after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Offer a retry button.
    Retry,
    /// Offer a retry button plus switching to offline mode.
    RetryOrGoOffline,
    /// Not recoverable by the learner; log and show a generic failure.
    Report,
}

impl TutorError {
    /// Creates a new `NetworkError`.
    #[must_use]
    pub fn network(message: impl Into<String>, attempts: u32) -> Self {
        Self::NetworkError {
            message: message.into(),
            attempts,
        }
    }

    /// Creates a new `ApiError` without an error code.
    #[must_use]
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
            code: None,
        }
    }

    /// Creates a new `ProtocolError`.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolError {
            message: message.into(),
        }
    }

    /// Creates a new `InvariantViolation` and logs it.
    #[must_use]
    pub fn invariant(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(%message, "Session invariant violated");
        Self::InvariantViolation { message }
    }

    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Classifies this error.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NetworkError { .. } => FailureKind::Transient,
            Self::ApiError { status, .. } if is_retryable_status(*status) => {
                FailureKind::Transient
            }
            Self::ApiError { .. } | Self::ConfigParseError { .. } | Self::ConfigValidationError { .. } => {
                FailureKind::Permanent
            }
            Self::ProtocolError { .. } => FailureKind::Protocol,
            Self::InvariantViolation { .. } => FailureKind::InvariantViolation,
        }
    }

    /// Returns `true` if this error means the service is unreachable or
    /// overloaded, as opposed to rejecting the request.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind() == FailureKind::Transient
    }

    /// Returns `true` if this error is a defect rather than a runtime
    /// condition the learner can act on.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            FailureKind::Protocol | FailureKind::InvariantViolation
        ) || matches!(
            self,
            Self::ConfigParseError { .. } | Self::ConfigValidationError { .. }
        )
    }

    /// Returns the recovery action the caller should offer.
    #[must_use]
    pub fn recovery(&self) -> RecoveryAction {
        if self.is_fatal() {
            RecoveryAction::Report
        } else if self.is_transient() {
            RecoveryAction::RetryOrGoOffline
        } else {
            RecoveryAction::Retry
        }
    }

    /// Returns the learner-facing message for this error.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NetworkError { .. } => {
                "Unable to connect to the server. Please check your internet connection and try again."
            }
            Self::ApiError { status: 503, .. } => {
                "The service is temporarily unavailable. Please try again in a few moments."
            }
            Self::ApiError { status: 429, .. } => {
                "Too many requests. Please wait a moment before trying again."
            }
            Self::ApiError { .. } => "The request failed. Please try again.",
            Self::InvariantViolation { .. } => {
                "This action is not available right now. Start a new problem to continue."
            }
            _ => "An unexpected error occurred. Please try again.",
        }
    }
}
