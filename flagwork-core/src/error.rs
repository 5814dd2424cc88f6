// Error types for the Flagwork engine

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Error codes carried by failed resolutions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ProviderNotReady,
    ProviderFatal,
    FlagNotFound,
    ParseError,
    TypeMismatch,
    TargetingKeyMissing,
    InvalidContext,
    Timeout,
    General,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ProviderNotReady => "PROVIDER_NOT_READY",
            ErrorCode::ProviderFatal => "PROVIDER_FATAL",
            ErrorCode::FlagNotFound => "FLAG_NOT_FOUND",
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::TypeMismatch => "TYPE_MISMATCH",
            ErrorCode::TargetingKeyMissing => "TARGETING_KEY_MISSING",
            ErrorCode::InvalidContext => "INVALID_CONTEXT",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::General => "GENERAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolution failure reported by a provider or produced by the engine.
///
/// Never surfaces to the caller of an evaluation; it is folded into the
/// returned details together with the default value.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code}: {message}")]
pub struct EvaluationError {
    pub code: ErrorCode,
    pub message: String,
}

impl EvaluationError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn general(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::General, message)
    }

    pub fn flag_not_found(flag_key: &str) -> Self {
        Self::new(
            ErrorCode::FlagNotFound,
            format!("flag '{}' not found", flag_key),
        )
    }
}

/// Provider lifecycle failure (initialization, context change, shutdown)
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("{0}")]
    General(String),

    #[error("fatal provider error: {0}")]
    Fatal(String),

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

impl ProviderError {
    /// Whether the failure disables the provider permanently
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProviderError::Fatal(_))
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            ProviderError::General(_) => ErrorCode::General,
            ProviderError::Fatal(_) => ErrorCode::ProviderFatal,
            ProviderError::InvalidContext(_) => ErrorCode::InvalidContext,
        }
    }
}

/// Failure raised by a hook stage
#[derive(Debug, Clone, PartialEq, Error)]
#[error("hook failed: {0}")]
pub struct HookError(pub String);

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Failure raised by an event handler
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EventHandlerError {
    #[error("Handler failed: {0}")]
    HandlerFailed(String),

    #[error("Handler panicked: {0}")]
    Panicked(String),
}

/// Outcome of the timeout/cancellation guard losing the race
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),
}

impl GuardError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            GuardError::Cancelled => ErrorCode::General,
            GuardError::TimedOut(_) => ErrorCode::Timeout,
        }
    }
}

impl From<GuardError> for EvaluationError {
    fn from(err: GuardError) -> Self {
        let message = match &err {
            GuardError::Cancelled => "flag evaluation cancelled".to_string(),
            GuardError::TimedOut(d) => {
                format!("flag evaluation timed out after {}ms", d.as_millis())
            }
        };
        EvaluationError::new(err.error_code(), message)
    }
}

/// Errors returned by fallible API operations
#[derive(Debug, Error)]
pub enum Error {
    #[error("provider '{provider}' failed to initialize: {source}")]
    Initialization {
        provider: String,
        #[source]
        source: ProviderError,
    },

    #[error("provider '{provider}' initialization aborted: {source}")]
    InitializationAborted {
        provider: String,
        #[source]
        source: GuardError,
    },

    #[error("provider '{provider}' failed to shut down: {source}")]
    Shutdown {
        provider: String,
        #[source]
        source: ProviderError,
    },

    #[error("context change rejected by provider '{provider}': {source}")]
    ContextChange {
        provider: String,
        #[source]
        source: ProviderError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
