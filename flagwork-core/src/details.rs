//! Resolution and evaluation results

use crate::error::{ErrorCode, EvaluationError};
use crate::value::FlagValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Why a value was resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    Static,
    Default,
    TargetingMatch,
    Split,
    Cached,
    Disabled,
    Unknown,
    Stale,
    Error,
    #[serde(untagged)]
    Other(String),
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Reason::Static => "STATIC",
            Reason::Default => "DEFAULT",
            Reason::TargetingMatch => "TARGETING_MATCH",
            Reason::Split => "SPLIT",
            Reason::Cached => "CACHED",
            Reason::Disabled => "DISABLED",
            Reason::Unknown => "UNKNOWN",
            Reason::Stale => "STALE",
            Reason::Error => "ERROR",
            Reason::Other(other) => other,
        };
        f.write_str(name)
    }
}

/// Scalar entry in flag metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagMetadataValue {
    Bool(bool),
    Number(f64),
    String(String),
}

impl From<bool> for FlagMetadataValue {
    fn from(value: bool) -> Self {
        FlagMetadataValue::Bool(value)
    }
}

impl From<f64> for FlagMetadataValue {
    fn from(value: f64) -> Self {
        FlagMetadataValue::Number(value)
    }
}

impl From<&str> for FlagMetadataValue {
    fn from(value: &str) -> Self {
        FlagMetadataValue::String(value.to_string())
    }
}

impl From<String> for FlagMetadataValue {
    fn from(value: String) -> Self {
        FlagMetadataValue::String(value)
    }
}

/// Provider-supplied metadata about a resolved flag
pub type FlagMetadata = BTreeMap<String, FlagMetadataValue>;

/// What a provider returns for one flag
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionDetails<T = FlagValue> {
    pub value: T,
    pub variant: Option<String>,
    pub reason: Option<Reason>,
    /// Error carried by an otherwise well-formed resolution
    pub error: Option<EvaluationError>,
    pub flag_metadata: FlagMetadata,
}

impl<T> ResolutionDetails<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            variant: None,
            reason: None,
            error: None,
            flag_metadata: FlagMetadata::new(),
        }
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    pub fn with_reason(mut self, reason: Reason) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn with_error(mut self, error: EvaluationError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<FlagMetadataValue>) -> Self {
        self.flag_metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn map_value<U>(self, f: impl FnOnce(T) -> U) -> ResolutionDetails<U> {
        ResolutionDetails {
            value: f(self.value),
            variant: self.variant,
            reason: self.reason,
            error: self.error,
            flag_metadata: self.flag_metadata,
        }
    }
}

/// Result of a provider resolve call
pub type ResolutionResult<T = FlagValue> = Result<ResolutionDetails<T>, EvaluationError>;

/// Public result of an evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationDetails<T = FlagValue> {
    pub flag_key: String,
    pub value: T,
    pub variant: Option<String>,
    pub reason: Option<Reason>,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub flag_metadata: FlagMetadata,
}

impl<T> EvaluationDetails<T> {
    /// Successful details from a provider resolution
    pub fn from_resolution(flag_key: impl Into<String>, resolution: ResolutionDetails<T>) -> Self {
        let (error_code, error_message) = match resolution.error {
            Some(err) => (Some(err.code), Some(err.message)),
            None => (None, None),
        };
        Self {
            flag_key: flag_key.into(),
            value: resolution.value,
            variant: resolution.variant,
            reason: resolution.reason,
            error_code,
            error_message,
            flag_metadata: resolution.flag_metadata,
        }
    }

    /// Error details carrying the default value
    pub fn from_error(flag_key: impl Into<String>, default_value: T, error: EvaluationError) -> Self {
        Self {
            flag_key: flag_key.into(),
            value: default_value,
            variant: None,
            reason: Some(Reason::Error),
            error_code: Some(error.code),
            error_message: Some(error.message),
            flag_metadata: FlagMetadata::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error_code.is_some()
    }

    /// Error carried by these details, if any
    pub fn error(&self) -> Option<EvaluationError> {
        self.error_code.map(|code| {
            EvaluationError::new(code, self.error_message.clone().unwrap_or_default())
        })
    }

    pub fn map_value<U>(self, f: impl FnOnce(T) -> U) -> EvaluationDetails<U> {
        EvaluationDetails {
            flag_key: self.flag_key,
            value: f(self.value),
            variant: self.variant,
            reason: self.reason,
            error_code: self.error_code,
            error_message: self.error_message,
            flag_metadata: self.flag_metadata,
        }
    }
}
