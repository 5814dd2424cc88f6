// Error types for multi-provider groups

use flagwork_core::{ErrorCode, EvaluationError, ProviderError};
use thiserror::Error;

/// Construction faults
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MultiProviderError {
    #[error("a multi-provider needs at least one member provider")]
    EmptyProviders,
}

/// One member's failure within a group evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderFailure {
    pub provider_name: String,
    pub error: EvaluationError,
}

impl ProviderFailure {
    pub fn new(provider_name: impl Into<String>, error: EvaluationError) -> Self {
        Self {
            provider_name: provider_name.into(),
            error,
        }
    }
}

/// Fold member failures into the error returned by the group.
///
/// A lone failure keeps its own code, as do failures that all share one
/// code; anything else is `GENERAL` listing every member's error.
pub(crate) fn combine_failures(flag_key: &str, failures: &[ProviderFailure]) -> EvaluationError {
    match failures {
        [] => EvaluationError::general(format!("no provider resolved flag '{}'", flag_key)),
        [only] => only.error.clone(),
        [first, rest @ ..] => {
            let code = if rest.iter().all(|f| f.error.code == first.error.code) {
                first.error.code
            } else {
                ErrorCode::General
            };
            let listing: Vec<String> = failures
                .iter()
                .map(|f| format!("{}: {}", f.provider_name, f.error))
                .collect();
            EvaluationError::new(
                code,
                format!("all providers failed for flag '{}': {}", flag_key, listing.join("; ")),
            )
        }
    }
}

/// Fold member lifecycle failures into one provider error; fatal if any is
pub(crate) fn combine_lifecycle_failures(
    operation: &str,
    failures: Vec<(String, ProviderError)>,
) -> Option<ProviderError> {
    if failures.is_empty() {
        return None;
    }
    let fatal = failures.iter().any(|(_, e)| e.is_fatal());
    let listing: Vec<String> = failures
        .iter()
        .map(|(name, e)| format!("{}: {}", name, e))
        .collect();
    let message = format!("{} failed for {}", operation, listing.join("; "));
    Some(if fatal {
        ProviderError::Fatal(message)
    } else {
        ProviderError::General(message)
    })
}
