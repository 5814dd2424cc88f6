//! Resolution strategies
//!
//! A [`Strategy`] decides which members of a group are consulted, in what
//! order, and how their results combine into one answer.
//!
//! - [`FirstMatchStrategy`] - sequential; moves on only past `FLAG_NOT_FOUND`
//! - [`FirstSuccessfulStrategy`] - sequential; moves on past any error
//! - [`ComparisonStrategy`] - parallel; requires unanimous agreement

pub mod comparison;
pub mod first_match;
pub mod first_successful;

pub use comparison::{ComparisonStrategy, MismatchHandler};
pub use first_match::FirstMatchStrategy;
pub use first_successful::FirstSuccessfulStrategy;

use crate::error::ProviderFailure;
use flagwork_core::{FeatureProvider, ProviderStatus, ResolutionDetails, ResolutionResult};
use std::sync::Arc;

/// How members are invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// One at a time in registration order, stopping when the strategy says so
    Sequential,
    /// All eligible members concurrently; results are buffered in
    /// registration order before the final decision
    Parallel,
}

/// A member as seen by a strategy
#[derive(Clone, Copy)]
pub struct MemberContext<'a> {
    pub provider_name: &'a str,
    pub provider: &'a Arc<dyn FeatureProvider>,
    pub status: ProviderStatus,
}

/// One member's outcome for one flag
#[derive(Clone)]
pub struct MemberResult {
    pub provider_name: String,
    pub provider: Arc<dyn FeatureProvider>,
    pub result: ResolutionResult,
}

impl std::fmt::Debug for MemberResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemberResult")
            .field("provider_name", &self.provider_name)
            .field("result", &self.result)
            .finish()
    }
}

impl MemberResult {
    fn failure(&self) -> Option<ProviderFailure> {
        self.result
            .as_ref()
            .err()
            .map(|e| ProviderFailure::new(&self.provider_name, e.clone()))
    }
}

/// Outcome of a strategy's final decision
#[derive(Debug, Clone, PartialEq)]
pub enum FinalResult {
    Resolved {
        provider_name: String,
        details: ResolutionDetails,
    },
    Failed(Vec<ProviderFailure>),
}

impl FinalResult {
    /// Final result mirroring one member's outcome
    pub fn from_member(result: &MemberResult) -> Self {
        match &result.result {
            Ok(details) => FinalResult::Resolved {
                provider_name: result.provider_name.clone(),
                details: details.clone(),
            },
            Err(e) => FinalResult::Failed(vec![ProviderFailure::new(
                &result.provider_name,
                e.clone(),
            )]),
        }
    }

    /// Failure listing every member error among the results
    pub fn collect_failures(results: &[MemberResult]) -> Self {
        FinalResult::Failed(results.iter().filter_map(MemberResult::failure).collect())
    }
}

/// Policy combining member results
pub trait Strategy: Send + Sync {
    fn run_mode(&self) -> RunMode;

    /// Whether to consult a member at all
    fn should_evaluate_this_provider(&self, member: &MemberContext<'_>, _flag_key: &str) -> bool {
        member.status.is_usable()
    }

    /// Sequential mode: whether to continue after a member's result
    fn should_evaluate_next_provider(
        &self,
        _member: &MemberContext<'_>,
        _result: &ResolutionResult,
    ) -> bool {
        true
    }

    /// Whether a tracking event is forwarded to a member
    fn should_track_with_this_provider(&self, member: &MemberContext<'_>, _event_name: &str) -> bool {
        member.status.is_usable()
    }

    /// Combine the results of every member consulted, in registration order
    fn determine_final_result(&self, flag_key: &str, results: &[MemberResult]) -> FinalResult;
}
