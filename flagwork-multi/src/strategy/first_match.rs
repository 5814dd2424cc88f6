//! First match: the first member that knows the flag decides.

use super::{FinalResult, MemberContext, MemberResult, RunMode, Strategy};
use flagwork_core::{ErrorCode, ResolutionResult};

/// Tries members in order, moving on only when a member reports
/// `FLAG_NOT_FOUND`. Any other error ends the search with that error.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstMatchStrategy;

impl FirstMatchStrategy {
    pub fn new() -> Self {
        Self
    }
}

fn is_not_found(result: &ResolutionResult) -> bool {
    matches!(result, Err(e) if e.code == ErrorCode::FlagNotFound)
}

impl Strategy for FirstMatchStrategy {
    fn run_mode(&self) -> RunMode {
        RunMode::Sequential
    }

    fn should_evaluate_next_provider(
        &self,
        _member: &MemberContext<'_>,
        result: &ResolutionResult,
    ) -> bool {
        is_not_found(result)
    }

    fn determine_final_result(&self, _flag_key: &str, results: &[MemberResult]) -> FinalResult {
        match results.last() {
            Some(last) if !is_not_found(&last.result) => FinalResult::from_member(last),
            _ => FinalResult::collect_failures(results),
        }
    }
}
