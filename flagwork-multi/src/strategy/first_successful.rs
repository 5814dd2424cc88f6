//! First successful: the first member that resolves without error decides.

use super::{FinalResult, MemberContext, MemberResult, RunMode, Strategy};
use flagwork_core::ResolutionResult;

/// Tries members in order until one succeeds; fails with every collected
/// error when none does.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstSuccessfulStrategy;

impl FirstSuccessfulStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Strategy for FirstSuccessfulStrategy {
    fn run_mode(&self) -> RunMode {
        RunMode::Sequential
    }

    fn should_evaluate_next_provider(
        &self,
        _member: &MemberContext<'_>,
        result: &ResolutionResult,
    ) -> bool {
        result.is_err()
    }

    fn determine_final_result(&self, _flag_key: &str, results: &[MemberResult]) -> FinalResult {
        results
            .iter()
            .find(|r| r.result.is_ok())
            .map(FinalResult::from_member)
            .unwrap_or_else(|| FinalResult::collect_failures(results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flagwork_core::{
        EvaluationError, FeatureProvider, FlagValue, NoopProvider, ResolutionDetails,
    };
    use std::sync::Arc;

    fn result(name: &str, result: ResolutionResult) -> MemberResult {
        MemberResult {
            provider_name: name.to_string(),
            provider: Arc::new(NoopProvider::new()) as Arc<dyn FeatureProvider>,
            result,
        }
    }

    #[test]
    fn test_skips_errors_until_success() {
        let results = [
            result("a", Err(EvaluationError::general("down"))),
            result("b", Ok(ResolutionDetails::new(FlagValue::from("blue")))),
        ];
        assert_eq!(
            FirstSuccessfulStrategy::new().determine_final_result("f", &results),
            FinalResult::Resolved {
                provider_name: "b".into(),
                details: ResolutionDetails::new(FlagValue::from("blue")),
            }
        );
    }

    #[test]
    fn test_no_success_fails_with_all_errors() {
        let results = [
            result("a", Err(EvaluationError::general("down"))),
            result("b", Err(EvaluationError::flag_not_found("f"))),
        ];
        match FirstSuccessfulStrategy::new().determine_final_result("f", &results) {
            FinalResult::Failed(failures) => {
                assert_eq!(failures[0].provider_name, "a");
                assert_eq!(failures[1].provider_name, "b");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
