//! Comparison: every member must agree.
//!
//! All eligible members are evaluated concurrently. When every member
//! resolves to the same value, that value is returned. When any two
//! disagree, the fallback member's result is returned and the mismatch
//! handler receives every member's result. Any member error fails the
//! evaluation.

use super::{FinalResult, MemberResult, RunMode, Strategy};
use flagwork_core::FeatureProvider;
use std::sync::Arc;
use tracing::warn;

/// Callback invoked with every member result when members disagree
pub type MismatchHandler = Arc<dyn Fn(&[MemberResult]) + Send + Sync>;

/// Parallel strategy requiring unanimous agreement
#[derive(Clone, Default)]
pub struct ComparisonStrategy {
    fallback: Option<Arc<dyn FeatureProvider>>,
    on_mismatch: Option<MismatchHandler>,
}

impl ComparisonStrategy {
    /// Strategy whose fallback is the first member consulted
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this provider instance's result on disagreement
    pub fn with_fallback(mut self, provider: Arc<dyn FeatureProvider>) -> Self {
        self.fallback = Some(provider);
        self
    }

    pub fn with_mismatch_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&[MemberResult]) + Send + Sync + 'static,
    {
        self.on_mismatch = Some(Arc::new(handler));
        self
    }

    fn is_fallback(&self, result: &MemberResult) -> bool {
        self.fallback
            .as_ref()
            .is_some_and(|f| std::ptr::addr_eq(Arc::as_ptr(f), Arc::as_ptr(&result.provider)))
    }
}

impl std::fmt::Debug for ComparisonStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComparisonStrategy")
            .field(
                "fallback",
                &self.fallback.as_ref().map(|p| p.metadata().name.clone()),
            )
            .field("on_mismatch", &self.on_mismatch.is_some())
            .finish()
    }
}

impl Strategy for ComparisonStrategy {
    fn run_mode(&self) -> RunMode {
        RunMode::Parallel
    }

    fn determine_final_result(&self, flag_key: &str, results: &[MemberResult]) -> FinalResult {
        if results.iter().any(|r| r.result.is_err()) {
            return FinalResult::collect_failures(results);
        }
        let Some(first) = results.first() else {
            return FinalResult::Failed(Vec::new());
        };

        let agreed = results
            .iter()
            .all(|r| matches!((&r.result, &first.result), (Ok(a), Ok(b)) if a.value == b.value));
        if agreed {
            return FinalResult::from_member(first);
        }

        warn!(
            flag_key = flag_key,
            providers = results.len(),
            "Providers disagree on flag value"
        );
        if let Some(handler) = &self.on_mismatch {
            handler(results);
        }
        let chosen = results.iter().find(|r| self.is_fallback(r)).unwrap_or(first);
        FinalResult::from_member(chosen)
    }
}
