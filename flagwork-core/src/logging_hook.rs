//! Hook that logs every evaluation through `tracing`

use crate::context::EvaluationContext;
use crate::details::EvaluationDetails;
use crate::error::{EvaluationError, HookError};
use crate::hook::{Hook, HookContext, HookData, HookHints};
use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, info, warn};

const STARTED_AT: &str = "started_at";

/// Logs evaluation start, result, failure and duration
#[derive(Debug, Clone, Default)]
pub struct LoggingHook {
    include_context: bool,
}

impl LoggingHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also log the evaluation context (may contain personal data)
    pub fn with_context(mut self) -> Self {
        self.include_context = true;
        self
    }
}

#[async_trait]
impl Hook for LoggingHook {
    fn name(&self) -> &str {
        "logging"
    }

    async fn before(
        &self,
        context: &HookContext,
        data: &mut HookData,
        _hints: &HookHints,
    ) -> Result<Option<EvaluationContext>, HookError> {
        data.set(STARTED_AT, Instant::now());
        if self.include_context {
            debug!(
                flag_key = context.flag_key(),
                flag_type = %context.flag_type(),
                provider = %context.provider_metadata().name,
                domain = ?context.client_metadata().domain,
                context = ?context.context(),
                "→ evaluating flag"
            );
        } else {
            debug!(
                flag_key = context.flag_key(),
                flag_type = %context.flag_type(),
                provider = %context.provider_metadata().name,
                domain = ?context.client_metadata().domain,
                "→ evaluating flag"
            );
        }
        Ok(None)
    }

    async fn after(
        &self,
        context: &HookContext,
        details: &EvaluationDetails,
        _data: &mut HookData,
        _hints: &HookHints,
    ) -> Result<(), HookError> {
        info!(
            flag_key = context.flag_key(),
            value = %details.value,
            variant = ?details.variant,
            reason = ?details.reason,
            "← flag resolved"
        );
        Ok(())
    }

    async fn error(
        &self,
        context: &HookContext,
        error: &EvaluationError,
        _data: &mut HookData,
        _hints: &HookHints,
    ) -> Result<(), HookError> {
        warn!(
            flag_key = context.flag_key(),
            error_code = %error.code,
            default_value = %context.default_value(),
            "← flag evaluation failed: {}",
            error.message
        );
        Ok(())
    }

    async fn finally(
        &self,
        context: &HookContext,
        _details: &EvaluationDetails,
        data: &mut HookData,
        _hints: &HookHints,
    ) -> Result<(), HookError> {
        if let Some(started) = data.get::<Instant>(STARTED_AT) {
            debug!(flag_key = context.flag_key(), duration = ?started.elapsed(), "evaluation finished");
        }
        Ok(())
    }
}
