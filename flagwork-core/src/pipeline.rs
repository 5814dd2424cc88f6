//! Hook pipeline
//!
//! Runs the four hook stages around one provider call with strict ordering:
//! no stage starts before every hook of the previous stage has settled.
//!
//! Hook order is global, client, invocation, provider for `before`, and the
//! reverse for `after`, `error` and `finally`. A failing `before` hook aborts
//! the rest of `before` and the provider call. Failures in the other stages
//! are logged per hook and never stop sibling hooks; a failed `after` stage
//! is reported through `error` once every `after` hook has run.

use crate::details::{EvaluationDetails, ResolutionResult};
use crate::error::{ErrorCode, EvaluationError, HookError};
use crate::event::panic_message;
use crate::hook::{Hook, HookContext, HookDataArena, HookHints};
use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, warn};

/// The provider call wrapped by the pipeline
#[async_trait]
pub trait ResolveStep: Send + Sync {
    /// Resolve the flag described by the (post-`before`) record
    async fn resolve(&self, record: &HookContext, hints: &HookHints) -> ResolutionResult;
}

/// Ordered hooks for one evaluation
pub struct HookPipeline<'a> {
    hooks: &'a [Arc<dyn Hook>],
    hints: &'a HookHints,
}

impl<'a> HookPipeline<'a> {
    pub fn new(hooks: &'a [Arc<dyn Hook>], hints: &'a HookHints) -> Self {
        Self { hooks, hints }
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run `before` hooks in order, merging each returned context
    pub async fn before(
        &self,
        record: &mut HookContext,
        arena: &mut HookDataArena,
    ) -> Result<(), EvaluationError> {
        for (hook, data) in self.hooks.iter().zip(arena.slots_mut()) {
            let outcome = contained(hook.before(record, data, self.hints)).await;
            match outcome {
                Ok(Some(layer)) => record.merge_context(&layer),
                Ok(None) => {}
                Err(e) => {
                    warn!(hook = hook.name(), flag_key = record.flag_key(), "before hook failed: {}", e);
                    return Err(EvaluationError::new(ErrorCode::General, e.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Run `after` hooks in reverse order; returns the first failure
    pub async fn after(
        &self,
        record: &HookContext,
        details: &EvaluationDetails,
        arena: &mut HookDataArena,
    ) -> Result<(), EvaluationError> {
        let mut first_failure = None;
        for (hook, data) in self.hooks.iter().zip(arena.slots_mut()).rev() {
            if let Err(e) = contained(hook.after(record, details, data, self.hints)).await {
                warn!(hook = hook.name(), flag_key = record.flag_key(), "after hook failed: {}", e);
                first_failure.get_or_insert(e);
            }
        }
        match first_failure {
            Some(e) => Err(EvaluationError::new(ErrorCode::General, e.to_string())),
            None => Ok(()),
        }
    }

    /// Run `error` hooks in reverse order
    pub async fn error(
        &self,
        record: &HookContext,
        failure: &EvaluationError,
        arena: &mut HookDataArena,
    ) {
        for (hook, data) in self.hooks.iter().zip(arena.slots_mut()).rev() {
            if let Err(e) = contained(hook.error(record, failure, data, self.hints)).await {
                error!(hook = hook.name(), flag_key = record.flag_key(), "error hook failed: {}", e);
            }
        }
    }

    /// Run `finally` hooks in reverse order
    pub async fn finally(
        &self,
        record: &HookContext,
        details: &EvaluationDetails,
        arena: &mut HookDataArena,
    ) {
        for (hook, data) in self.hooks.iter().zip(arena.slots_mut()).rev() {
            if let Err(e) = contained(hook.finally(record, details, data, self.hints)).await {
                error!(hook = hook.name(), flag_key = record.flag_key(), "finally hook failed: {}", e);
            }
        }
    }
}

/// Await a hook stage, converting a panic into a hook error
async fn contained<T, F>(stage: F) -> Result<T, HookError>
where
    F: Future<Output = Result<T, HookError>>,
{
    AssertUnwindSafe(stage)
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(HookError::new(format!("panicked: {}", panic_message(&panic)))))
}

/// Evaluate one flag: `before` hooks, the resolve step, then `after`/`error`
/// and `finally`.
///
/// Never fails: every fault becomes error details carrying the default value.
pub async fn evaluate_hooked(
    mut record: HookContext,
    hooks: &[Arc<dyn Hook>],
    hints: &HookHints,
    step: &dyn ResolveStep,
) -> EvaluationDetails {
    let pipeline = HookPipeline::new(hooks, hints);
    let mut arena = HookDataArena::new(hooks.len());

    let details = match pipeline.before(&mut record, &mut arena).await {
        Ok(()) => {
            let resolved = AssertUnwindSafe(step.resolve(&record, hints))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(EvaluationError::general(format!(
                        "provider panicked: {}",
                        panic_message(&panic)
                    )))
                });
            match normalize(&record, resolved) {
                Ok(details) => match pipeline.after(&record, &details, &mut arena).await {
                    Ok(()) => details,
                    Err(err) => {
                        pipeline.error(&record, &err, &mut arena).await;
                        error_details(&record, err)
                    }
                },
                Err(err) => {
                    pipeline.error(&record, &err, &mut arena).await;
                    error_details(&record, err)
                }
            }
        }
        Err(err) => {
            pipeline.error(&record, &err, &mut arena).await;
            error_details(&record, err)
        }
    };

    pipeline.finally(&record, &details, &mut arena).await;
    details
}

/// Fold error-valued resolutions and type mismatches into errors
fn normalize(record: &HookContext, resolved: ResolutionResult) -> Result<EvaluationDetails, EvaluationError> {
    let mut resolution = resolved?;
    if let Some(err) = resolution.error.take() {
        return Err(err);
    }
    let actual = resolution.value.flag_type();
    if actual != record.flag_type() {
        return Err(EvaluationError::new(
            ErrorCode::TypeMismatch,
            format!(
                "flag '{}' resolved to a {} value, expected {}",
                record.flag_key(),
                actual,
                record.flag_type()
            ),
        ));
    }
    Ok(EvaluationDetails::from_resolution(record.flag_key(), resolution))
}

fn error_details(record: &HookContext, err: EvaluationError) -> EvaluationDetails {
    EvaluationDetails::from_error(record.flag_key(), record.default_value().clone(), err)
}
