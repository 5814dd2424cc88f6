//! Multi-provider aggregator
//!
//! [`MultiProvider`] is itself a [`FeatureProvider`], so a group of backends
//! can be bound anywhere a single provider can. Each member is evaluated
//! against its own copy of the call-level hook record and runs its own
//! provider hooks, so a member's `before` hooks never affect another member.

use crate::error::{combine_failures, combine_lifecycle_failures, MultiProviderError};
use crate::status::{GroupState, Member};
use crate::strategy::{FinalResult, MemberContext, MemberResult, RunMode, Strategy};
use async_trait::async_trait;
use flagwork_core::{
    evaluate_hooked, ClientMetadata, EvaluationContext, EvaluationDetails, EventEmitter,
    FeatureProvider, FlagRequest, HookContext, HookHints, ProviderError, ProviderMetadata,
    ProviderStatus, ResolutionDetails, ResolutionResult, ResolveStep, TrackingEventDetails,
};
use futures::future::join_all;
use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, warn};

const DEFAULT_NAME: &str = "multi-provider";

/// A provider to include in a group, optionally under an explicit name
#[derive(Clone)]
pub struct ProviderEntry {
    pub provider: Arc<dyn FeatureProvider>,
    pub name: Option<String>,
}

impl ProviderEntry {
    pub fn new(provider: Arc<dyn FeatureProvider>) -> Self {
        Self {
            provider,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl From<Arc<dyn FeatureProvider>> for ProviderEntry {
    fn from(provider: Arc<dyn FeatureProvider>) -> Self {
        Self::new(provider)
    }
}

/// A member as registered, with its unique name
#[derive(Clone)]
pub struct RegisteredProvider {
    pub name: String,
    pub provider: Arc<dyn FeatureProvider>,
}

impl std::fmt::Debug for RegisteredProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredProvider")
            .field("name", &self.name)
            .field("provider", &self.provider.metadata().name)
            .finish()
    }
}

/// Make names unique: every name used more than once gets `-1`, `-2`, ...
/// in registration order.
fn unique_names(candidates: &[String]) -> Vec<String> {
    let mut totals: HashMap<&str, usize> = HashMap::new();
    for name in candidates {
        *totals.entry(name.as_str()).or_default() += 1;
    }

    let mut taken: HashSet<String> = candidates
        .iter()
        .filter(|n| totals[n.as_str()] == 1)
        .cloned()
        .collect();
    let mut counters: HashMap<&str, usize> = HashMap::new();

    candidates
        .iter()
        .map(|name| {
            if totals[name.as_str()] == 1 {
                return name.clone();
            }
            let counter = counters.entry(name.as_str()).or_default();
            loop {
                *counter += 1;
                let candidate = format!("{}-{}", name, counter);
                if taken.insert(candidate.clone()) {
                    return candidate;
                }
            }
        })
        .collect()
}

/// Resolves one member inside its own hook pipeline
struct MemberStep {
    provider: Arc<dyn FeatureProvider>,
}

#[async_trait]
impl ResolveStep for MemberStep {
    async fn resolve(&self, record: &HookContext, hints: &HookHints) -> ResolutionResult {
        let request = FlagRequest::from_hook_context(record, hints);
        self.provider.resolve(&request).await
    }
}

fn into_resolution(details: EvaluationDetails) -> ResolutionResult {
    if let Some(error) = details.error() {
        return Err(error);
    }
    Ok(ResolutionDetails {
        value: details.value,
        variant: details.variant,
        reason: details.reason,
        error: None,
        flag_metadata: details.flag_metadata,
    })
}

/// Group of providers combined by a [`Strategy`]
pub struct MultiProvider {
    metadata: ProviderMetadata,
    state: Arc<GroupState>,
    strategy: Arc<dyn Strategy>,
}

impl MultiProvider {
    pub fn new<S>(entries: Vec<ProviderEntry>, strategy: S) -> Result<Self, MultiProviderError>
    where
        S: Strategy + 'static,
    {
        Self::with_strategy(entries, Arc::new(strategy))
    }

    pub fn with_strategy(
        entries: Vec<ProviderEntry>,
        strategy: Arc<dyn Strategy>,
    ) -> Result<Self, MultiProviderError> {
        if entries.is_empty() {
            return Err(MultiProviderError::EmptyProviders);
        }

        let candidates: Vec<String> = entries
            .iter()
            .map(|e| {
                e.name
                    .clone()
                    .unwrap_or_else(|| e.provider.metadata().name.clone())
            })
            .collect();
        let names = unique_names(&candidates);

        let mut metadata = ProviderMetadata::new(DEFAULT_NAME);
        let members: Vec<Member> = names
            .into_iter()
            .zip(entries)
            .map(|(name, entry)| {
                metadata
                    .members
                    .insert(name.clone(), entry.provider.metadata().clone());
                Member::new(name, entry.provider)
            })
            .collect();

        Ok(Self {
            state: GroupState::new(metadata.name.clone(), members),
            metadata,
            strategy,
        })
    }

    /// Members in registration order
    pub fn provider_entries(&self) -> Vec<RegisteredProvider> {
        self.state
            .members
            .iter()
            .map(|m| RegisteredProvider {
                name: m.name.clone(),
                provider: m.provider.clone(),
            })
            .collect()
    }

    /// Derived group status
    pub fn status(&self) -> ProviderStatus {
        self.state.status()
    }

    /// Current status of one member
    pub fn member_status(&self, name: &str) -> Option<ProviderStatus> {
        self.state
            .members
            .iter()
            .find(|m| m.name == name)
            .map(|m| m.tracker.status())
    }

    fn member_context<'a>(member: &'a Member) -> MemberContext<'a> {
        MemberContext {
            provider_name: &member.name,
            provider: &member.provider,
            status: member.tracker.status(),
        }
    }

    async fn evaluate_member(
        &self,
        member: &Member,
        base: &HookContext,
        hints: &HookHints,
    ) -> MemberResult {
        let record = base.for_provider(member.provider.metadata().clone());
        let hooks = member.provider.hooks();
        let step = MemberStep {
            provider: member.provider.clone(),
        };
        let details = evaluate_hooked(record, &hooks, hints, &step).await;
        MemberResult {
            provider_name: member.name.clone(),
            provider: member.provider.clone(),
            result: into_resolution(details),
        }
    }

    /// Apply per-member lifecycle outcomes and fold their failures
    fn settle(
        &self,
        operation: &str,
        outcomes: Vec<(usize, Result<(), ProviderError>)>,
    ) -> Result<(), ProviderError> {
        let mut failures = Vec::new();
        for (index, outcome) in outcomes {
            let member = &self.state.members[index];
            match outcome {
                Ok(()) => {
                    member.tracker.set(ProviderStatus::Ready);
                }
                Err(e) => {
                    warn!(provider = %member.name, "Member {} failed: {}", operation, e);
                    member.tracker.set(if e.is_fatal() {
                        ProviderStatus::Fatal
                    } else {
                        ProviderStatus::Error
                    });
                    failures.push((member.name.clone(), e));
                }
            }
        }
        self.state.refresh(None);
        match combine_lifecycle_failures(operation, failures) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for MultiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiProvider")
            .field("members", &self.provider_entries())
            .field("status", &self.status())
            .finish()
    }
}

#[async_trait]
impl FeatureProvider for MultiProvider {
    fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    async fn initialize(&self, context: &EvaluationContext) -> Result<(), ProviderError> {
        let outcomes = join_all(self.state.members.iter().enumerate().map(|(index, member)| async move {
            let outcome = AssertUnwindSafe(member.provider.initialize(context))
                .catch_unwind()
                .await;
            let outcome = outcome.unwrap_or_else(|_| {
                Err(ProviderError::General("initialization panicked".into()))
            });
            (index, outcome)
        }))
        .await;
        self.settle("initialization", outcomes)
    }

    async fn on_context_changed(
        &self,
        old_context: &EvaluationContext,
        new_context: &EvaluationContext,
    ) -> Result<(), ProviderError> {
        let outcomes = join_all(self.state.members.iter().enumerate().map(|(index, member)| async move {
            let outcome = AssertUnwindSafe(member.provider.on_context_changed(old_context, new_context))
                .catch_unwind()
                .await;
            let outcome = outcome.unwrap_or_else(|_| {
                Err(ProviderError::General("context change panicked".into()))
            });
            (index, outcome)
        }))
        .await;
        self.settle("context change", outcomes)
    }

    async fn shutdown(&self) -> Result<(), ProviderError> {
        self.state.detach();
        let outcomes = join_all(self.state.members.iter().map(|member| async move {
            (member.name.clone(), member.provider.shutdown().await)
        }))
        .await;

        let failures: Vec<(String, ProviderError)> = outcomes
            .into_iter()
            .filter_map(|(name, outcome)| outcome.err().map(|e| (name, e)))
            .collect();
        for (name, e) in &failures {
            error!(provider = %name, "Member shutdown failed: {}", e);
        }
        match combine_lifecycle_failures("shutdown", failures) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Broadcast to every usable member the strategy approves
    fn track(
        &self,
        event_name: &str,
        context: &EvaluationContext,
        details: &TrackingEventDetails,
    ) -> Result<(), ProviderError> {
        for member in &self.state.members {
            let view = Self::member_context(member);
            if !view.status.is_usable()
                || !self.strategy.should_track_with_this_provider(&view, event_name)
            {
                continue;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                member.provider.track(event_name, context, details)
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(provider = %member.name, event = event_name, "Member tracking failed: {}", e)
                }
                Err(_) => {
                    error!(provider = %member.name, event = event_name, "Member tracking panicked")
                }
            }
        }
        Ok(())
    }

    fn events(&self) -> Option<&EventEmitter> {
        Some(&self.state.events)
    }

    async fn resolve(&self, request: &FlagRequest<'_>) -> ResolutionResult {
        let base = match request.hook_context {
            Some(record) => record.clone(),
            None => HookContext::new(
                request.flag_key,
                request.flag_type,
                request.default_value.clone(),
                request.context.clone(),
                ClientMetadata::default(),
                self.metadata.clone(),
            ),
        };
        let no_hints = HookHints::new();
        let hints = request.hints.unwrap_or(&no_hints);
        let flag_key = request.flag_key;

        let results = match self.strategy.run_mode() {
            RunMode::Sequential => {
                let mut results = Vec::new();
                for member in &self.state.members {
                    let view = Self::member_context(member);
                    if !self.strategy.should_evaluate_this_provider(&view, flag_key) {
                        continue;
                    }
                    let result = self.evaluate_member(member, &base, hints).await;
                    let next = self
                        .strategy
                        .should_evaluate_next_provider(&view, &result.result);
                    results.push(result);
                    if !next {
                        break;
                    }
                }
                results
            }
            RunMode::Parallel => {
                let eligible = self.state.members.iter().filter(|member| {
                    self.strategy
                        .should_evaluate_this_provider(&Self::member_context(member), flag_key)
                });
                join_all(eligible.map(|member| self.evaluate_member(member, &base, hints))).await
            }
        };

        match self.strategy.determine_final_result(flag_key, &results) {
            FinalResult::Resolved {
                provider_name,
                details,
            } => {
                debug!(flag_key = flag_key, provider = %provider_name, "Flag resolved by member");
                Ok(details)
            }
            FinalResult::Failed(failures) => Err(combine_failures(flag_key, &failures)),
        }
    }
}
