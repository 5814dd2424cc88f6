//! Evaluation client
//!
//! A [`Client`] evaluates flags against the provider bound to its domain
//! (or the default provider). Each evaluation merges contexts in order
//! global, domain, client, invocation; runs hooks in order API, client,
//! invocation, provider; and never fails. Faults come back as
//! [`EvaluationDetails`] carrying the caller's default value.

use crate::context::{merge, EvaluationContext};
use crate::details::{EvaluationDetails, ResolutionResult};
use crate::error::{ErrorCode, EvaluationError};
use crate::event::{panic_message, EventEmitter, ProviderEventType, SharedEventHandler};
use crate::guard::EvaluationGuard;
use crate::hook::{Hook, HookContext, HookHints};
use crate::pipeline::{evaluate_hooked, ResolveStep};
use crate::provider::{FlagRequest, Paradigm, TrackingEventDetails};
use crate::registry::{ApiInner, ProviderEntry};
use crate::status::ProviderStatus;
use crate::value::FlagValueType;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Identity of a client, visible to hooks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientMetadata {
    pub domain: Option<String>,
    pub version: Option<String>,
}

/// Per-invocation settings
#[derive(Clone, Default)]
pub struct EvaluationOptions {
    /// Hooks for this evaluation only, run after API and client hooks
    pub hooks: Vec<Arc<dyn Hook>>,
    pub hook_hints: HookHints,
    /// Deadline; overrides the registry default
    pub timeout: Option<Duration>,
    pub cancellation: Option<CancellationToken>,
}

impl EvaluationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hook(mut self, hook: Arc<dyn Hook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn with_hint(mut self, key: impl Into<String>, value: impl Into<crate::value::Value>) -> Self {
        self.hook_hints.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

impl std::fmt::Debug for EvaluationOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationOptions")
            .field("hooks", &self.hooks.len())
            .field("hook_hints", &self.hook_hints)
            .field("timeout", &self.timeout)
            .field("cancellation", &self.cancellation.is_some())
            .finish()
    }
}

/// Reject evaluation against providers that cannot serve it
fn check_status(status: ProviderStatus) -> Result<(), EvaluationError> {
    match status {
        ProviderStatus::NotReady => Err(EvaluationError::new(
            ErrorCode::ProviderNotReady,
            "provider is not yet ready",
        )),
        ProviderStatus::Fatal => Err(EvaluationError::new(
            ErrorCode::ProviderFatal,
            "provider is in an irrecoverable error state",
        )),
        _ => Ok(()),
    }
}

/// Provider call for a client evaluation, gated on provider status
struct ProviderStep {
    entry: Arc<ProviderEntry>,
    guard: EvaluationGuard,
}

impl ProviderStep {
    /// Current status, waiting out an initialization in flight
    async fn usable_status(&self) -> Result<ProviderStatus, EvaluationError> {
        let initializing = self.entry.is_initializing();
        let status = self.entry.status();
        if status == ProviderStatus::NotReady && initializing {
            return self.entry.tracker.settled().await.map_err(EvaluationError::from);
        }
        Ok(status)
    }
}

#[async_trait]
impl ResolveStep for ProviderStep {
    async fn resolve(&self, record: &HookContext, hints: &HookHints) -> ResolutionResult {
        let provider = &self.entry.provider;
        let request = FlagRequest::from_hook_context(record, hints);

        match provider.metadata().paradigm {
            Paradigm::Static => {
                self.guard.check_sync(record.flag_key())?;
                check_status(self.entry.status())?;
                provider.resolve(&request).await
            }
            Paradigm::Dynamic => self
                .guard
                .run(|| async {
                    check_status(self.usable_status().await?)?;
                    provider.resolve(&request).await
                })
                .await
                .map_err(EvaluationError::from)?,
        }
    }
}

/// Flag evaluation client
pub struct Client {
    api: Arc<ApiInner>,
    metadata: ClientMetadata,
    context: RwLock<EvaluationContext>,
    hooks: RwLock<Vec<Arc<dyn Hook>>>,
}

impl Client {
    pub(crate) fn new(api: Arc<ApiInner>, metadata: ClientMetadata) -> Self {
        Self {
            api,
            metadata,
            context: RwLock::new(EvaluationContext::new()),
            hooks: RwLock::new(Vec::new()),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.metadata.version = Some(version.into());
        self
    }

    pub fn metadata(&self) -> &ClientMetadata {
        &self.metadata
    }

    pub fn domain(&self) -> Option<&str> {
        self.metadata.domain.as_deref()
    }

    pub fn context(&self) -> EvaluationContext {
        self.context.read().clone()
    }

    pub fn set_context(&self, context: EvaluationContext) {
        *self.context.write() = context;
    }

    pub fn add_hooks(&self, hooks: impl IntoIterator<Item = Arc<dyn Hook>>) {
        self.hooks.write().extend(hooks);
    }

    pub fn hooks(&self) -> Vec<Arc<dyn Hook>> {
        self.hooks.read().clone()
    }

    pub fn clear_hooks(&self) {
        self.hooks.write().clear();
    }

    /// Status of the provider this client currently resolves to
    pub fn provider_status(&self) -> ProviderStatus {
        self.api.entry_for(self.domain()).status()
    }

    fn merged_context(&self, invocation: Option<&EvaluationContext>) -> EvaluationContext {
        let scope = self.api.scope_context(self.domain());
        let own = self.context.read().clone();
        match invocation {
            Some(invocation) => merge([&scope, &own, invocation]),
            None => merge([&scope, &own]),
        }
    }

    // ========== Evaluation ==========

    /// Evaluate a flag of any supported type
    pub async fn evaluate<T: FlagValueType>(
        &self,
        flag_key: &str,
        default_value: T,
        context: Option<&EvaluationContext>,
        options: Option<&EvaluationOptions>,
    ) -> EvaluationDetails<T> {
        let fallback = EvaluationOptions::default();
        let options = options.unwrap_or(&fallback);

        let entry = self.api.entry_for(self.domain());
        let record = HookContext::new(
            flag_key,
            T::FLAG_TYPE,
            default_value.clone().into_flag_value(),
            self.merged_context(context),
            self.metadata.clone(),
            entry.provider.metadata().clone(),
        );

        let mut hooks = self.api.hooks();
        hooks.extend(self.hooks());
        hooks.extend(options.hooks.iter().cloned());
        hooks.extend(entry.provider.hooks());

        let step = ProviderStep {
            entry,
            guard: EvaluationGuard::new(
                options.timeout.or(self.api.config.evaluation_timeout),
                options.cancellation.clone(),
            ),
        };
        let details = evaluate_hooked(record, &hooks, &options.hook_hints, &step).await;

        if self.api.config.enable_logging {
            debug!(
                flag_key = %details.flag_key,
                value = %details.value,
                reason = ?details.reason,
                error_code = ?details.error_code,
                "Flag evaluated"
            );
        }

        match T::from_flag_value(details.value.clone()) {
            Some(value) => details.map_value(|_| value),
            None => EvaluationDetails::from_error(
                flag_key,
                default_value,
                EvaluationError::new(
                    ErrorCode::TypeMismatch,
                    format!("flag '{}' did not resolve to a {}", flag_key, T::FLAG_TYPE),
                ),
            ),
        }
    }

    pub async fn get_boolean_value(
        &self,
        flag_key: &str,
        default_value: bool,
        context: Option<&EvaluationContext>,
        options: Option<&EvaluationOptions>,
    ) -> bool {
        self.evaluate(flag_key, default_value, context, options)
            .await
            .value
    }

    pub async fn get_boolean_details(
        &self,
        flag_key: &str,
        default_value: bool,
        context: Option<&EvaluationContext>,
        options: Option<&EvaluationOptions>,
    ) -> EvaluationDetails<bool> {
        self.evaluate(flag_key, default_value, context, options).await
    }

    pub async fn get_string_value(
        &self,
        flag_key: &str,
        default_value: impl Into<String>,
        context: Option<&EvaluationContext>,
        options: Option<&EvaluationOptions>,
    ) -> String {
        self.evaluate(flag_key, default_value.into(), context, options)
            .await
            .value
    }

    pub async fn get_string_details(
        &self,
        flag_key: &str,
        default_value: impl Into<String>,
        context: Option<&EvaluationContext>,
        options: Option<&EvaluationOptions>,
    ) -> EvaluationDetails<String> {
        self.evaluate(flag_key, default_value.into(), context, options)
            .await
    }

    pub async fn get_number_value(
        &self,
        flag_key: &str,
        default_value: f64,
        context: Option<&EvaluationContext>,
        options: Option<&EvaluationOptions>,
    ) -> f64 {
        self.evaluate(flag_key, default_value, context, options)
            .await
            .value
    }

    pub async fn get_number_details(
        &self,
        flag_key: &str,
        default_value: f64,
        context: Option<&EvaluationContext>,
        options: Option<&EvaluationOptions>,
    ) -> EvaluationDetails<f64> {
        self.evaluate(flag_key, default_value, context, options).await
    }

    pub async fn get_object_value(
        &self,
        flag_key: &str,
        default_value: serde_json::Value,
        context: Option<&EvaluationContext>,
        options: Option<&EvaluationOptions>,
    ) -> serde_json::Value {
        self.evaluate(flag_key, default_value, context, options)
            .await
            .value
    }

    pub async fn get_object_details(
        &self,
        flag_key: &str,
        default_value: serde_json::Value,
        context: Option<&EvaluationContext>,
        options: Option<&EvaluationOptions>,
    ) -> EvaluationDetails<serde_json::Value> {
        self.evaluate(flag_key, default_value, context, options).await
    }

    // ========== Tracking ==========

    /// Forward an analytics event to the bound provider.
    ///
    /// Skipped while the provider is not ready or fatal; provider failures
    /// are logged and never reach the caller.
    pub fn track(
        &self,
        event_name: &str,
        context: Option<&EvaluationContext>,
        details: Option<&TrackingEventDetails>,
    ) {
        let entry = self.api.entry_for(self.domain());
        let status = entry.status();
        if !status.is_usable() {
            warn!(provider = %entry.name(), status = %status, event = event_name, "Tracking skipped");
            return;
        }

        let context = self.merged_context(context);
        let details = details.cloned().unwrap_or_default();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            entry.provider.track(event_name, &context, &details)
        }));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(provider = %entry.name(), event = event_name, "Tracking failed: {}", e)
            }
            Err(panic) => error!(
                provider = %entry.name(),
                event = event_name,
                "Tracking panicked: {}",
                panic_message(&panic)
            ),
        }
    }

    // ========== Events ==========

    fn emitter(&self) -> Arc<EventEmitter> {
        self.api.client_emitter(self.domain())
    }

    /// Register a handler for events of the provider bound to this client's
    /// scope. Runs once immediately if the provider is already in the state
    /// the event announces.
    pub fn add_handler(&self, event: ProviderEventType, handler: SharedEventHandler) {
        self.emitter().add_handler(event, handler.clone());
        let entry = self.api.entry_for(self.domain());
        self.api
            .replay(&entry, event, &handler, self.metadata.domain.clone());
    }

    pub fn remove_handler(&self, event: ProviderEventType, handler: &SharedEventHandler) -> bool {
        self.emitter().remove_handler(event, handler)
    }

    pub fn handlers(&self, event: ProviderEventType) -> Vec<SharedEventHandler> {
        self.emitter().handlers(event)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("metadata", &self.metadata)
            .field("hooks", &self.hooks.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::details::Reason;
    use crate::error::HookError;
    use crate::hook::HookData;
    use crate::provider::{FlagDefinition, InMemoryProvider};
    use crate::registry::FlagApi;
    use crate::value::Value;
    use parking_lot::Mutex;

    async fn api_with(provider: InMemoryProvider) -> FlagApi {
        let api = FlagApi::new();
        api.set_provider_and_wait(Arc::new(provider)).await.unwrap();
        api
    }

    #[tokio::test]
    async fn test_typed_values() {
        let provider = InMemoryProvider::new()
            .with_flag("on", FlagDefinition::boolean(true))
            .with_flag("color", FlagDefinition::single("default", "blue"))
            .with_flag("limit", FlagDefinition::single("default", 10.0))
            .with_flag(
                "config",
                FlagDefinition::single("default", serde_json::json!({"retries": 3})),
            );
        let client = api_with(provider).await.client();

        assert!(client.get_boolean_value("on", false, None, None).await);
        assert_eq!(client.get_string_value("color", "red", None, None).await, "blue");
        assert_eq!(client.get_number_value("limit", 1.0, None, None).await, 10.0);
        assert_eq!(
            client
                .get_object_value("config", serde_json::Value::Null, None, None)
                .await,
            serde_json::json!({"retries": 3})
        );
    }

    #[tokio::test]
    async fn test_missing_flag_returns_default_with_error() {
        let client = api_with(InMemoryProvider::new()).await.client();

        let details = client
            .get_boolean_details("missing", true, None, None)
            .await;

        assert!(details.value);
        assert_eq!(details.reason, Some(Reason::Error));
        assert_eq!(details.error_code, Some(ErrorCode::FlagNotFound));
    }

    #[tokio::test]
    async fn test_wrong_type_is_type_mismatch() {
        let provider = InMemoryProvider::new().with_flag("color", FlagDefinition::single("default", "blue"));
        let client = api_with(provider).await.client();

        let details = client.get_number_details("color", 7.0, None, None).await;

        assert_eq!(details.value, 7.0);
        assert_eq!(details.error_code, Some(ErrorCode::TypeMismatch));
    }

    struct CaptureContext {
        seen: Mutex<Option<EvaluationContext>>,
    }

    #[async_trait]
    impl Hook for CaptureContext {
        async fn before(
            &self,
            context: &HookContext,
            _data: &mut HookData,
            _hints: &HookHints,
        ) -> Result<Option<EvaluationContext>, HookError> {
            *self.seen.lock() = Some(context.context().clone());
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_context_layers_merge_in_order() {
        let api = api_with(InMemoryProvider::new().with_flag("f", FlagDefinition::boolean(true))).await;
        api.set_context(
            EvaluationContext::new()
                .with_field("level", "global")
                .with_field("region", "eu"),
        )
        .await
        .unwrap();
        api.set_domain_context("billing", EvaluationContext::new().with_field("level", "domain"))
            .await
            .unwrap();

        let client = api.domain_client("billing");
        client.set_context(EvaluationContext::new().with_field("level", "client"));

        let capture = Arc::new(CaptureContext {
            seen: Mutex::new(None),
        });
        let options = EvaluationOptions::new().with_hook(capture.clone());
        let invocation = EvaluationContext::new().with_targeting_key("user-1");

        client
            .get_boolean_value("f", false, Some(&invocation), Some(&options))
            .await;

        let seen = capture.seen.lock().clone().unwrap();
        assert_eq!(seen.get("level"), Some(&Value::from("client")));
        assert_eq!(seen.get("region"), Some(&Value::from("eu")));
        assert_eq!(seen.targeting_key(), Some("user-1"));
    }

    #[tokio::test]
    async fn test_not_ready_static_provider_fails_fast() {
        let api = FlagApi::new();
        let provider = InMemoryProvider::new()
            .with_paradigm(Paradigm::Static)
            .with_flag("f", FlagDefinition::boolean(true))
            .with_initialization_delay(Duration::from_millis(200));
        api.set_provider(Arc::new(provider)).await;

        let details = api.client().get_boolean_details("f", false, None, None).await;

        assert!(!details.value);
        assert_eq!(details.error_code, Some(ErrorCode::ProviderNotReady));
    }

    #[tokio::test]
    async fn test_dynamic_provider_waits_for_initialization() {
        let api = FlagApi::new();
        let provider = InMemoryProvider::new()
            .with_flag("f", FlagDefinition::boolean(true))
            .with_initialization_delay(Duration::from_millis(20));
        api.set_provider(Arc::new(provider)).await;

        assert!(api.client().get_boolean_value("f", false, None, None).await);
    }

    #[tokio::test]
    async fn test_fatal_provider_short_circuits() {
        let api = FlagApi::new();
        let provider = InMemoryProvider::new()
            .with_flag("f", FlagDefinition::boolean(true))
            .with_initialization_error(crate::error::ProviderError::Fatal("revoked".into()));
        let _ = api.set_provider_and_wait(Arc::new(provider)).await;

        let details = api.client().get_boolean_details("f", false, None, None).await;

        assert_eq!(details.error_code, Some(ErrorCode::ProviderFatal));
    }

    #[tokio::test]
    async fn test_track_reaches_provider() {
        let provider = Arc::new(InMemoryProvider::new());
        let api = FlagApi::new();
        api.set_provider_and_wait(provider.clone()).await.unwrap();

        api.client().track(
            "checkout",
            None,
            Some(&TrackingEventDetails::new().with_value(9.5)),
        );

        let tracked = provider.tracked_events();
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].0, "checkout");
        assert_eq!(tracked[0].1.value, Some(9.5));
    }

    #[tokio::test]
    async fn test_client_handler_replays_ready() {
        let api = api_with(InMemoryProvider::new()).await;
        let client = api.client();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = calls.clone();

        client.add_handler(
            ProviderEventType::Ready,
            crate::event::handler(move |details: &crate::event::EventDetails| {
                seen.lock().push(details.provider_name.clone());
                Ok(())
            }),
        );

        assert_eq!(*calls.lock(), vec!["in-memory".to_string()]);
    }
}
