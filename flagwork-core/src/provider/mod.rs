//! Provider contract
//!
//! A provider is the backend that actually resolves flag values. The engine
//! calls [`FeatureProvider::resolve`] with a [`FlagRequest`] whose
//! [`FlagType`] was fixed at the call site; the default implementation
//! dispatches to the typed `resolve_*` methods, so simple providers only
//! implement the types they support.

pub mod in_memory;
pub mod noop;

pub use in_memory::{Condition, FlagDefinition, InMemoryProvider, TargetingRule};
pub use noop::NoopProvider;

use crate::context::EvaluationContext;
use crate::details::ResolutionResult;
use crate::error::{ErrorCode, EvaluationError, ProviderError};
use crate::event::EventEmitter;
use crate::hook::{Hook, HookContext, HookHints};
use crate::value::{FlagType, FlagValue, Value};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// How a provider resolves values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Paradigm {
    /// Resolution may suspend (network, I/O); deadlines are enforced
    #[default]
    Dynamic,
    /// Resolution completes without suspending against a static context
    Static,
}

/// Provider identity
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProviderMetadata {
    pub name: String,
    pub paradigm: Paradigm,
    /// Metadata of nested providers, keyed by registered name
    pub members: BTreeMap<String, ProviderMetadata>,
}

impl ProviderMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_paradigm(mut self, paradigm: Paradigm) -> Self {
        self.paradigm = paradigm;
        self
    }

    pub fn with_member(mut self, name: impl Into<String>, metadata: ProviderMetadata) -> Self {
        self.members.insert(name.into(), metadata);
        self
    }
}

/// Analytics payload for [`FeatureProvider::track`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackingEventDetails {
    pub value: Option<f64>,
    pub attributes: BTreeMap<String, Value>,
}

impl TrackingEventDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// One resolution request
#[derive(Debug, Clone, Copy)]
pub struct FlagRequest<'a> {
    pub flag_key: &'a str,
    pub flag_type: FlagType,
    pub default_value: &'a FlagValue,
    pub context: &'a EvaluationContext,
    /// Invocation record of the surrounding evaluation, when there is one
    pub hook_context: Option<&'a HookContext>,
    pub hints: Option<&'a HookHints>,
}

impl<'a> FlagRequest<'a> {
    pub fn new(
        flag_key: &'a str,
        flag_type: FlagType,
        default_value: &'a FlagValue,
        context: &'a EvaluationContext,
    ) -> Self {
        Self {
            flag_key,
            flag_type,
            default_value,
            context,
            hook_context: None,
            hints: None,
        }
    }

    /// Request for the evaluation described by a hook record
    pub fn from_hook_context(hook_context: &'a HookContext, hints: &'a HookHints) -> Self {
        Self {
            flag_key: hook_context.flag_key(),
            flag_type: hook_context.flag_type(),
            default_value: hook_context.default_value(),
            context: hook_context.context(),
            hook_context: Some(hook_context),
            hints: Some(hints),
        }
    }
}

/// Flag backend
#[async_trait]
pub trait FeatureProvider: Send + Sync {
    fn metadata(&self) -> &ProviderMetadata;

    /// Prepare the provider; failure propagates to the caller that registered it
    async fn initialize(&self, _context: &EvaluationContext) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Reconcile with a changed context (static paradigm)
    async fn on_context_changed(
        &self,
        _old_context: &EvaluationContext,
        _new_context: &EvaluationContext,
    ) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Release resources when the provider is no longer bound to any scope
    async fn shutdown(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Record an analytics event unrelated to flag resolution
    fn track(
        &self,
        _event_name: &str,
        _context: &EvaluationContext,
        _details: &TrackingEventDetails,
    ) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Embedded event source, if the provider emits lifecycle events
    fn events(&self) -> Option<&EventEmitter> {
        None
    }

    /// Hooks owned by the provider, run innermost
    fn hooks(&self) -> Vec<Arc<dyn Hook>> {
        Vec::new()
    }

    async fn resolve_boolean(
        &self,
        flag_key: &str,
        _default_value: bool,
        _context: &EvaluationContext,
    ) -> ResolutionResult<bool> {
        Err(unsupported(flag_key, FlagType::Boolean))
    }

    async fn resolve_string(
        &self,
        flag_key: &str,
        _default_value: &str,
        _context: &EvaluationContext,
    ) -> ResolutionResult<String> {
        Err(unsupported(flag_key, FlagType::String))
    }

    async fn resolve_number(
        &self,
        flag_key: &str,
        _default_value: f64,
        _context: &EvaluationContext,
    ) -> ResolutionResult<f64> {
        Err(unsupported(flag_key, FlagType::Number))
    }

    async fn resolve_object(
        &self,
        flag_key: &str,
        _default_value: &serde_json::Value,
        _context: &EvaluationContext,
    ) -> ResolutionResult<serde_json::Value> {
        Err(unsupported(flag_key, FlagType::Object))
    }

    /// Resolve one request, dispatching on its declared flag type
    async fn resolve(&self, request: &FlagRequest<'_>) -> ResolutionResult {
        let key = request.flag_key;
        let ctx = request.context;
        match (request.flag_type, request.default_value) {
            (FlagType::Boolean, FlagValue::Boolean(d)) => self
                .resolve_boolean(key, *d, ctx)
                .await
                .map(|r| r.map_value(FlagValue::Boolean)),
            (FlagType::String, FlagValue::String(d)) => self
                .resolve_string(key, d, ctx)
                .await
                .map(|r| r.map_value(FlagValue::String)),
            (FlagType::Number, FlagValue::Number(d)) => self
                .resolve_number(key, *d, ctx)
                .await
                .map(|r| r.map_value(FlagValue::Number)),
            (FlagType::Object, FlagValue::Object(d)) => self
                .resolve_object(key, d, ctx)
                .await
                .map(|r| r.map_value(FlagValue::Object)),
            (declared, default) => Err(EvaluationError::new(
                ErrorCode::TypeMismatch,
                format!(
                    "default value of type {} does not match declared type {}",
                    default.flag_type(),
                    declared
                ),
            )),
        }
    }
}

fn unsupported(flag_key: &str, flag_type: FlagType) -> EvaluationError {
    EvaluationError::general(format!(
        "provider does not resolve {} flags (flag '{}')",
        flag_type, flag_key
    ))
}
