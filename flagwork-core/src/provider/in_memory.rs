//! In-memory provider
//!
//! Serves flag definitions held in process memory. Each definition has named
//! variants and a default variant. Targeting rules are tried first, then the
//! percentage rollout, then the context evaluator.
//!
//! ```
//! use flagwork_core::provider::{Condition, FlagDefinition, InMemoryProvider, TargetingRule};
//!
//! let staff = TargetingRule::new("on").when(Condition::suffix("email", "@company.com"));
//!
//! let provider = InMemoryProvider::new().with_flag(
//!     "beta-feature",
//!     FlagDefinition::boolean(false)
//!         .with_rule(staff)
//!         .with_rollout("on", 10),
//! );
//! ```

use super::{FeatureProvider, FlagRequest, Paradigm, ProviderMetadata, TrackingEventDetails};
use crate::context::EvaluationContext;
use crate::details::{Reason, ResolutionDetails, ResolutionResult};
use crate::error::{EvaluationError, ProviderError};
use crate::event::{EventDetails, EventEmitter, ProviderEventType};
use crate::hook::Hook;
use crate::value::FlagValue;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

/// Custom variant selection from the evaluation context
pub type ContextEvaluator = Arc<dyn Fn(&EvaluationContext) -> Option<String> + Send + Sync>;

/// Flag served by the in-memory provider
#[derive(Clone)]
pub struct FlagDefinition {
    /// Variant name to value
    pub variants: BTreeMap<String, FlagValue>,

    /// Variant served when nothing else matches
    pub default_variant: String,

    /// Disabled flags resolve to the caller's default value
    pub enabled: bool,

    pub description: Option<String>,

    /// Targeting rules, first match wins
    pub targeting: Vec<TargetingRule>,

    /// Variant and percentage of subjects (by targeting key) that get it
    pub rollout: Option<(String, u8)>,

    evaluator: Option<ContextEvaluator>,
}

impl FlagDefinition {
    /// Flag with explicit variants
    pub fn new(default_variant: impl Into<String>, variants: BTreeMap<String, FlagValue>) -> Self {
        Self {
            variants,
            default_variant: default_variant.into(),
            enabled: true,
            description: None,
            targeting: Vec::new(),
            rollout: None,
            evaluator: None,
        }
    }

    /// Boolean flag with `on`/`off` variants
    pub fn boolean(default_value: bool) -> Self {
        let variants = BTreeMap::from([
            ("on".to_string(), FlagValue::Boolean(true)),
            ("off".to_string(), FlagValue::Boolean(false)),
        ]);
        Self::new(if default_value { "on" } else { "off" }, variants)
    }

    /// Flag with a single variant
    pub fn single(variant: impl Into<String>, value: impl Into<FlagValue>) -> Self {
        let variant = variant.into();
        Self::new(variant.clone(), BTreeMap::from([(variant, value.into())]))
    }

    pub fn with_variant(mut self, name: impl Into<String>, value: impl Into<FlagValue>) -> Self {
        self.variants.insert(name.into(), value.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_rule(mut self, rule: TargetingRule) -> Self {
        self.targeting.push(rule);
        self
    }

    pub fn with_rollout(mut self, variant: impl Into<String>, percentage: u8) -> Self {
        self.rollout = Some((variant.into(), percentage.min(100)));
        self
    }

    pub fn with_evaluator<F>(mut self, evaluator: F) -> Self
    where
        F: Fn(&EvaluationContext) -> Option<String> + Send + Sync + 'static,
    {
        self.evaluator = Some(Arc::new(evaluator));
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Evaluate the flag for a context
    pub fn evaluate(
        &self,
        flag_key: &str,
        default_value: &FlagValue,
        context: &EvaluationContext,
    ) -> ResolutionResult {
        if !self.enabled {
            return Ok(ResolutionDetails::new(default_value.clone()).with_reason(Reason::Disabled));
        }

        let (variant, reason) = self.select_variant(flag_key, context);
        let value = self.variants.get(&variant).cloned().ok_or_else(|| {
            EvaluationError::general(format!(
                "variant '{}' not found for flag '{}'",
                variant, flag_key
            ))
        })?;

        Ok(ResolutionDetails::new(value)
            .with_variant(variant)
            .with_reason(reason))
    }

    fn select_variant(&self, flag_key: &str, context: &EvaluationContext) -> (String, Reason) {
        for rule in &self.targeting {
            if rule.matches(context) {
                return (rule.variant.clone(), Reason::TargetingMatch);
            }
        }

        if let Some((variant, percentage)) = &self.rollout
            && let Some(key) = context.targeting_key()
            && bucket(flag_key, key) < *percentage
        {
            return (variant.clone(), Reason::Split);
        }

        if let Some(evaluator) = &self.evaluator
            && let Some(variant) = evaluator(context)
        {
            return (variant, Reason::TargetingMatch);
        }

        (self.default_variant.clone(), Reason::Static)
    }
}

impl fmt::Debug for FlagDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlagDefinition")
            .field("variants", &self.variants)
            .field("default_variant", &self.default_variant)
            .field("enabled", &self.enabled)
            .field("targeting", &self.targeting)
            .field("rollout", &self.rollout)
            .field("evaluator", &self.evaluator.is_some())
            .finish()
    }
}

/// Variant served when every condition holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetingRule {
    pub variant: String,
    pub conditions: Vec<Condition>,
}

impl TargetingRule {
    pub fn new(variant: impl Into<String>) -> Self {
        Self {
            variant: variant.into(),
            conditions: Vec::new(),
        }
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn matches(&self, context: &EvaluationContext) -> bool {
        self.conditions.iter().all(|c| c.holds(context))
    }
}

/// Test on one context attribute, compared in its display form.
///
/// `targetingKey` addresses the targeting key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    OneOf { attribute: String, values: Vec<String> },
    /// Also holds when the attribute is absent
    NoneOf { attribute: String, values: Vec<String> },
    Contains { attribute: String, fragment: String },
    Prefix { attribute: String, prefix: String },
    Suffix { attribute: String, suffix: String },
}

impl Condition {
    pub fn one_of<I, S>(attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Condition::OneOf {
            attribute: attribute.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn none_of<I, S>(attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Condition::NoneOf {
            attribute: attribute.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn suffix(attribute: impl Into<String>, suffix: impl Into<String>) -> Self {
        Condition::Suffix {
            attribute: attribute.into(),
            suffix: suffix.into(),
        }
    }

    fn attribute(&self) -> &str {
        match self {
            Condition::OneOf { attribute, .. }
            | Condition::NoneOf { attribute, .. }
            | Condition::Contains { attribute, .. }
            | Condition::Prefix { attribute, .. }
            | Condition::Suffix { attribute, .. } => attribute,
        }
    }

    pub fn holds(&self, context: &EvaluationContext) -> bool {
        let Some(actual) = context.attribute(self.attribute()).map(|v| v.to_string()) else {
            return matches!(self, Condition::NoneOf { .. });
        };

        match self {
            Condition::OneOf { values, .. } => values.contains(&actual),
            Condition::NoneOf { values, .. } => !values.contains(&actual),
            Condition::Contains { fragment, .. } => actual.contains(fragment.as_str()),
            Condition::Prefix { prefix, .. } => actual.starts_with(prefix.as_str()),
            Condition::Suffix { suffix, .. } => actual.ends_with(suffix.as_str()),
        }
    }
}

/// Stable bucket in `0..100` for one subject of one flag
fn bucket(flag_key: &str, targeting_key: &str) -> u8 {
    let digest = Sha256::new()
        .chain_update(flag_key)
        .chain_update(b"/")
        .chain_update(targeting_key)
        .finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) % 100) as u8
}

/// Provider serving [`FlagDefinition`]s from memory
pub struct InMemoryProvider {
    metadata: ProviderMetadata,
    flags: RwLock<HashMap<String, FlagDefinition>>,
    events: EventEmitter,
    hooks: Vec<Arc<dyn Hook>>,
    initialization_delay: Option<Duration>,
    initialization_error: Option<ProviderError>,
    initialize_calls: AtomicUsize,
    context_changes: AtomicUsize,
    shutdown_calls: AtomicUsize,
    tracked: Mutex<Vec<(String, TrackingEventDetails)>>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self {
            metadata: ProviderMetadata::new("in-memory"),
            flags: RwLock::new(HashMap::new()),
            events: EventEmitter::new(),
            hooks: Vec::new(),
            initialization_delay: None,
            initialization_error: None,
            initialize_calls: AtomicUsize::new(0),
            context_changes: AtomicUsize::new(0),
            shutdown_calls: AtomicUsize::new(0),
            tracked: Mutex::new(Vec::new()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = name.into();
        self
    }

    pub fn with_paradigm(mut self, paradigm: Paradigm) -> Self {
        self.metadata.paradigm = paradigm;
        self
    }

    pub fn with_flag(self, key: impl Into<String>, flag: FlagDefinition) -> Self {
        self.flags.write().insert(key.into(), flag);
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn Hook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Delay initialization, simulating a slow backend
    pub fn with_initialization_delay(mut self, delay: Duration) -> Self {
        self.initialization_delay = Some(delay);
        self
    }

    /// Fail initialization with the given error
    pub fn with_initialization_error(mut self, error: ProviderError) -> Self {
        self.initialization_error = Some(error);
        self
    }

    pub fn flag_keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.flags.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Add or replace one flag and announce the change
    pub fn set_flag(&self, key: impl Into<String>, flag: FlagDefinition) {
        let key = key.into();
        self.flags.write().insert(key.clone(), flag);
        self.announce_change(vec![key]);
    }

    /// Replace the whole configuration and announce every affected key
    pub fn put_configuration(&self, flags: HashMap<String, FlagDefinition>) {
        let changed: BTreeSet<String> = {
            let mut current = self.flags.write();
            let changed = current.keys().chain(flags.keys()).cloned().collect();
            *current = flags;
            changed
        };
        self.announce_change(changed.into_iter().collect());
    }

    pub fn initialize_count(&self) -> usize {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    pub fn context_change_count(&self) -> usize {
        self.context_changes.load(Ordering::SeqCst)
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }

    /// Tracking events received so far, oldest first
    pub fn tracked_events(&self) -> Vec<(String, TrackingEventDetails)> {
        self.tracked.lock().clone()
    }

    fn announce_change(&self, flags_changed: Vec<String>) {
        debug!(provider = %self.metadata.name, flags = ?flags_changed, "Flag configuration changed");
        let details = EventDetails::new(self.metadata.name.clone()).with_flags_changed(flags_changed);
        self.events
            .emit(ProviderEventType::ConfigurationChanged, &details);
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeatureProvider for InMemoryProvider {
    fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    async fn initialize(&self, _context: &EvaluationContext) -> Result<(), ProviderError> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.initialization_delay {
            tokio::time::sleep(delay).await;
        }
        match &self.initialization_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn on_context_changed(
        &self,
        _old_context: &EvaluationContext,
        _new_context: &EvaluationContext,
    ) -> Result<(), ProviderError> {
        self.context_changes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ProviderError> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn track(
        &self,
        event_name: &str,
        _context: &EvaluationContext,
        details: &TrackingEventDetails,
    ) -> Result<(), ProviderError> {
        self.tracked
            .lock()
            .push((event_name.to_string(), details.clone()));
        Ok(())
    }

    fn events(&self) -> Option<&EventEmitter> {
        Some(&self.events)
    }

    fn hooks(&self) -> Vec<Arc<dyn Hook>> {
        self.hooks.clone()
    }

    async fn resolve(&self, request: &FlagRequest<'_>) -> ResolutionResult {
        let flag = self
            .flags
            .read()
            .get(request.flag_key)
            .cloned()
            .ok_or_else(|| EvaluationError::flag_not_found(request.flag_key))?;

        flag.evaluate(request.flag_key, request.default_value, request.context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::value::FlagType;
    use parking_lot::Mutex;

    fn evaluate(flag: &FlagDefinition, context: &EvaluationContext) -> ResolutionDetails {
        flag.evaluate("test-flag", &FlagValue::Boolean(false), context)
            .unwrap()
    }

    #[test]
    fn test_boolean_flag() {
        let flag = FlagDefinition::boolean(true);
        let context = EvaluationContext::new().with_targeting_key("user-1");

        let result = evaluate(&flag, &context);
        assert_eq!(result.value, FlagValue::Boolean(true));
        assert_eq!(result.variant.as_deref(), Some("on"));
        assert_eq!(result.reason, Some(Reason::Static));
    }

    #[test]
    fn test_disabled_flag_serves_caller_default() {
        let flag = FlagDefinition::boolean(true).disabled();
        let result = evaluate(&flag, &EvaluationContext::new());

        assert_eq!(result.value, FlagValue::Boolean(false));
        assert_eq!(result.reason, Some(Reason::Disabled));
    }

    #[test]
    fn test_targeting_rule() {
        let rule = TargetingRule::new("on").when(Condition::suffix("email", "@example.com"));
        let flag = FlagDefinition::boolean(false).with_rule(rule);

        let context = EvaluationContext::new()
            .with_targeting_key("user-1")
            .with_field("email", "user@example.com");
        let result = evaluate(&flag, &context);
        assert_eq!(result.value, FlagValue::Boolean(true));
        assert_eq!(result.reason, Some(Reason::TargetingMatch));

        let other = EvaluationContext::new().with_field("email", "user@elsewhere.org");
        assert_eq!(evaluate(&flag, &other).value, FlagValue::Boolean(false));
    }

    #[test]
    fn test_none_of_holds_for_missing_attribute() {
        let condition = Condition::none_of("plan", ["free"]);
        assert!(condition.holds(&EvaluationContext::new()));
        assert!(!condition.holds(&EvaluationContext::new().with_field("plan", "free")));
        assert!(!Condition::one_of("plan", ["pro"]).holds(&EvaluationContext::new()));
    }

    #[test]
    fn test_rules_require_every_condition() {
        let rule = TargetingRule::new("on")
            .when(Condition::one_of("country", ["NZ", "AU"]))
            .when(Condition::Prefix {
                attribute: "targetingKey".into(),
                prefix: "staff-".into(),
            });

        let staff = EvaluationContext::new()
            .with_targeting_key("staff-4")
            .with_field("country", "NZ");
        let customer = EvaluationContext::new()
            .with_targeting_key("cust-4")
            .with_field("country", "NZ");
        assert!(rule.matches(&staff));
        assert!(!rule.matches(&customer));
    }

    #[test]
    fn test_rollout() {
        let flag = FlagDefinition::boolean(false).with_rollout("on", 50);

        let mut enabled_count = 0;
        for i in 0..100 {
            let context = EvaluationContext::new().with_targeting_key(format!("user-{}", i));
            if evaluate(&flag, &context).value == FlagValue::Boolean(true) {
                enabled_count += 1;
            }
        }

        // Should be close to 50%
        assert!((30..=70).contains(&enabled_count));
    }

    #[test]
    fn test_rollout_is_deterministic() {
        assert_eq!(bucket("flag", "user-7"), bucket("flag", "user-7"));
        assert!(bucket("flag", "user-7") < 100);

        // without a targeting key the rollout is skipped
        let flag = FlagDefinition::boolean(false).with_rollout("on", 100);
        let result = evaluate(&flag, &EvaluationContext::new());
        assert_eq!(result.reason, Some(Reason::Static));
    }

    #[test]
    fn test_evaluator_selects_variant() {
        let flag = FlagDefinition::single("red", "red")
            .with_variant("blue", "blue")
            .with_evaluator(|ctx| ctx.targeting_key().map(|_| "blue".to_string()));

        let result = flag
            .evaluate(
                "color",
                &FlagValue::from("none"),
                &EvaluationContext::new().with_targeting_key("u"),
            )
            .unwrap();
        assert_eq!(result.value, FlagValue::from("blue"));
    }

    #[test]
    fn test_missing_variant_is_general_error() {
        let flag = FlagDefinition::new("ghost", BTreeMap::new());
        let err = flag
            .evaluate("f", &FlagValue::Boolean(false), &EvaluationContext::new())
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::General);
    }

    #[tokio::test]
    async fn test_unknown_flag_is_not_found() {
        let provider = InMemoryProvider::new();
        let default = FlagValue::Boolean(false);
        let ctx = EvaluationContext::new();
        let request = FlagRequest::new("missing", FlagType::Boolean, &default, &ctx);

        let err = provider.resolve(&request).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::FlagNotFound);
    }

    #[test]
    fn test_put_configuration_announces_changed_keys() {
        let provider = InMemoryProvider::new().with_flag("a", FlagDefinition::boolean(true));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        provider.events.add_handler(
            ProviderEventType::ConfigurationChanged,
            crate::event::handler(move |details: &EventDetails| {
                sink.lock().extend(details.flags_changed.clone());
                Ok(())
            }),
        );

        provider.put_configuration(HashMap::from([(
            "b".to_string(),
            FlagDefinition::boolean(false),
        )]));

        assert_eq!(*seen.lock(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(provider.flag_keys(), vec!["b".to_string()]);
    }
}
