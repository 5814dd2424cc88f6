//! Hooks
//!
//! Hooks are extension callbacks run around a single evaluation in four
//! stages: `before`, `after`, `error` and `finally`. Every stage receives the
//! [`HookContext`] of the evaluation, the hook's own [`HookData`] scratch store
//! and the read-only [`HookHints`] supplied by the caller.
//!
//! The context seen by hooks is read-only. A `before` hook influences the
//! evaluation by returning a partial [`EvaluationContext`], which is merged on
//! top of the working context before the next hook runs.
//!
//! # Examples
//!
//! ```
//! use flagwork_core::hook::{Hook, HookContext, HookData, HookHints};
//! use flagwork_core::{EvaluationContext, HookError};
//! use async_trait::async_trait;
//!
//! struct TenantHook;
//!
//! #[async_trait]
//! impl Hook for TenantHook {
//!     async fn before(
//!         &self,
//!         _context: &HookContext,
//!         _data: &mut HookData,
//!         _hints: &HookHints,
//!     ) -> Result<Option<EvaluationContext>, HookError> {
//!         Ok(Some(EvaluationContext::new().with_field("tenant", "acme")))
//!     }
//! }
//! ```

use crate::client::ClientMetadata;
use crate::context::EvaluationContext;
use crate::details::EvaluationDetails;
use crate::error::{EvaluationError, HookError};
use crate::provider::ProviderMetadata;
use crate::value::{FlagType, FlagValue, Value};
use async_trait::async_trait;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use uuid::Uuid;

/// Read-only hints passed to every hook stage
pub type HookHints = BTreeMap<String, Value>;

/// Extension callback run around an evaluation
#[async_trait]
pub trait Hook: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Runs before the provider is called.
    ///
    /// A returned context is merged into the working context with the highest
    /// precedence. An error aborts the remaining `before` hooks and the
    /// provider call.
    async fn before(
        &self,
        _context: &HookContext,
        _data: &mut HookData,
        _hints: &HookHints,
    ) -> Result<Option<EvaluationContext>, HookError> {
        Ok(None)
    }

    /// Runs after a successful provider call
    async fn after(
        &self,
        _context: &HookContext,
        _details: &EvaluationDetails,
        _data: &mut HookData,
        _hints: &HookHints,
    ) -> Result<(), HookError> {
        Ok(())
    }

    /// Runs when a `before` hook, the provider or an `after` hook failed
    async fn error(
        &self,
        _context: &HookContext,
        _error: &EvaluationError,
        _data: &mut HookData,
        _hints: &HookHints,
    ) -> Result<(), HookError> {
        Ok(())
    }

    /// Always runs last
    async fn finally(
        &self,
        _context: &HookContext,
        _details: &EvaluationDetails,
        _data: &mut HookData,
        _hints: &HookHints,
    ) -> Result<(), HookError> {
        Ok(())
    }
}

/// Snapshot of one evaluation handed to every hook stage
#[derive(Debug, Clone)]
pub struct HookContext {
    flag_key: String,
    flag_type: FlagType,
    default_value: FlagValue,
    context: EvaluationContext,
    client_metadata: ClientMetadata,
    provider_metadata: ProviderMetadata,
}

impl HookContext {
    pub fn new(
        flag_key: impl Into<String>,
        flag_type: FlagType,
        default_value: FlagValue,
        context: EvaluationContext,
        client_metadata: ClientMetadata,
        provider_metadata: ProviderMetadata,
    ) -> Self {
        Self {
            flag_key: flag_key.into(),
            flag_type,
            default_value,
            context,
            client_metadata,
            provider_metadata,
        }
    }

    pub fn flag_key(&self) -> &str {
        &self.flag_key
    }

    pub fn flag_type(&self) -> FlagType {
        self.flag_type
    }

    pub fn default_value(&self) -> &FlagValue {
        &self.default_value
    }

    pub fn context(&self) -> &EvaluationContext {
        &self.context
    }

    pub fn client_metadata(&self) -> &ClientMetadata {
        &self.client_metadata
    }

    pub fn provider_metadata(&self) -> &ProviderMetadata {
        &self.provider_metadata
    }

    /// Derive the record seen by one member of a provider group.
    ///
    /// Flag identity and client are shared; the provider is replaced and the
    /// context is an independent copy.
    pub fn for_provider(&self, provider_metadata: ProviderMetadata) -> Self {
        Self {
            provider_metadata,
            ..self.clone()
        }
    }

    pub(crate) fn merge_context(&mut self, layer: &EvaluationContext) {
        self.context = self.context.merged_with(layer);
    }
}

/// Private scratch store of one hook for one evaluation
#[derive(Default)]
pub struct HookData {
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl HookData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for HookData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookData")
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Scratch stores for one evaluation, one slot per hook position.
///
/// Allocated fresh for every evaluation and dropped when it ends, so data
/// never carries over between evaluations, hooks or clients.
#[derive(Debug)]
pub struct HookDataArena {
    evaluation_id: Uuid,
    slots: Vec<HookData>,
}

impl HookDataArena {
    pub fn new(slot_count: usize) -> Self {
        Self {
            evaluation_id: Uuid::new_v4(),
            slots: (0..slot_count).map(|_| HookData::new()).collect(),
        }
    }

    pub fn evaluation_id(&self) -> Uuid {
        self.evaluation_id
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> Option<&HookData> {
        self.slots.get(index)
    }

    pub fn slot_mut(&mut self, index: usize) -> Option<&mut HookData> {
        self.slots.get_mut(index)
    }

    pub(crate) fn slots_mut(&mut self) -> std::slice::IterMut<'_, HookData> {
        self.slots.iter_mut()
    }
}
