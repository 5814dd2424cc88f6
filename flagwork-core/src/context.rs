//! Evaluation Context
//!
//! Attributes describing the subject of an evaluation, and the layered merge
//! that combines the process-wide, domain, client, invocation and hook scopes.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attribute key under which the targeting key is exposed to rule matching
pub const TARGETING_KEY: &str = "targetingKey";

/// Evaluation context (subject attributes)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
    /// Distinguished subject identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    targeting_key: Option<String>,

    /// Remaining attributes, ordered by key
    #[serde(default)]
    fields: BTreeMap<String, Value>,
}

impl EvaluationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_targeting_key(mut self, targeting_key: impl Into<String>) -> Self {
        self.targeting_key = Some(targeting_key.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn set_targeting_key(&mut self, targeting_key: impl Into<String>) {
        self.targeting_key = Some(targeting_key.into());
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    pub fn targeting_key(&self) -> Option<&str> {
        self.targeting_key.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Look up an attribute, treating `targetingKey` as an attribute name
    pub fn attribute(&self, key: &str) -> Option<Value> {
        if key == TARGETING_KEY {
            return self.targeting_key.clone().map(Value::String);
        }
        self.fields.get(key).cloned()
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.targeting_key.is_none() && self.fields.is_empty()
    }

    /// Returns a new context with `other` layered on top of `self`.
    ///
    /// Keys present in both take the value from `other`; a targeting key in
    /// `other` replaces the one in `self`. Neither input is modified.
    pub fn merged_with(&self, other: &EvaluationContext) -> EvaluationContext {
        let mut merged = self.clone();
        if let Some(key) = &other.targeting_key {
            merged.targeting_key = Some(key.clone());
        }
        for (key, value) in &other.fields {
            merged.fields.insert(key.clone(), value.clone());
        }
        merged
    }
}

/// Merge context layers left to right, later layers taking precedence.
///
/// The canonical order is process-wide, domain, client, invocation and finally
/// contexts returned from `before` hooks.
pub fn merge<'a, I>(layers: I) -> EvaluationContext
where
    I: IntoIterator<Item = &'a EvaluationContext>,
{
    layers
        .into_iter()
        .fold(EvaluationContext::default(), |acc, layer| acc.merged_with(layer))
}
