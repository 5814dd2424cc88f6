//! Flag and Context Values
//!
//! Resolved flag values are a closed set of four types. The declared type of a
//! flag is chosen once at the call site through [`FlagValueType`] and travels
//! through the engine as a [`FlagType`] tag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Declared type of a flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagType {
    Boolean,
    String,
    Number,
    Object,
}

impl FlagType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagType::Boolean => "boolean",
            FlagType::String => "string",
            FlagType::Number => "number",
            FlagType::Object => "object",
        }
    }
}

impl fmt::Display for FlagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value resolved for a flag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Boolean(bool),
    String(String),
    Number(f64),
    Object(serde_json::Value),
}

impl FlagValue {
    /// Type tag of this value
    pub fn flag_type(&self) -> FlagType {
        match self {
            FlagValue::Boolean(_) => FlagType::Boolean,
            FlagValue::String(_) => FlagType::String,
            FlagValue::Number(_) => FlagType::Number,
            FlagValue::Object(_) => FlagType::Object,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FlagValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FlagValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FlagValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&serde_json::Value> {
        match self {
            FlagValue::Object(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagValue::Boolean(b) => write!(f, "{}", b),
            FlagValue::String(s) => write!(f, "{}", s),
            FlagValue::Number(n) => write!(f, "{}", n),
            FlagValue::Object(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        FlagValue::Boolean(value)
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        FlagValue::String(value.to_string())
    }
}

impl From<String> for FlagValue {
    fn from(value: String) -> Self {
        FlagValue::String(value)
    }
}

impl From<f64> for FlagValue {
    fn from(value: f64) -> Self {
        FlagValue::Number(value)
    }
}

impl From<i64> for FlagValue {
    fn from(value: i64) -> Self {
        FlagValue::Number(value as f64)
    }
}

impl From<serde_json::Value> for FlagValue {
    fn from(value: serde_json::Value) -> Self {
        FlagValue::Object(value)
    }
}

/// Rust types that can be requested from the engine as flag values.
///
/// Implemented for `bool`, `String`, `f64` and `serde_json::Value`; each maps
/// to exactly one [`FlagType`].
pub trait FlagValueType: Clone + Send + Sync + 'static {
    /// Flag type requested when evaluating with this Rust type
    const FLAG_TYPE: FlagType;

    /// Wrap into the engine's value representation
    fn into_flag_value(self) -> FlagValue;

    /// Unwrap from the engine's value representation, `None` on type mismatch
    fn from_flag_value(value: FlagValue) -> Option<Self>;
}

impl FlagValueType for bool {
    const FLAG_TYPE: FlagType = FlagType::Boolean;

    fn into_flag_value(self) -> FlagValue {
        FlagValue::Boolean(self)
    }

    fn from_flag_value(value: FlagValue) -> Option<Self> {
        value.as_bool()
    }
}

impl FlagValueType for String {
    const FLAG_TYPE: FlagType = FlagType::String;

    fn into_flag_value(self) -> FlagValue {
        FlagValue::String(self)
    }

    fn from_flag_value(value: FlagValue) -> Option<Self> {
        match value {
            FlagValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl FlagValueType for f64 {
    const FLAG_TYPE: FlagType = FlagType::Number;

    fn into_flag_value(self) -> FlagValue {
        FlagValue::Number(self)
    }

    fn from_flag_value(value: FlagValue) -> Option<Self> {
        value.as_number()
    }
}

impl FlagValueType for serde_json::Value {
    const FLAG_TYPE: FlagType = FlagType::Object;

    fn into_flag_value(self) -> FlagValue {
        FlagValue::Object(self)
    }

    fn from_flag_value(value: FlagValue) -> Option<Self> {
        match value {
            FlagValue::Object(v) => Some(v),
            _ => None,
        }
    }
}

/// Attribute value stored in an evaluation context.
///
/// Serialized without a tag. Timestamps are written as RFC 3339 strings, and
/// on the way back any string that parses as RFC 3339 becomes a `DateTime`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(f64),
    DateTime(DateTime<Utc>),
    String(String),
    List(Vec<Value>),
    Struct(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Struct(fields) => Some(fields),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => f.write_str(s),
            Value::DateTime(dt) => f.write_str(&dt.to_rfc3339()),
            Value::List(_) | Value::Struct(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(value.into())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::DateTime(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Value::Struct(value)
    }
}
