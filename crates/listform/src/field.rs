//! Field descriptors and observable field models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

use crate::codec::split_multi;

/// Declared column type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Text,
    /// Multi-line text, including rich HTML
    Note,
    Number,
    Currency,
    Boolean,
    DateTime,
    Choice,
    MultiChoice,
    User,
    UserMulti,
    /// Any other tag, passed through untouched
    Unknown(String),
}

impl FieldType {
    /// Parse a wire type tag (case-insensitive).
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "text" => FieldType::Text,
            "note" | "html" => FieldType::Note,
            "number" => FieldType::Number,
            "currency" => FieldType::Currency,
            "boolean" => FieldType::Boolean,
            "datetime" => FieldType::DateTime,
            "choice" => FieldType::Choice,
            "multichoice" => FieldType::MultiChoice,
            "user" => FieldType::User,
            "usermulti" => FieldType::UserMulti,
            _ => FieldType::Unknown(tag.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FieldType::Text => "Text",
            FieldType::Note => "Note",
            FieldType::Number => "Number",
            FieldType::Currency => "Currency",
            FieldType::Boolean => "Boolean",
            FieldType::DateTime => "DateTime",
            FieldType::Choice => "Choice",
            FieldType::MultiChoice => "MultiChoice",
            FieldType::User => "User",
            FieldType::UserMulti => "UserMulti",
            FieldType::Unknown(tag) => tag,
        }
    }

    /// Holds a sequence rather than a single value.
    pub fn is_multi(&self) -> bool {
        matches!(self, FieldType::MultiChoice | FieldType::UserMulti)
    }

    /// Value is resolved through a secondary field or a deferred fetch.
    pub fn is_lookup(&self) -> bool {
        matches!(
            self,
            FieldType::Choice | FieldType::MultiChoice | FieldType::User | FieldType::UserMulti
        )
    }

    /// The "no value" for this type.
    pub fn unset(&self) -> ModelValue {
        if self.is_multi() {
            ModelValue::Multi(Vec::new())
        } else {
            ModelValue::Null
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// In-memory value of a field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ModelValue {
    Null,
    Text(String),
    Number(f64),
    Bool(bool),
    Date(DateTime<Utc>),
    Multi(Vec<String>),
}

impl ModelValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ModelValue::Null)
    }

    /// Null, whitespace-only text or an empty sequence.
    pub fn is_blank(&self) -> bool {
        match self {
            ModelValue::Null => true,
            ModelValue::Text(s) => s.trim().is_empty(),
            ModelValue::Multi(v) => v.is_empty(),
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ModelValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ModelValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ModelValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            ModelValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_multi(&self) -> Option<&[String]> {
        match self {
            ModelValue::Multi(v) => Some(v),
            _ => None,
        }
    }
}

impl From<&str> for ModelValue {
    fn from(s: &str) -> Self {
        ModelValue::Text(s.to_string())
    }
}

impl From<String> for ModelValue {
    fn from(s: String) -> Self {
        ModelValue::Text(s)
    }
}

impl From<f64> for ModelValue {
    fn from(n: f64) -> Self {
        ModelValue::Number(n)
    }
}

impl From<bool> for ModelValue {
    fn from(b: bool) -> Self {
        ModelValue::Bool(b)
    }
}

impl From<DateTime<Utc>> for ModelValue {
    fn from(d: DateTime<Utc>) -> Self {
        ModelValue::Date(d)
    }
}

impl From<Vec<String>> for ModelValue {
    fn from(v: Vec<String>) -> Self {
        ModelValue::Multi(v)
    }
}

/// Immutable facts about one column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDescriptor {
    /// Model key derived from the display name
    pub key: String,
    /// Internal column name, used for writes
    pub name: String,
    pub display_name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub read_only: bool,
    pub format: Option<String>,
    pub description: Option<String>,
    /// Typed default applied at compile time
    pub default_value: ModelValue,
    /// Ordered choices for choice columns
    pub options: Vec<String>,
    /// Free-text entries allowed besides `options`
    pub allow_fill_in: bool,
}

/// Observable holder for one field's current value.
///
/// Values live in a `watch` channel: writers replace the value atomically and
/// subscribers see the latest one.
#[derive(Debug)]
pub struct FieldModel {
    descriptor: Arc<FieldDescriptor>,
    value: watch::Sender<ModelValue>,
}

impl FieldModel {
    /// Create a model holding the descriptor's default.
    pub fn new(descriptor: Arc<FieldDescriptor>) -> Self {
        let initial = normalize(&descriptor.field_type, descriptor.default_value.clone());
        let (value, _) = watch::channel(initial);
        Self { descriptor, value }
    }

    pub fn descriptor(&self) -> &Arc<FieldDescriptor> {
        &self.descriptor
    }

    pub fn key(&self) -> &str {
        &self.descriptor.key
    }

    pub fn field_type(&self) -> &FieldType {
        &self.descriptor.field_type
    }

    /// Current value.
    pub fn get(&self) -> ModelValue {
        self.value.borrow().clone()
    }

    /// Replace the current value and notify subscribers.
    pub fn set(&self, value: impl Into<ModelValue>) {
        let value = normalize(&self.descriptor.field_type, value.into());
        self.value.send_replace(value);
    }

    /// Restore the compiled default.
    pub fn reset(&self) {
        self.set(self.descriptor.default_value.clone());
    }

    /// Watch value changes.
    pub fn subscribe(&self) -> watch::Receiver<ModelValue> {
        self.value.subscribe()
    }
}

/// Keep multi-valued models holding sequences and singular models free of
/// empty strings.
fn normalize(field_type: &FieldType, value: ModelValue) -> ModelValue {
    if field_type.is_multi() {
        return match value {
            ModelValue::Null => ModelValue::Multi(Vec::new()),
            ModelValue::Multi(items) => ModelValue::Multi(items),
            ModelValue::Text(s) if s.trim().is_empty() => ModelValue::Multi(Vec::new()),
            ModelValue::Text(s) => ModelValue::Multi(split_multi(field_type, &s)),
            ModelValue::Number(n) => ModelValue::Multi(vec![n.to_string()]),
            ModelValue::Bool(b) => ModelValue::Multi(vec![b.to_string()]),
            ModelValue::Date(d) => ModelValue::Multi(vec![d.to_rfc3339()]),
        };
    }

    match value {
        ModelValue::Text(s) if s.is_empty() => ModelValue::Null,
        other => other,
    }
}
