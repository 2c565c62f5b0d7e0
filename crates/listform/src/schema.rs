//! Compile list metadata into a keyed map of observable field models.

use chrono::{DateTime, Utc};
use listform_client::{FieldSchema, ListSchema};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::codec::{parse_date, parse_number};
use crate::error::SchemaError;
use crate::field::{FieldDescriptor, FieldModel, FieldType, ModelValue};

pub use listform_client::to_camel_case;

/// Platform bookkeeping columns that never become form fields.
pub const EXCLUDED_FIELDS: &[&str] = &[
    "ContentTypeId",
    "ContentType",
    "owshiddenversion",
    "_UIVersionString",
    "Version",
    "Attachments",
    "Edit",
    "LinkTitle",
    "LinkTitleNoMenu",
    "LinkTitle2",
    "FolderChildCount",
    "ItemChildCount",
    "MetaInfo",
    "Type",
];

/// Column that marks a record as submitted rather than drafted.
pub const SUBMITTED_FIELD: &str = "IsSubmitted";

/// Default value token meaning "the current date".
const TODAY_TOKEN: &str = "[today]";

/// What to do when two columns derive the same key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Keep the first column, drop and report the rest
    #[default]
    FirstWins,
    /// Fail compilation
    Reject,
}

/// A column dropped because its key was already taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCollision {
    pub key: String,
    /// Internal name of the column that kept the key
    pub kept: String,
    /// Internal name of the dropped column
    pub dropped: String,
}

/// The compiled form model.
#[derive(Debug)]
pub struct Schema {
    pub list_id: String,
    pub title: String,
    pub enable_attachments: bool,
    pub require_checkout: bool,
    pub default_view_url: Option<String>,
    fields: BTreeMap<String, Arc<FieldModel>>,
    collisions: Vec<KeyCollision>,
    submitted_key: Option<String>,
}

impl Schema {
    pub fn get(&self, key: &str) -> Option<&Arc<FieldModel>> {
        self.fields.get(key)
    }

    pub fn descriptor(&self, key: &str) -> Option<&Arc<FieldDescriptor>> {
        self.fields.get(key).map(|m| m.descriptor())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Keys in lexicographic order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<FieldModel>)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Look a field up by its internal column name.
    pub fn by_name(&self, name: &str) -> Option<&Arc<FieldModel>> {
        self.fields.values().find(|m| m.descriptor().name == name)
    }

    /// Columns dropped under [`CollisionPolicy::FirstWins`].
    pub fn collisions(&self) -> &[KeyCollision] {
        &self.collisions
    }

    /// Key of the submitted flag, when the list has one. Enables drafts.
    pub fn submitted_key(&self) -> Option<&str> {
        self.submitted_key.as_deref()
    }

    /// Current values of every field.
    pub fn snapshot(&self) -> BTreeMap<String, ModelValue> {
        self.fields
            .iter()
            .map(|(k, m)| (k.clone(), m.get()))
            .collect()
    }

    /// Restore every field to its compiled default.
    pub fn reset_values(&self) {
        for model in self.fields.values() {
            model.reset();
        }
    }
}

/// Turns list metadata into a [`Schema`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaCompiler {
    policy: CollisionPolicy,
}

impl SchemaCompiler {
    pub fn new(policy: CollisionPolicy) -> Self {
        Self { policy }
    }

    pub fn compile(&self, list: &ListSchema) -> Result<Schema, SchemaError> {
        let now = Utc::now();
        let mut fields: BTreeMap<String, Arc<FieldModel>> = BTreeMap::new();
        let mut collisions = Vec::new();

        for field in &list.fields {
            if field.internal_name.trim().is_empty() {
                return Err(SchemaError::Malformed(format!(
                    "column '{}' has no internal name",
                    field.display_name
                )));
            }
            if !is_form_field(field) {
                continue;
            }

            let key = to_camel_case(&field.display_name);
            if key.is_empty() {
                warn!(column = %field.internal_name, "Column display name yields an empty key, skipping");
                continue;
            }

            if let Some(existing) = fields.get(&key) {
                let kept = existing.descriptor().name.clone();
                match self.policy {
                    CollisionPolicy::Reject => {
                        return Err(SchemaError::KeyCollision {
                            key,
                            first: kept,
                            second: field.internal_name.clone(),
                        });
                    }
                    CollisionPolicy::FirstWins => {
                        warn!(key = %key, kept = %kept, dropped = %field.internal_name, "Duplicate field key");
                        collisions.push(KeyCollision {
                            key,
                            kept,
                            dropped: field.internal_name.clone(),
                        });
                        continue;
                    }
                }
            }

            let descriptor = Arc::new(describe(key.clone(), field, now));
            fields.insert(key, Arc::new(FieldModel::new(descriptor)));
        }

        let submitted_key = fields
            .iter()
            .find(|(k, m)| k.as_str() == SUBMITTED_FIELD || m.descriptor().name == SUBMITTED_FIELD)
            .map(|(k, _)| k.clone());

        debug!(
            list = %list.title,
            fields = fields.len(),
            collisions = collisions.len(),
            "Compiled schema"
        );

        Ok(Schema {
            list_id: list.list_id.clone(),
            title: list.title.clone(),
            enable_attachments: list.enable_attachments,
            require_checkout: list.require_checkout,
            default_view_url: list.default_view_url.clone(),
            fields,
            collisions,
            submitted_key,
        })
    }
}

/// Compile with the default (first-wins) collision policy.
pub fn compile(list: &ListSchema) -> Result<Schema, SchemaError> {
    SchemaCompiler::default().compile(list)
}

fn is_form_field(field: &FieldSchema) -> bool {
    !field.hidden
        && !field.display_name.trim().is_empty()
        && !EXCLUDED_FIELDS.contains(&field.internal_name.as_str())
}

fn describe(key: String, field: &FieldSchema, now: DateTime<Utc>) -> FieldDescriptor {
    let field_type = FieldType::from_tag(&field.type_tag);
    let default_value = default_for(&field_type, field.default_value.as_deref(), now);
    let options = match field_type {
        FieldType::Choice | FieldType::MultiChoice => field.choices.clone(),
        _ => Vec::new(),
    };

    FieldDescriptor {
        key,
        name: field.internal_name.clone(),
        display_name: field.display_name.clone(),
        required: field.required,
        read_only: field.read_only,
        format: field.format.clone(),
        description: field.description.clone(),
        default_value,
        options,
        allow_fill_in: field.fill_in_choice,
        field_type,
    }
}

fn default_for(field_type: &FieldType, raw: Option<&str>, now: DateTime<Utc>) -> ModelValue {
    if field_type.is_multi() {
        return ModelValue::Multi(Vec::new());
    }

    let raw = raw.map(str::trim).filter(|r| !r.is_empty());
    match field_type {
        FieldType::Boolean => ModelValue::Bool(raw.is_some_and(|r| r != "0")),
        FieldType::Number | FieldType::Currency => raw
            .and_then(parse_number)
            .map(ModelValue::Number)
            .unwrap_or(ModelValue::Null),
        FieldType::DateTime => match raw {
            Some(r) if r.eq_ignore_ascii_case(TODAY_TOKEN) => ModelValue::Date(now),
            Some(r) => parse_date(r).map(ModelValue::Date).unwrap_or(ModelValue::Null),
            None => ModelValue::Null,
        },
        _ => raw
            .map(|r| ModelValue::Text(r.to_string()))
            .unwrap_or(ModelValue::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn work_orders() -> ListSchema {
        ListSchema {
            list_id: "list-guid".into(),
            title: "Work Orders".into(),
            enable_attachments: true,
            require_checkout: false,
            default_view_url: Some("/Lists/WorkOrders/AllItems.aspx".into()),
            fields: vec![
                FieldSchema::new("Title", "Title", "Text").required(),
                FieldSchema::new("Amount", "Amount", "Currency").with_default("0"),
                FieldSchema::new("Urgent", "Urgent", "Boolean").with_default("0"),
                FieldSchema::new("Billable", "Billable", "Boolean").with_default("1"),
                FieldSchema::new("Approved", "Approved", "Boolean"),
                FieldSchema::new("Status", "Status", "Choice")
                    .with_choices(["Open", "Closed"])
                    .with_default("Open"),
                FieldSchema::new("Tags", "Tags", "MultiChoice")
                    .with_choices(["A", "B", "C"])
                    .with_default("A"),
                FieldSchema::new("Comp", "Computer Name (if applicable)", "Text"),
                FieldSchema::new("Created", "Created", "DateTime").read_only(),
                FieldSchema::new("ContentType", "Content Type", "Computed"),
                FieldSchema::new("Attachments", "Attachments", "Attachments"),
                FieldSchema::new("Secret", "Secret", "Text").hidden(),
                FieldSchema::new("NoLabel", "", "Text"),
            ],
        }
    }

    #[test]
    fn test_compile_filters_and_sorts() {
        let schema = compile(&work_orders()).unwrap();
        let keys: Vec<&str> = schema.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "Amount",
                "Approved",
                "Billable",
                "ComputerNameIfApplicable",
                "Created",
                "Status",
                "Tags",
                "Title",
                "Urgent"
            ]
        );
        assert!(schema.enable_attachments);
        assert_eq!(schema.submitted_key(), None);
    }

    #[test]
    fn test_defaults_by_type() {
        let schema = compile(&work_orders()).unwrap();
        assert_eq!(schema.get("Amount").unwrap().get(), ModelValue::Number(0.0));
        assert_eq!(schema.get("Urgent").unwrap().get(), ModelValue::Bool(false));
        assert_eq!(schema.get("Billable").unwrap().get(), ModelValue::Bool(true));
        assert_eq!(schema.get("Approved").unwrap().get(), ModelValue::Bool(false));
        assert_eq!(schema.get("Status").unwrap().get(), ModelValue::Text("Open".into()));
        assert_eq!(schema.get("Tags").unwrap().get(), ModelValue::Multi(vec![]));
        assert_eq!(schema.get("Title").unwrap().get(), ModelValue::Null);
    }

    #[test]
    fn test_choice_options_keep_order() {
        let schema = compile(&work_orders()).unwrap();
        let status = schema.descriptor("Status").unwrap();
        assert_eq!(status.options, vec!["Open", "Closed"]);
        assert!(!status.allow_fill_in);
        assert!(schema.descriptor("Title").unwrap().options.is_empty());
    }

    #[test]
    fn test_today_default() {
        let mut list = work_orders();
        list.fields = vec![FieldSchema::new("Due", "Due", "DateTime").with_default("[today]")];
        let before = Utc::now();
        let schema = compile(&list).unwrap();
        let due = schema.get("Due").unwrap().get().as_date().unwrap();
        assert!(due >= before && due <= Utc::now());
    }

    #[test]
    fn test_compile_is_idempotent() {
        let list = work_orders();
        let first = compile(&list).unwrap();
        let second = compile(&list).unwrap();

        assert_eq!(
            first.keys().collect::<Vec<_>>(),
            second.keys().collect::<Vec<_>>()
        );
        for (key, model) in first.iter() {
            assert_eq!(model.descriptor(), second.descriptor(key).unwrap());
            assert_eq!(model.get(), second.get(key).unwrap().get());
        }
    }

    #[test]
    fn test_collision_first_wins() {
        let mut list = work_orders();
        list.fields = vec![
            FieldSchema::new("Cost", "Total Cost", "Currency"),
            FieldSchema::new("Cost0", "Total-Cost", "Text"),
        ];
        let schema = compile(&list).unwrap();

        assert_eq!(schema.len(), 1);
        assert_eq!(schema.descriptor("TotalCost").unwrap().name, "Cost");
        assert_eq!(
            schema.collisions(),
            &[KeyCollision {
                key: "TotalCost".into(),
                kept: "Cost".into(),
                dropped: "Cost0".into(),
            }]
        );
    }

    #[test]
    fn test_collision_reject() {
        let mut list = work_orders();
        list.fields = vec![
            FieldSchema::new("Cost", "Total Cost", "Currency"),
            FieldSchema::new("Cost0", "Total-Cost", "Text"),
        ];
        let err = SchemaCompiler::new(CollisionPolicy::Reject)
            .compile(&list)
            .unwrap_err();
        assert!(matches!(err, SchemaError::KeyCollision { ref key, .. } if key == "TotalCost"));
    }

    #[test]
    fn test_missing_internal_name_is_malformed() {
        let mut list = work_orders();
        list.fields.push(FieldSchema::new("", "Broken", "Text"));
        assert!(matches!(compile(&list), Err(SchemaError::Malformed(_))));
    }

    #[test]
    fn test_submitted_flag_detected() {
        let mut list = work_orders();
        list.fields
            .push(FieldSchema::new("IsSubmitted", "Is Submitted", "Boolean"));
        let schema = compile(&list).unwrap();
        assert_eq!(schema.submitted_key(), Some("IsSubmitted"));
        assert_eq!(schema.by_name("IsSubmitted").unwrap().key(), "IsSubmitted");
    }
}
