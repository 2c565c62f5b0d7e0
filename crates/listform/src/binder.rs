//! Populate a compiled schema from a fetched record.
//!
//! Plain columns and choice columns are assigned before [`RecordBinder::bind`]
//! returns. People and multi-valued columns need follow-up reads; those run
//! as spawned tasks and land in their field models whenever they resolve.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use listform_client::{
    Attachment, ItemMetadata, ListService, Person, Principal, Record, TransportError,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::codec::{self, decode_choice_collection, decode_user_collection, person_value};
use crate::field::{FieldModel, FieldType, ModelValue};
use crate::schema::Schema;

/// Record properties that are never bound to field models.
const METADATA_KEYS: &[&str] = &[
    "__metadata",
    "ContentTypeID",
    "ContentType",
    "CreatedBy",
    "ModifiedBy",
    "Owshiddenversion",
    "Version",
    "Attachments",
    "Path",
];

/// Facts about the bound record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordInfo {
    pub id: Option<u64>,
    pub metadata: Option<ItemMetadata>,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub created_by_id: Option<u64>,
    /// The signed-in principal created the record
    pub is_author: bool,
}

impl RecordInfo {
    pub fn from_record(record: &Record, principal: &Principal) -> Self {
        let date = |key: &str| codec::decode(&FieldType::DateTime, record.get(key)).as_date();
        let created_by_id = record.created_by_id();
        Self {
            id: record.id(),
            metadata: record.metadata(),
            created: date("Created"),
            modified: date("Modified"),
            created_by_id,
            is_author: created_by_id == Some(principal.id),
        }
    }
}

/// Lookups still in flight after a bind.
#[derive(Debug, Default)]
pub struct PendingLookups {
    handles: Vec<JoinHandle<()>>,
}

impl PendingLookups {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every lookup to land. Returns how many finished without
    /// panicking.
    pub async fn settle(self) -> usize {
        join_all(self.handles)
            .await
            .into_iter()
            .filter(Result::is_ok)
            .count()
    }

    /// Stop waiting for lookups that have not landed yet.
    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// Result of a bind.
#[derive(Debug)]
pub struct BindReport {
    pub info: RecordInfo,
    pub pending: PendingLookups,
}

/// Fills field models from records.
#[derive(Clone)]
pub struct RecordBinder {
    service: Arc<dyn ListService>,
}

impl RecordBinder {
    pub fn new(service: Arc<dyn ListService>) -> Self {
        Self { service }
    }

    /// Assign the record's values to the schema's field models.
    ///
    /// Must be called from within a tokio runtime: people and multi-valued
    /// lookups are spawned onto it.
    pub fn bind(&self, record: &Record, schema: &Schema, principal: &Principal) -> BindReport {
        let info = RecordInfo::from_record(record, principal);
        let mut pending = PendingLookups::default();

        // Plain columns
        for (key, raw) in record.iter() {
            if METADATA_KEYS.contains(&key.as_str()) {
                continue;
            }
            let Some(model) = schema.get(key) else {
                continue;
            };
            if model.field_type().is_lookup() {
                continue;
            }
            model.set(codec::decode(model.field_type(), Some(raw)));
        }

        for (key, model) in schema.iter() {
            match model.field_type() {
                FieldType::User => {
                    if let Some(handle) = self.bind_person(record, key, model) {
                        pending.handles.push(handle);
                    }
                }
                FieldType::Choice => bind_choice(record, key, model),
                FieldType::MultiChoice | FieldType::UserMulti => {
                    if let Some(handle) = self.bind_collection(record, key, model) {
                        pending.handles.push(handle);
                    }
                }
                _ => {}
            }
        }

        debug!(
            item_id = ?info.id,
            pending = pending.len(),
            "Bound record"
        );
        BindReport { info, pending }
    }

    /// `<key>Id` holds the person's id; the display name needs a lookup.
    fn bind_person(
        &self,
        record: &Record,
        key: &str,
        model: &Arc<FieldModel>,
    ) -> Option<JoinHandle<()>> {
        let id_key = format!("{}Id", key);
        if !record.contains_key(&id_key) {
            return None;
        }
        let Some(id) = record.get_u64(&id_key) else {
            model.set(ModelValue::Null);
            return None;
        };

        let service = Arc::clone(&self.service);
        let model = Arc::clone(model);
        Some(tokio::spawn(async move {
            match service.person_by_id(id).await {
                Ok(person) => model.set(person_value(id, &person.name)),
                Err(e) => warn!(field = %model.key(), person_id = id, "Person lookup failed: {}", e),
            }
        }))
    }

    /// Deferred collections resolve later; inline ones bind now.
    fn bind_collection(
        &self,
        record: &Record,
        key: &str,
        model: &Arc<FieldModel>,
    ) -> Option<JoinHandle<()>> {
        let raw = record.get(key)?;
        let Some(uri) = record.deferred_uri(key).map(str::to_string) else {
            model.set(codec::decode(model.field_type(), Some(raw)));
            return None;
        };

        model.set(ModelValue::Multi(Vec::new()));
        let service = Arc::clone(&self.service);
        let model = Arc::clone(model);
        Some(tokio::spawn(async move {
            match service.fetch_deferred(&uri).await {
                Ok(payload) => {
                    let values = match model.field_type() {
                        FieldType::UserMulti => decode_user_collection(&payload),
                        _ => decode_choice_collection(&payload),
                    };
                    model.set(ModelValue::Multi(values));
                }
                Err(e) => warn!(field = %model.key(), "Collection lookup failed: {}", e),
            }
        }))
    }

    /// Read the record's attachment collection.
    pub async fn fetch_attachments(&self, record: &Record) -> Result<Vec<Attachment>, TransportError> {
        let Some(uri) = record.deferred_uri("Attachments") else {
            return Ok(Vec::new());
        };
        let payload = self.service.fetch_deferred(uri).await?;
        let rows = payload
            .get("results")
            .and_then(Value::as_array)
            .map(|rows| rows.iter().filter_map(Attachment::from_value).collect())
            .unwrap_or_default();
        Ok(rows)
    }

    /// Resolve the record's author, if the record names one.
    pub async fn fetch_author(&self, record: &Record) -> Option<Person> {
        if let Some(id) = record.created_by_id() {
            return match self.service.person_by_id(id).await {
                Ok(person) => Some(person),
                Err(e) => {
                    warn!(person_id = id, "Author lookup failed: {}", e);
                    None
                }
            };
        }

        let uri = record.deferred_uri("CreatedBy")?;
        match self.service.fetch_deferred(uri).await {
            Ok(payload) => serde_json::from_value(payload).ok(),
            Err(e) => {
                warn!("Author lookup failed: {}", e);
                None
            }
        }
    }
}

/// `<key>Value` carries the selected option.
fn bind_choice(record: &Record, key: &str, model: &Arc<FieldModel>) {
    let value_key = format!("{}Value", key);
    let raw = record.get(&value_key).or_else(|| {
        record
            .get(key)
            .filter(|raw| !codec::is_deferred(raw))
    });
    if let Some(raw) = raw {
        model.set(codec::decode(&FieldType::Choice, Some(raw)));
    }
}
