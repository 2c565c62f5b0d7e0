//! Types for the list service API

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Client configuration
#[derive(Debug, Clone)]
pub struct ListClientConfig {
    /// Root URL of the site hosting the lists (e.g. `https://intranet/sites/hr`)
    pub site_url: String,
    /// Optional bearer token for authentication
    pub api_key: Option<String>,
    /// Request timeout in seconds (default: 30)
    pub timeout_secs: u64,
}

impl Default for ListClientConfig {
    fn default() -> Self {
        Self {
            site_url: "http://localhost".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

impl ListClientConfig {
    /// Site URL without a trailing slash.
    pub fn site_root(&self) -> &str {
        self.site_url.trim_end_matches('/')
    }
}

// ==================== Schema ====================

/// List metadata and the declared columns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListSchema {
    /// List GUID
    pub list_id: String,
    /// Display title of the list
    pub title: String,
    /// Whether items may carry file attachments
    pub enable_attachments: bool,
    /// Whether items must be checked out before editing
    pub require_checkout: bool,
    /// Server-relative URL of the default view
    pub default_view_url: Option<String>,
    /// Declared columns in list order
    pub fields: Vec<FieldSchema>,
}

/// One declared column.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Internal (wire) name, used for writes
    pub internal_name: String,
    /// Human display name
    pub display_name: String,
    /// Declared type tag (e.g. `Text`, `Currency`, `MultiChoice`)
    pub type_tag: String,
    pub required: bool,
    pub read_only: bool,
    pub hidden: bool,
    /// Display format, e.g. `DateOnly` for date columns
    pub format: Option<String>,
    pub description: Option<String>,
    /// Default value as text
    pub default_value: Option<String>,
    /// Declared choices for choice columns, in order
    #[serde(default)]
    pub choices: Vec<String>,
    /// Whether free-text entries are allowed besides the declared choices
    #[serde(default)]
    pub fill_in_choice: bool,
}

impl FieldSchema {
    /// Create a visible, writable column.
    pub fn new(
        internal_name: impl Into<String>,
        display_name: impl Into<String>,
        type_tag: impl Into<String>,
    ) -> Self {
        Self {
            internal_name: internal_name.into(),
            display_name: display_name.into(),
            type_tag: type_tag.into(),
            ..Default::default()
        }
    }

    pub fn with_default(mut self, default_value: impl Into<String>) -> Self {
        self.default_value = Some(default_value.into());
        self
    }

    pub fn with_choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.choices = choices.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_fill_in(mut self, fill_in: bool) -> Self {
        self.fill_in_choice = fill_in;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

// ==================== Records ====================

/// Item metadata used for updates and deletes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetadata {
    /// Canonical resource URI of the item
    pub uri: String,
    /// Version tag for optimistic concurrency
    pub etag: Option<String>,
}

impl ItemMetadata {
    /// Numeric item version carried in the etag (`W/"3"` -> `3`).
    pub fn version(&self) -> Option<u64> {
        let etag = self.etag.as_deref()?;
        etag.trim_start_matches("W/")
            .trim_matches('"')
            .parse()
            .ok()
    }
}

/// An untyped item as returned by the list service.
///
/// Deferred references stay as `{"__deferred": {"uri": ...}}` handles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Wrap a JSON object. Returns `None` for any other JSON value.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Unsigned integer under `key`, numeric or string-encoded.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(value_as_u64)
    }

    /// Item id (`Id` or `ID`).
    pub fn id(&self) -> Option<u64> {
        self.get("Id")
            .or_else(|| self.get("ID"))
            .and_then(value_as_u64)
    }

    /// URI of a deferred reference stored under `key`.
    pub fn deferred_uri(&self, key: &str) -> Option<&str> {
        self.get(key)?.get("__deferred")?.get("uri")?.as_str()
    }

    /// Resource URI and etag.
    pub fn metadata(&self) -> Option<ItemMetadata> {
        let meta = self.get("__metadata")?;
        let uri = meta.get("uri")?.as_str()?.to_string();
        let etag = meta.get("etag").and_then(Value::as_str).map(str::to_string);
        Some(ItemMetadata { uri, etag })
    }

    /// Id of the user who created the item.
    pub fn created_by_id(&self) -> Option<u64> {
        self.get("CreatedById")
            .or_else(|| self.get("AuthorId"))
            .and_then(value_as_u64)
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Filter/sort/page options for collection reads.
#[derive(Debug, Clone, Default)]
pub struct ItemQuery {
    pub filter: Option<String>,
    pub select: Option<String>,
    pub orderby: Option<String>,
    pub top: Option<u32>,
}

impl ItemQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn select(mut self, select: impl Into<String>) -> Self {
        self.select = Some(select.into());
        self
    }

    pub fn orderby(mut self, orderby: impl Into<String>) -> Self {
        self.orderby = Some(orderby.into());
        self
    }

    pub fn top(mut self, top: u32) -> Self {
        self.top = Some(top);
        self
    }

    /// Render as an OData query string (without the leading `?`).
    pub fn to_query_string(&self) -> String {
        let mut params = Vec::new();
        if let Some(ref filter) = self.filter {
            params.push(format!("$filter={}", urlencoding::encode(filter)));
        }
        if let Some(ref select) = self.select {
            params.push(format!("$select={}", urlencoding::encode(select)));
        }
        if let Some(ref orderby) = self.orderby {
            params.push(format!("$orderby={}", urlencoding::encode(orderby)));
        }
        if let Some(top) = self.top {
            params.push(format!("$top={}", top));
        }
        params.join("&")
    }
}

// ==================== Writes ====================

/// One encoded column value in a write batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldUpdate {
    /// Internal column name
    pub name: String,
    /// Wire-encoded value
    pub value: String,
}

impl FieldUpdate {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// An ordered write batch for one item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemWrite {
    /// Target item; `None` creates a new item
    pub item_id: Option<u64>,
    /// Metadata of the version being replaced
    pub metadata: Option<ItemMetadata>,
    pub fields: Vec<FieldUpdate>,
}

impl ItemWrite {
    pub fn create(fields: Vec<FieldUpdate>) -> Self {
        Self {
            item_id: None,
            metadata: None,
            fields,
        }
    }

    pub fn update(item_id: u64, metadata: Option<ItemMetadata>, fields: Vec<FieldUpdate>) -> Self {
        Self {
            item_id: Some(item_id),
            metadata,
            fields,
        }
    }

    pub fn is_new(&self) -> bool {
        self.item_id.is_none()
    }
}

// ==================== Principals ====================

/// A security group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: u64,
    pub name: String,
}

impl Group {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// The signed-in user and their group memberships.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: u64,
    /// Display name
    pub title: String,
    pub login: String,
    pub email: Option<String>,
    #[serde(default)]
    pub groups: Vec<Group>,
}

impl Principal {
    pub fn new(id: u64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_login(mut self, login: impl Into<String>) -> Self {
        self.login = login.into();
        self
    }

    pub fn with_groups(mut self, groups: Vec<Group>) -> Self {
        self.groups = groups;
        self
    }
}

/// A directory entry from the user information list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Person {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(rename = "WorkEMail", default)]
    pub email: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
}

// ==================== Attachments ====================

/// A file attached to an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// File name
    pub name: String,
    /// Resource URI used to delete the attachment
    pub uri: String,
}

impl Attachment {
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
        }
    }

    /// Parse an attachment entry from a collection read.
    pub fn from_value(value: &Value) -> Option<Self> {
        let name = value.get("Name")?.as_str()?.to_string();
        let uri = value
            .get("__metadata")
            .and_then(|m| m.get("uri"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Some(Self { name, uri })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_accessors() {
        let record = Record::from_value(json!({
            "__metadata": { "uri": "http://site/_vti_bin/listdata.svc/Tasks(3)", "etag": "W/\"7\"" },
            "Id": 3,
            "CreatedById": "12",
            "Tags": { "__deferred": { "uri": "http://site/Tasks(3)/Tags" } }
        }))
        .unwrap();

        assert_eq!(record.id(), Some(3));
        assert_eq!(record.created_by_id(), Some(12));
        assert_eq!(record.deferred_uri("Tags"), Some("http://site/Tasks(3)/Tags"));
        assert_eq!(record.deferred_uri("Id"), None);
        assert_eq!(record.get_u64("CreatedById"), Some(12));
        assert_eq!(record.get_u64("Tags"), None);

        let meta = record.metadata().unwrap();
        assert_eq!(meta.version(), Some(7));
    }

    #[test]
    fn test_record_rejects_non_objects() {
        assert!(Record::from_value(json!([1, 2])).is_none());
    }

    #[test]
    fn test_query_string() {
        let query = ItemQuery::new()
            .filter("PrimaryItemID eq 4")
            .orderby("DateOccurred")
            .top(25);
        assert_eq!(
            query.to_query_string(),
            "$filter=PrimaryItemID%20eq%204&$orderby=DateOccurred&$top=25"
        );
    }

    #[test]
    fn test_person_from_user_information_list() {
        let person: Person = serde_json::from_value(json!({
            "Id": 9,
            "Name": "Jane Doe",
            "Account": "DOMAIN\\jdoe",
            "WorkEMail": "jdoe@example.com",
            "Department": "Finance"
        }))
        .unwrap();
        assert_eq!(person.id, 9);
        assert_eq!(person.email.as_deref(), Some("jdoe@example.com"));
        assert_eq!(person.job_title, None);
    }

    #[test]
    fn test_attachment_from_value() {
        let att = Attachment::from_value(&json!({
            "__metadata": { "uri": "http://site/Attachments(1)" },
            "Name": "report.pdf"
        }))
        .unwrap();
        assert_eq!(att.name, "report.pdf");
        assert_eq!(att.uri, "http://site/Attachments(1)");
    }
}
