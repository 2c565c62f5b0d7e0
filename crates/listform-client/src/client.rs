//! HTTP client for the list service
//!
//! Reads, inserts and deletes go through the OData endpoints
//! (`_vti_bin/listdata.svc` and `_api`). Column writes and attachment uploads
//! go through the `Lists.asmx` SOAP service, which accepts an ordered batch
//! of internal column names.

use async_trait::async_trait;
use base64::Engine;
use regex::Regex;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::naming::to_camel_case;
use crate::service::ListService;
use crate::types::*;

const ODATA_VERBOSE: &str = "application/json;odata=verbose";
const SOAP_NS: &str = "http://schemas.microsoft.com/sharepoint/soap/";

/// HTTP client for a site's lists
///
/// # Example
///
/// ```rust,no_run
/// use listform_client::{ListClient, ListClientConfig, ListService};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = ListClient::new(ListClientConfig {
///     site_url: "https://intranet.example.com/sites/facilities".into(),
///     ..Default::default()
/// })?;
///
/// let schema = client.list_schema("Work Orders").await?;
/// let item = client.get_item("Work Orders", 4).await?;
/// # Ok(())
/// # }
/// ```
pub struct ListClient {
    config: ListClientConfig,
    client: Client,
}

impl ListClient {
    /// Create a new list client
    pub fn new(config: ListClientConfig) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static(ODATA_VERBOSE));
        if let Some(ref api_key) = config.api_key {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| TransportError::Config(format!("Invalid API key: {}", e)))?;
            headers.insert(header::AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &ListClientConfig {
        &self.config
    }

    fn listdata_url(&self, entity_set: &str) -> String {
        format!(
            "{}/_vti_bin/listdata.svc/{}",
            self.config.site_root(),
            entity_set
        )
    }

    fn list_url(&self, list: &str) -> String {
        self.listdata_url(&to_camel_case(list))
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/_api/{}", self.config.site_root(), path)
    }

    fn soap_url(&self) -> String {
        format!("{}/_vti_bin/Lists.asmx", self.config.site_root())
    }

    // ==================== Read API ====================

    async fn get_json(&self, url: &str) -> Result<Value> {
        debug!(url = %url, "GET");
        let response = self.client.get(url).send().await?;
        let body: Value = self.handle_response(response).await?;
        unwrap_d(body)
    }

    async fn get_collection(&self, url: &str) -> Result<Vec<Value>> {
        let payload = self.get_json(url).await?;
        into_results(payload)
    }

    // ==================== SOAP API ====================

    async fn soap_request(&self, action: &str, body: &str) -> Result<String> {
        let envelope = format!(
            concat!(
                r#"<?xml version="1.0" encoding="utf-8"?>"#,
                r#"<soap:Envelope xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" "#,
                r#"xmlns:xsd="http://www.w3.org/2001/XMLSchema" "#,
                r#"xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">"#,
                "<soap:Body>{}</soap:Body></soap:Envelope>"
            ),
            body
        );

        debug!(action = %action, "SOAP request");
        let response = self
            .client
            .post(self.soap_url())
            .header(header::CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", format!("{}{}", SOAP_NS, action))
            .body(envelope)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            let message = capture(fault_pattern(), &text).unwrap_or(text);
            return Err(TransportError::Server {
                status: status.as_u16(),
                message,
            });
        }
        Ok(text)
    }

    async fn post_delete(&self, uri: &str, etag: Option<&str>) -> Result<()> {
        let mut request = self
            .client
            .post(uri)
            .header("X-HTTP-Method", "DELETE");
        if let Some(etag) = etag {
            request = request.header(header::IF_MATCH, etag);
        }

        let response = request.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(TransportError::NotFound(uri.to_string()));
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Server {
                status,
                message: body,
            });
        }
        Ok(())
    }

    // ==================== Helpers ====================

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        if response.status() == StatusCode::NOT_FOUND {
            return Err(TransportError::NotFound(response.url().to_string()));
        }

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Server {
                status,
                message: body,
            });
        }

        let body = response.json().await?;
        Ok(body)
    }
}

#[async_trait]
impl ListService for ListClient {
    async fn list_schema(&self, list: &str) -> Result<ListSchema> {
        let url = self.api_url(&format!(
            "web/lists/GetByTitle('{}')?$expand=Fields",
            urlencoding::encode(&list.replace('\'', "''"))
        ));
        let payload = self.get_json(&url).await?;
        let wire: ListWire = serde_json::from_value(payload)?;
        Ok(wire.into())
    }

    async fn get_item(&self, list: &str, id: u64) -> Result<Record> {
        let url = format!("{}({})", self.list_url(list), id);
        let payload = self.get_json(&url).await?;
        Record::from_value(payload)
            .ok_or_else(|| TransportError::InvalidResponse(format!("item {} is not an object", id)))
    }

    async fn query_items(&self, list: &str, query: &ItemQuery) -> Result<Vec<Record>> {
        let mut url = self.list_url(list);
        let qs = query.to_query_string();
        if !qs.is_empty() {
            url.push('?');
            url.push_str(&qs);
        }

        let rows = self.get_collection(&url).await?;
        Ok(rows.into_iter().filter_map(Record::from_value).collect())
    }

    async fn fetch_deferred(&self, uri: &str) -> Result<Value> {
        match self.get_json(uri).await? {
            Value::Array(rows) => Ok(serde_json::json!({ "results": rows })),
            other => Ok(other),
        }
    }

    async fn save_item(&self, list: &str, write: &ItemWrite) -> Result<u64> {
        let batch = build_update_batch(write);
        let body = format!(
            r#"<UpdateListItems xmlns="{}"><listName>{}</listName><updates>{}</updates></UpdateListItems>"#,
            SOAP_NS,
            xml_text(list),
            batch
        );

        let response = self.soap_request("UpdateListItems", &body).await?;
        let id = parse_batch_result(&response, write.item_id)?;
        debug!(list = %list, item_id = id, fields = write.fields.len(), "Saved item");
        Ok(id)
    }

    async fn create_item(&self, list: &str, item: &Value) -> Result<Value> {
        let response = self
            .client
            .post(self.list_url(list))
            .header(header::CONTENT_TYPE, "application/json")
            .json(item)
            .send()
            .await?;
        let body: Value = self.handle_response(response).await?;
        unwrap_d(body)
    }

    async fn delete_item(&self, item: &ItemMetadata) -> Result<()> {
        self.post_delete(&item.uri, Some(item.etag.as_deref().unwrap_or("*")))
            .await
    }

    async fn add_attachment(
        &self,
        list: &str,
        item_id: u64,
        file_name: &str,
        content: &[u8],
    ) -> Result<Attachment> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(content);
        let body = format!(
            concat!(
                r#"<AddAttachment xmlns="{}"><listName>{}</listName>"#,
                "<listItemID>{}</listItemID><fileName>{}</fileName>",
                "<attachment>{}</attachment></AddAttachment>"
            ),
            SOAP_NS,
            xml_text(list),
            item_id,
            xml_text(file_name),
            encoded
        );

        let response = self.soap_request("AddAttachment", &body).await?;
        if capture(add_attachment_pattern(), &response).is_none() {
            return Err(TransportError::InvalidResponse(
                "AddAttachment returned no result URL".to_string(),
            ));
        }

        let uri = format!(
            "{}/_vti_bin/listdata.svc/Attachments(EntitySet='{}',ItemId={},Name='{}')",
            self.config.site_root(),
            to_camel_case(list),
            item_id,
            urlencoding::encode(file_name)
        );
        Ok(Attachment::new(file_name, uri))
    }

    async fn delete_attachment(&self, attachment: &Attachment) -> Result<()> {
        self.post_delete(&attachment.uri, None).await
    }

    async fn current_principal(&self) -> Result<Principal> {
        let url = self.api_url("Web/CurrentUser?$expand=Groups");
        let payload = self.get_json(&url).await?;
        let wire: PrincipalWire = serde_json::from_value(payload)?;
        Ok(wire.into())
    }

    async fn principal_groups(&self, principal_id: u64) -> Result<Vec<Group>> {
        let url = self.api_url(&format!("Web/GetUserById({})/Groups", principal_id));
        let rows = self.get_collection(&url).await?;
        let mut groups = Vec::with_capacity(rows.len());
        for row in rows {
            let wire: GroupWire = serde_json::from_value(row)?;
            groups.push(wire.into());
        }
        Ok(groups)
    }

    async fn person_by_id(&self, id: u64) -> Result<Person> {
        let url = format!("{}({})", self.listdata_url("UserInformationList"), id);
        let payload = self.get_json(&url).await?;
        Ok(serde_json::from_value(payload)?)
    }

    async fn search_people(&self, term: &str, take: u32) -> Result<Vec<Person>> {
        let term = term.replace('\'', "''");
        let query = ItemQuery::new()
            .filter(format!(
                "(startswith(Name,'{0}') or startswith(Department,'{0}') or startswith(JobTitle,'{0}')) and Hidden eq false",
                term
            ))
            .orderby("Name")
            .top(take);
        let url = format!(
            "{}?{}",
            self.listdata_url("UserInformationList"),
            query.to_query_string()
        );

        let rows = self.get_collection(&url).await?;
        let mut people = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_value::<Person>(row) {
                Ok(person) => people.push(person),
                Err(e) => warn!("Skipping malformed directory entry: {}", e),
            }
        }
        Ok(people)
    }
}

// ==================== Wire formats ====================

#[derive(Debug, Deserialize)]
struct Results<T> {
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListWire {
    id: String,
    title: String,
    #[serde(default)]
    enable_attachments: bool,
    #[serde(default)]
    force_checkout: bool,
    #[serde(default)]
    default_view_url: Option<String>,
    fields: Results<FieldWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FieldWire {
    internal_name: String,
    title: Option<String>,
    type_as_string: String,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    read_only_field: bool,
    #[serde(default)]
    hidden: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    default_value: Option<String>,
    #[serde(default)]
    choices: Option<Results<String>>,
    #[serde(default)]
    fill_in_choice: Option<bool>,
    #[serde(default)]
    display_format: Option<i64>,
}

impl From<ListWire> for ListSchema {
    fn from(wire: ListWire) -> Self {
        Self {
            list_id: wire.id,
            title: wire.title,
            enable_attachments: wire.enable_attachments,
            require_checkout: wire.force_checkout,
            default_view_url: wire.default_view_url,
            fields: wire.fields.results.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<FieldWire> for FieldSchema {
    fn from(wire: FieldWire) -> Self {
        let format = if wire.type_as_string.eq_ignore_ascii_case("DateTime") {
            match wire.display_format {
                Some(0) => Some("DateOnly".to_string()),
                Some(_) => Some("DateTime".to_string()),
                None => None,
            }
        } else {
            None
        };

        Self {
            internal_name: wire.internal_name,
            display_name: wire.title.unwrap_or_default(),
            type_tag: wire.type_as_string,
            required: wire.required,
            read_only: wire.read_only_field,
            hidden: wire.hidden,
            format,
            description: wire.description.filter(|d| !d.is_empty()),
            default_value: wire.default_value,
            choices: wire.choices.map(|c| c.results).unwrap_or_default(),
            fill_in_choice: wire.fill_in_choice.unwrap_or(false),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GroupWire {
    id: u64,
    title: String,
}

impl From<GroupWire> for Group {
    fn from(wire: GroupWire) -> Self {
        Group::new(wire.id, wire.title)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PrincipalWire {
    id: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    login_name: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    groups: Option<Results<GroupWire>>,
}

impl From<PrincipalWire> for Principal {
    fn from(wire: PrincipalWire) -> Self {
        Principal {
            id: wire.id,
            title: wire.title,
            login: wire.login_name,
            email: wire.email.filter(|e| !e.is_empty()),
            groups: wire
                .groups
                .map(|g| g.results.into_iter().map(Into::into).collect())
                .unwrap_or_default(),
        }
    }
}

/// Strip the `{"d": ...}` envelope of verbose OData responses.
fn unwrap_d(body: Value) -> Result<Value> {
    match body {
        Value::Object(mut map) => map
            .remove("d")
            .ok_or_else(|| TransportError::InvalidResponse("missing 'd' envelope".to_string())),
        _ => Err(TransportError::InvalidResponse(
            "expected a JSON object".to_string(),
        )),
    }
}

/// Collection payloads come as a bare array or as `{"results": [...]}`.
fn into_results(payload: Value) -> Result<Vec<Value>> {
    match payload {
        Value::Array(rows) => Ok(rows),
        Value::Object(mut map) => match map.remove("results") {
            Some(Value::Array(rows)) => Ok(rows),
            _ => Err(TransportError::InvalidResponse(
                "expected a results collection".to_string(),
            )),
        },
        _ => Err(TransportError::InvalidResponse(
            "expected a results collection".to_string(),
        )),
    }
}

// ==================== Batch encoding ====================

/// Build the `UpdateListItems` batch for one item.
pub fn build_update_batch(write: &ItemWrite) -> String {
    let cmd = if write.is_new() { "New" } else { "Update" };
    let mut batch = format!("<Batch OnError='Continue'><Method ID='1' Cmd='{}'>", cmd);

    for field in &write.fields {
        batch.push_str(&format!(
            "<Field Name='{}'>{}</Field>",
            xml_text(&field.name),
            escape_column_value(&field.value)
        ));
    }

    match write.item_id {
        Some(id) => {
            if let Some(version) = write.metadata.as_ref().and_then(ItemMetadata::version) {
                batch.push_str(&format!(
                    "<Field Name='owshiddenversion'>{}</Field>",
                    version
                ));
            }
            batch.push_str(&format!("<Field Name='ID'>{}</Field>", id));
        }
        None => batch.push_str("<Field Name='ID'>New</Field>"),
    }

    batch.push_str("</Method></Batch>");
    batch
}

/// Escape a column value for the batch body.
///
/// Bare ampersands become `&amp;` while existing entity references are kept.
/// `<` is escaped unless the value is a CDATA section.
pub fn escape_column_value(value: &str) -> String {
    let is_cdata = value.starts_with("<![CDATA[") && value.ends_with("]]>");
    let mut out = String::with_capacity(value.len());

    for (i, ch) in value.char_indices() {
        match ch {
            '&' if !starts_entity(&value[i + 1..]) => out.push_str("&amp;"),
            '<' if !is_cdata => out.push_str("&lt;"),
            _ => out.push(ch),
        }
    }
    out
}

/// `[a-zA-Z]{1,8};` or `#[0-9]{1,7};` at the start of `rest`.
fn starts_entity(rest: &str) -> bool {
    let bytes = rest.as_bytes();
    let (body, max) = match bytes.first() {
        Some(b'#') => (&bytes[1..], 7),
        _ => (bytes, 8),
    };
    let numeric = bytes.first() == Some(&b'#');

    let len = body
        .iter()
        .take_while(|b| {
            if numeric {
                b.is_ascii_digit()
            } else {
                b.is_ascii_alphabetic()
            }
        })
        .count();
    (1..=max).contains(&len) && body.get(len) == Some(&b';')
}

fn xml_text(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\'', "&apos;")
        .replace('"', "&quot;")
}

/// Interpret an `UpdateListItems` response.
pub fn parse_batch_result(response: &str, item_id: Option<u64>) -> Result<u64> {
    let code = capture(error_code_pattern(), response);
    if let Some(text) = capture(error_text_pattern(), response).filter(|t| !t.trim().is_empty()) {
        return Err(TransportError::Rejected {
            code: code.unwrap_or_default(),
            message: text.trim().to_string(),
        });
    }
    if let Some(code) = code.filter(|c| c != "0x00000000") {
        return Err(TransportError::Rejected {
            message: format!("list service returned {}", code),
            code,
        });
    }

    match capture(row_id_pattern(), response).and_then(|id| id.parse().ok()) {
        Some(id) => Ok(id),
        None => item_id.ok_or_else(|| {
            TransportError::InvalidResponse("batch result carries no item id".to_string())
        }),
    }
}

fn capture(pattern: &Regex, text: &str) -> Option<String> {
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn error_text_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)<ErrorText>(.*?)</ErrorText>").expect("static pattern"))
}

fn error_code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"<ErrorCode>\s*(0x[0-9a-fA-F]+)\s*</ErrorCode>").expect("static pattern")
    })
}

fn row_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"ows_ID=['"](\d+)['"]"#).expect("static pattern"))
}

fn add_attachment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)<AddAttachmentResult>(.*?)</AddAttachmentResult>").expect("static pattern")
    })
}

fn fault_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)<(?:errorstring|faultstring)[^>]*>(.*?)</(?:errorstring|faultstring)>")
            .expect("static pattern")
    })
}
