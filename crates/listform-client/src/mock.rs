//! In-memory list service for testing.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{Result, TransportError};
use crate::service::ListService;
use crate::types::*;

/// Mock list service for testing.
///
/// Holds lists, items and deferred payloads in memory, records every write,
/// and tracks how many attachment writes are in flight at once.
pub struct MockListService {
    available: AtomicBool,
    fail_saves: AtomicBool,
    schemas: Mutex<HashMap<String, ListSchema>>,
    items: Mutex<HashMap<(String, u64), Record>>,
    collections: Mutex<HashMap<String, Vec<Record>>>,
    deferred: Mutex<HashMap<String, Value>>,
    people: Mutex<HashMap<u64, Person>>,
    principal: Mutex<Principal>,
    groups: Mutex<Vec<Group>>,
    failing_files: Mutex<HashSet<String>>,
    saves: Mutex<Vec<(String, ItemWrite)>>,
    created: Mutex<Vec<(String, Value)>>,
    deleted: Mutex<Vec<String>>,
    uploads: Mutex<Vec<(u64, String, usize)>>,
    latency: Duration,
    next_id: AtomicU64,
    call_count: AtomicU32,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
}

impl MockListService {
    /// Create an empty service signed in as user 1.
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            fail_saves: AtomicBool::new(false),
            schemas: Mutex::new(HashMap::new()),
            items: Mutex::new(HashMap::new()),
            collections: Mutex::new(HashMap::new()),
            deferred: Mutex::new(HashMap::new()),
            people: Mutex::new(HashMap::new()),
            principal: Mutex::new(Principal::new(1, "Test User").with_login("i:0#.w|test\\user")),
            groups: Mutex::new(Vec::new()),
            failing_files: Mutex::new(HashSet::new()),
            saves: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
            next_id: AtomicU64::new(100),
            call_count: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
        }
    }

    /// Register a list schema.
    pub fn with_schema(self, list: impl Into<String>, schema: ListSchema) -> Self {
        lock(&self.schemas).insert(list.into(), schema);
        self
    }

    /// Register an item.
    pub fn with_item(self, list: impl Into<String>, id: u64, item: Value) -> Self {
        if let Some(record) = Record::from_value(item) {
            lock(&self.items).insert((list.into(), id), record);
        }
        self
    }

    /// Register the rows returned by any query against `list`.
    pub fn with_collection(self, list: impl Into<String>, rows: Vec<Value>) -> Self {
        let rows = rows.into_iter().filter_map(Record::from_value).collect();
        lock(&self.collections).insert(list.into(), rows);
        self
    }

    /// Register the payload behind a deferred URI.
    pub fn with_deferred(self, uri: impl Into<String>, payload: Value) -> Self {
        lock(&self.deferred).insert(uri.into(), payload);
        self
    }

    pub fn with_person(self, person: Person) -> Self {
        lock(&self.people).insert(person.id, person);
        self
    }

    pub fn with_principal(self, principal: Principal) -> Self {
        *lock(&self.principal) = principal;
        self
    }

    /// Groups returned by `principal_groups`.
    pub fn with_groups(self, groups: Vec<Group>) -> Self {
        *lock(&self.groups) = groups;
        self
    }

    /// Delay applied to deferred fetches, person lookups and attachment writes.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make `add_attachment` fail for this file name.
    pub fn with_failing_file(self, file_name: impl Into<String>) -> Self {
        lock(&self.failing_files).insert(file_name.into());
        self
    }

    /// Set availability.
    pub fn with_available(self, available: bool) -> Self {
        self.available.store(available, Ordering::SeqCst);
        self
    }

    /// Make every `save_item` call fail.
    pub fn with_failing_saves(self, fail: bool) -> Self {
        self.fail_saves.store(fail, Ordering::SeqCst);
        self
    }

    /// Replace a stored item, e.g. to simulate a concurrent edit.
    pub fn put_item(&self, list: &str, id: u64, item: Value) {
        if let Some(record) = Record::from_value(item) {
            lock(&self.items).insert((list.to_string(), id), record);
        }
    }

    /// Total number of service calls.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Highest number of attachment writes observed at the same time.
    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Every `save_item` call, in order.
    pub fn saves(&self) -> Vec<(String, ItemWrite)> {
        lock(&self.saves).clone()
    }

    /// Every `create_item` call, in order.
    pub fn created(&self) -> Vec<(String, Value)> {
        lock(&self.created).clone()
    }

    /// URIs of deleted items and attachments, in order.
    pub fn deleted(&self) -> Vec<String> {
        lock(&self.deleted).clone()
    }

    /// Attachment writes as `(item_id, file_name, byte_len)`, in order.
    pub fn uploads(&self) -> Vec<(u64, String, usize)> {
        lock(&self.uploads).clone()
    }

    fn enter(&self) -> Result<()> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            return Err(TransportError::Server {
                status: 503,
                message: "Mock service disabled".to_string(),
            });
        }
        Ok(())
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

impl Default for MockListService {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ListService for MockListService {
    async fn list_schema(&self, list: &str) -> Result<ListSchema> {
        self.enter()?;
        lock(&self.schemas)
            .get(list)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(format!("list '{}'", list)))
    }

    async fn get_item(&self, list: &str, id: u64) -> Result<Record> {
        self.enter()?;
        lock(&self.items)
            .get(&(list.to_string(), id))
            .cloned()
            .ok_or_else(|| TransportError::NotFound(format!("{}({})", list, id)))
    }

    async fn query_items(&self, list: &str, query: &ItemQuery) -> Result<Vec<Record>> {
        self.enter()?;
        let mut rows = lock(&self.collections).get(list).cloned().unwrap_or_default();
        if let Some(top) = query.top {
            rows.truncate(top as usize);
        }
        Ok(rows)
    }

    async fn fetch_deferred(&self, uri: &str) -> Result<Value> {
        self.enter()?;
        self.delay().await;
        lock(&self.deferred)
            .get(uri)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(uri.to_string()))
    }

    async fn save_item(&self, list: &str, write: &ItemWrite) -> Result<u64> {
        self.enter()?;
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected {
                code: "0x81020015".to_string(),
                message: "Save conflict".to_string(),
            });
        }

        let id = match write.item_id {
            Some(id) => id,
            None => self.next_id.fetch_add(1, Ordering::SeqCst),
        };
        lock(&self.saves).push((list.to_string(), write.clone()));

        let mut items = lock(&self.items);
        let record = items
            .entry((list.to_string(), id))
            .or_insert_with(|| {
                Record::from_value(json!({
                    "__metadata": {
                        "uri": format!("http://mock/_vti_bin/listdata.svc/{}({})", list, id),
                        "etag": "W/\"1\""
                    },
                    "Id": id
                }))
                .unwrap_or_default()
            });
        for field in &write.fields {
            record.insert(field.name.clone(), Value::String(field.value.clone()));
        }
        Ok(id)
    }

    async fn create_item(&self, list: &str, item: &Value) -> Result<Value> {
        self.enter()?;
        lock(&self.created).push((list.to_string(), item.clone()));
        Ok(item.clone())
    }

    async fn delete_item(&self, item: &ItemMetadata) -> Result<()> {
        self.enter()?;
        lock(&self.deleted).push(item.uri.clone());
        Ok(())
    }

    async fn add_attachment(
        &self,
        list: &str,
        item_id: u64,
        file_name: &str,
        content: &[u8],
    ) -> Result<Attachment> {
        self.enter()?;

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        self.delay().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if lock(&self.failing_files).contains(file_name) {
            return Err(TransportError::Server {
                status: 500,
                message: format!("upload of {} failed", file_name),
            });
        }

        lock(&self.uploads).push((item_id, file_name.to_string(), content.len()));
        Ok(Attachment::new(
            file_name,
            format!(
                "http://mock/_vti_bin/listdata.svc/Attachments(EntitySet='{}',ItemId={},Name='{}')",
                list, item_id, file_name
            ),
        ))
    }

    async fn delete_attachment(&self, attachment: &Attachment) -> Result<()> {
        self.enter()?;
        lock(&self.deleted).push(attachment.uri.clone());
        Ok(())
    }

    async fn current_principal(&self) -> Result<Principal> {
        self.enter()?;
        Ok(lock(&self.principal).clone())
    }

    async fn principal_groups(&self, _principal_id: u64) -> Result<Vec<Group>> {
        self.enter()?;
        Ok(lock(&self.groups).clone())
    }

    async fn person_by_id(&self, id: u64) -> Result<Person> {
        self.enter()?;
        self.delay().await;
        lock(&self.people)
            .get(&id)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(format!("person {}", id)))
    }

    async fn search_people(&self, term: &str, take: u32) -> Result<Vec<Person>> {
        self.enter()?;
        let term = term.to_lowercase();
        let mut found: Vec<Person> = lock(&self.people)
            .values()
            .filter(|p| {
                p.name.to_lowercase().starts_with(&term)
                    || p.department
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().starts_with(&term))
                    || p.job_title
                        .as_deref()
                        .is_some_and(|j| j.to_lowercase().starts_with(&term))
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found.truncate(take as usize);
        Ok(found)
    }
}
