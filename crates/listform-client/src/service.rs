//! The list service abstraction.
//!
//! `ListService` is the seam between the form engine and the remote store.
//! `ListClient` implements it over HTTP; `MockListService` implements it in
//! memory for tests.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::types::*;

/// Operations a single form needs from the remote list store.
#[async_trait]
pub trait ListService: Send + Sync {
    /// Column metadata plus attachment and checkout policy for a list.
    async fn list_schema(&self, list: &str) -> Result<ListSchema>;

    /// Fetch one item. Deferred references are left as handles.
    async fn get_item(&self, list: &str, id: u64) -> Result<Record>;

    /// Fetch a filtered, sorted, paged collection of items.
    async fn query_items(&self, list: &str, query: &ItemQuery) -> Result<Vec<Record>>;

    /// Resolve a deferred reference. Returns the unwrapped payload, either an
    /// object or `{"results": [...]}`.
    async fn fetch_deferred(&self, uri: &str) -> Result<Value>;

    /// Write an ordered batch of column values. Returns the item id, which is
    /// newly assigned when the write creates the item.
    async fn save_item(&self, list: &str, write: &ItemWrite) -> Result<u64>;

    /// Insert a plain JSON item.
    async fn create_item(&self, list: &str, item: &Value) -> Result<Value>;

    /// Delete an item, guarded by its etag.
    async fn delete_item(&self, item: &ItemMetadata) -> Result<()>;

    /// Attach a file to an item.
    async fn add_attachment(
        &self,
        list: &str,
        item_id: u64,
        file_name: &str,
        content: &[u8],
    ) -> Result<Attachment>;

    async fn delete_attachment(&self, attachment: &Attachment) -> Result<()>;

    /// The signed-in user, including group memberships when the service
    /// returns them inline.
    async fn current_principal(&self) -> Result<Principal>;

    /// Group memberships of a user.
    async fn principal_groups(&self, principal_id: u64) -> Result<Vec<Group>>;

    async fn person_by_id(&self, id: u64) -> Result<Person>;

    /// Directory search by name, department or job title prefix.
    async fn search_people(&self, term: &str, take: u32) -> Result<Vec<Person>>;
}
