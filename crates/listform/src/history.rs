//! Workflow history for the bound item.

use chrono::{DateTime, Utc};
use listform_client::{ItemQuery, ListService, Record, TransportError};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::codec;
use crate::field::FieldType;

/// One workflow history row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub description: String,
    pub occurred: Option<DateTime<Utc>>,
}

impl HistoryEntry {
    fn from_record(record: &Record) -> Self {
        Self {
            description: record
                .get("Description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            occurred: codec::decode(&FieldType::DateTime, record.get("DateOccurred")).as_date(),
        }
    }
}

/// Query for the history rows of one item, oldest first.
pub fn history_query(list_id: &str, item_id: u64, limit: u32) -> ItemQuery {
    ItemQuery::new()
        .filter(format!(
            "ListID eq '{}' and PrimaryItemID eq {}",
            list_id, item_id
        ))
        .select("Description,DateOccurred")
        .orderby("DateOccurred")
        .top(limit)
}

/// Fetch the history of `item_id` in the list identified by `list_id`.
pub async fn fetch_history(
    service: &dyn ListService,
    history_list: &str,
    list_id: &str,
    item_id: u64,
    limit: u32,
) -> Result<Vec<HistoryEntry>, TransportError> {
    let rows = service
        .query_items(history_list, &history_query(list_id, item_id, limit))
        .await?;
    let entries: Vec<HistoryEntry> = rows.iter().map(HistoryEntry::from_record).collect();
    debug!(item_id, entries = entries.len(), "Fetched workflow history");
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use listform_client::MockListService;
    use serde_json::json;

    #[test]
    fn test_history_query() {
        let query = history_query("{ABC}", 4, 25);
        assert_eq!(query.filter.as_deref(), Some("ListID eq '{ABC}' and PrimaryItemID eq 4"));
        assert_eq!(query.orderby.as_deref(), Some("DateOccurred"));
        assert_eq!(query.top, Some(25));
    }

    #[tokio::test]
    async fn test_fetch_history() {
        let service = MockListService::new().with_collection(
            "Workflow History",
            vec![
                json!({ "Description": "Submitted", "DateOccurred": "/Date(1442707200000)/" }),
                json!({ "Description": "Approved", "DateOccurred": "2015-09-21T08:00:00Z" }),
                json!({ "Description": "Closed" }),
            ],
        );

        let entries = fetch_history(&service, "Workflow History", "{ABC}", 4, 2)
            .await
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].description, "Submitted");
        assert_eq!(
            codec::format_date(&entries[0].occurred.unwrap()),
            "2015-09-20T00:00:00.000Z"
        );
        assert!(entries[1].occurred.is_some());
    }
}
