//! Rust client for remote list services
//!
//! Provides the `ListService` abstraction a data entry form needs (schema,
//! items, deferred references, write batches, attachments, principals and
//! people search), an HTTP implementation and an in-memory mock.
//!
//! # Example
//!
//! ```rust,no_run
//! use listform_client::{FieldUpdate, ItemWrite, ListClient, ListClientConfig, ListService};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ListClient::new(ListClientConfig {
//!     site_url: "https://intranet.example.com/sites/facilities".into(),
//!     ..Default::default()
//! })?;
//!
//! // Column metadata for the form
//! let schema = client.list_schema("Work Orders").await?;
//!
//! // Write two columns to item 4
//! let item = client.get_item("Work Orders", 4).await?;
//! let write = ItemWrite::update(
//!     4,
//!     item.metadata(),
//!     vec![FieldUpdate::new("Title", "Replace hinge"), FieldUpdate::new("Amount", "120")],
//! );
//! client.save_item("Work Orders", &write).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod mock;
pub mod naming;
pub mod service;
pub mod types;

// Re-export main types
pub use client::ListClient;
pub use error::{Result, TransportError};
pub use mock::MockListService;
pub use naming::to_camel_case;
pub use service::ListService;
pub use types::*;
