//! Schema-driven data entry forms bound to a remote list service
//!
//! A list's column metadata compiles into a [`Schema`] of observable
//! [`FieldModel`]s. Records fetched from the list bind into those models,
//! edits flow back through the value codec, and a [`FormController`] drives
//! bootstrap, save, submit, delete and attachment uploads as ordered
//! [`pipeline`]s.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use listform::{FormConfig, FormController, StaticSurface};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FormConfig::from_file("workorders.toml")?;
//! listform::logging::init_tracing(&config.log_level);
//!
//! let form = FormController::connect(config, Arc::new(StaticSurface::generated()))?
//!     .with_location("https://intranet.example.com/SitePages/WorkOrder.aspx#/id/4");
//! form.initialize().await?;
//!
//! form.field_model("Amount").await?.set(120.0);
//! form.save_editable(true).await?;
//! # Ok(())
//! # }
//! ```

pub mod attachments;
pub mod binder;
pub mod codec;
pub mod config;
pub mod controller;
pub mod error;
pub mod field;
pub mod history;
pub mod logging;
pub mod permissions;
pub mod pipeline;
pub mod schema;
pub mod surface;
pub mod validation;

// Re-export main types
pub use attachments::{AttachmentUploader, PendingFile, UploadReport};
pub use binder::{BindReport, PendingLookups, RecordBinder, RecordInfo};
pub use config::FormConfig;
pub use controller::{FormController, FormEvent, FormSession};
pub use error::{DecodeError, FormError, Result, SchemaError};
pub use field::{FieldDescriptor, FieldModel, FieldType, ModelValue};
pub use history::HistoryEntry;
pub use logging::ErrorLog;
pub use permissions::{is_member, PermissionDenial, VisibilityContext};
pub use pipeline::{Continuation, Pipeline, PipelineState, Step, StepOutcome};
pub use schema::{compile, CollisionPolicy, Schema, SchemaCompiler};
pub use surface::{RenderedSurface, StaticSurface, SurfaceElement, SurfaceRuntime};
pub use validation::Violation;
