//! Local tracing setup and the remote error log.

use listform_client::ListService;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::FormConfig;

/// Install the global subscriber. `RUST_LOG` overrides `level`.
///
/// Returns false when a subscriber was already installed.
pub fn init_tracing(level: &str) -> bool {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("listform={},listform_client={},info", level, level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}

/// Title of every remote error-log entry.
pub const ERROR_LOG_TITLE: &str = "Web Form Error";

/// Best-effort writer for the remote error-log list.
///
/// Entries are HTML so they render in the list's default view. A failed
/// write is logged locally and never reaches the caller.
#[derive(Clone)]
pub struct ErrorLog {
    service: Arc<dyn ListService>,
    list_name: String,
    enabled: bool,
    location: Option<String>,
}

impl ErrorLog {
    pub fn new(service: Arc<dyn ListService>, list_name: impl Into<String>) -> Self {
        Self {
            service,
            list_name: list_name.into(),
            enabled: true,
            location: None,
        }
    }

    /// Enabled unless the form runs in debug mode or logging is switched off.
    pub fn from_config(service: Arc<dyn ListService>, config: &FormConfig) -> Self {
        Self {
            enabled: config.enable_error_log && !config.debug,
            ..Self::new(service, config.error_log_list_name.clone())
        }
    }

    /// Page the form runs on, linked from each entry.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// HTML body of an entry.
    pub fn render(&self, message: &str) -> String {
        match self.location.as_deref() {
            Some(loc) => format!(
                "<p>An error occurred at <a href=\"{loc}\" target=\"_blank\">{loc}</a></p><p>Message: {message}</p>"
            ),
            None => format!("<p>Message: {}</p>", message),
        }
    }

    /// Write one entry. Returns true when the store accepted it.
    pub async fn record(&self, message: &str) -> bool {
        if !self.enabled {
            debug!(list = %self.list_name, "Error log disabled: {}", message);
            return false;
        }

        let entry = json!({
            "Title": ERROR_LOG_TITLE,
            "Error": self.render(message),
        });
        match self.service.create_item(&self.list_name, &entry).await {
            Ok(_) => true,
            Err(e) => {
                warn!(list = %self.list_name, "Failed to write error log entry: {}", e);
                false
            }
        }
    }
}
