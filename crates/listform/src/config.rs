//! Form configuration

use listform_client::ListClientConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{FormError, Result};
use crate::schema::CollisionPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormConfig {
    /// Display name of the list the form edits
    pub list_name: String,

    /// Root URL of the site hosting the list
    #[serde(default = "default_site_url")]
    pub site_url: String,

    /// Bearer token for the list service
    #[serde(default)]
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Item to open; unset for a new form
    #[serde(default)]
    pub item_id: Option<u64>,

    /// Where to go after submit or delete
    #[serde(default)]
    pub source_url: Option<String>,

    /// Redirect after submit when no source URL is set
    #[serde(default = "default_confirmation_url")]
    pub confirmation_url: String,

    /// Lower-case extensions accepted for upload
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,

    #[serde(default)]
    pub allow_delete: bool,

    /// Offer save-as-draft besides submit, even when the list has no
    /// submitted flag
    #[serde(default)]
    pub allow_save: bool,

    /// Write failures to the remote error-log list
    #[serde(default = "default_true")]
    pub enable_error_log: bool,

    #[serde(default = "default_error_log_list_name")]
    pub error_log_list_name: String,

    #[serde(default = "default_workflow_history_list_name")]
    pub workflow_history_list_name: String,

    /// Fetch the workflow history during bootstrap
    #[serde(default = "default_true")]
    pub include_workflow_history: bool,

    /// Resolve people columns to display names
    #[serde(default = "default_true")]
    pub include_user_profiles: bool,

    /// Submit requires at least one attachment
    #[serde(default)]
    pub require_attachments: bool,

    #[serde(default = "default_attachment_message")]
    pub attachment_message: String,

    /// Debug mode: no remote error log, verbose local logging
    #[serde(default)]
    pub debug: bool,

    /// Per-step time limit for pipelines (disabled when unset)
    #[serde(default)]
    pub step_timeout_secs: Option<u64>,

    /// Maximum workflow history entries
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,

    /// Maximum people search results
    #[serde(default = "default_people_search_limit")]
    pub people_search_limit: u32,

    #[serde(default)]
    pub collision_policy: CollisionPolicy,

    /// Log level for `init_tracing`
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Defaults
fn default_site_url() -> String { "http://localhost".to_string() }
fn default_timeout_secs() -> u64 { 30 }
fn default_confirmation_url() -> String { "/SitePages/Confirmation.aspx".to_string() }
fn default_allowed_extensions() -> Vec<String> {
    [
        "txt", "rtf", "zip", "pdf", "doc", "docx", "jpg", "gif", "png", "ppt", "tif", "pptx",
        "csv", "pub", "msg",
    ]
    .iter()
    .map(|ext| ext.to_string())
    .collect()
}
fn default_true() -> bool { true }
fn default_error_log_list_name() -> String { "Error Log".to_string() }
fn default_workflow_history_list_name() -> String { "Workflow History".to_string() }
fn default_attachment_message() -> String { "An attachment is required.".to_string() }
fn default_history_limit() -> u32 { 25 }
fn default_people_search_limit() -> u32 { 10 }
fn default_log_level() -> String { "info".to_string() }

impl Default for FormConfig {
    fn default() -> Self {
        Self {
            list_name: String::new(),
            site_url: default_site_url(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            item_id: None,
            source_url: None,
            confirmation_url: default_confirmation_url(),
            allowed_extensions: default_allowed_extensions(),
            allow_delete: false,
            allow_save: false,
            enable_error_log: true,
            error_log_list_name: default_error_log_list_name(),
            workflow_history_list_name: default_workflow_history_list_name(),
            include_workflow_history: true,
            include_user_profiles: true,
            require_attachments: false,
            attachment_message: default_attachment_message(),
            debug: false,
            step_timeout_secs: None,
            history_limit: default_history_limit(),
            people_search_limit: default_people_search_limit(),
            collision_policy: CollisionPolicy::default(),
            log_level: default_log_level(),
        }
    }
}

impl FormConfig {
    /// Defaults for the named list.
    pub fn for_list(list_name: impl Into<String>) -> Self {
        Self {
            list_name: list_name.into(),
            ..Default::default()
        }
    }

    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| FormError::Config(e.to_string()))
    }

    /// Load and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| FormError::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.list_name.trim().is_empty() {
            return Err(FormError::Config("list_name is required".into()));
        }
        if !self.site_url.starts_with("http://") && !self.site_url.starts_with("https://") {
            return Err(FormError::Config(format!(
                "site_url must be an http(s) URL, got '{}'",
                self.site_url
            )));
        }
        if self.timeout_secs == 0 {
            return Err(FormError::Config("timeout_secs must be positive".into()));
        }
        if self.step_timeout_secs == Some(0) {
            return Err(FormError::Config("step_timeout_secs must be positive".into()));
        }
        if self.history_limit == 0 {
            return Err(FormError::Config("history_limit must be positive".into()));
        }
        if self.allowed_extensions.iter().any(|ext| ext.starts_with('.')) {
            return Err(FormError::Config(
                "allowed_extensions are listed without a leading dot".into(),
            ));
        }
        Ok(())
    }

    /// Transport settings for [`listform_client::ListClient`].
    pub fn client_config(&self) -> ListClientConfig {
        ListClientConfig {
            site_url: self.site_url.clone(),
            api_key: self.api_key.clone(),
            timeout_secs: self.timeout_secs,
        }
    }

    /// Site URL without a trailing slash.
    pub fn site_root(&self) -> &str {
        self.site_url.trim_end_matches('/')
    }

    /// True when `extension` (without dot, any case) may be uploaded.
    pub fn allows_extension(&self, extension: &str) -> bool {
        let extension = extension.to_ascii_lowercase();
        self.allowed_extensions.iter().any(|ext| ext.eq_ignore_ascii_case(&extension))
    }

    /// Redirect target after a submit.
    pub fn submit_redirect(&self) -> String {
        self.source_url
            .clone()
            .unwrap_or_else(|| self.confirmation_url.clone())
    }

    /// Redirect target after a delete.
    pub fn delete_redirect(&self) -> String {
        self.source_url
            .clone()
            .unwrap_or_else(|| format!("{}/", self.site_root()))
    }

    /// Set `item_id` from a page location, see [`item_id_from_location`].
    pub fn with_location(mut self, location: &str) -> Self {
        if let Some(id) = item_id_from_location(location) {
            self.item_id = Some(id);
        }
        self
    }
}

/// Item id carried by a page location: a `#/id/<n>` hash route or an
/// `id=<n>` query parameter. The hash wins when both are present.
pub fn item_id_from_location(location: &str) -> Option<u64> {
    if let Some((_, hash)) = location.split_once('#') {
        let mut segments = hash.trim_start_matches('/').split('/');
        while let Some(segment) = segments.next() {
            if segment.eq_ignore_ascii_case("id") {
                if let Some(id) = segments.next().and_then(|s| s.parse().ok()) {
                    return Some(id);
                }
            }
        }
    }

    let query = location.split('#').next()?.split_once('?')?.1;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| name.eq_ignore_ascii_case("id"))
        .and_then(|(_, value)| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FormConfig::for_list("Work Orders");
        assert!(config.validate().is_ok());
        assert_eq!(config.history_limit, 25);
        assert_eq!(config.people_search_limit, 10);
        assert!(config.allows_extension("PDF"));
        assert!(!config.allows_extension("exe"));
        assert_eq!(config.submit_redirect(), "/SitePages/Confirmation.aspx");
        assert_eq!(config.delete_redirect(), "http://localhost/");
    }

    #[test]
    fn test_validate_rejects_missing_list() {
        assert!(FormConfig::default().validate().is_err());

        let config = FormConfig {
            step_timeout_secs: Some(0),
            ..FormConfig::for_list("Work Orders")
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_item_id_from_location() {
        assert_eq!(item_id_from_location("https://site/Form.aspx#/id/42"), Some(42));
        assert_eq!(item_id_from_location("https://site/Form.aspx?id=7&Source=x"), Some(7));
        assert_eq!(item_id_from_location("https://site/Form.aspx?ID=7#/id/9"), Some(9));
        assert_eq!(item_id_from_location("https://site/Form.aspx#/new"), None);
        assert_eq!(item_id_from_location("https://site/Form.aspx?id=abc"), None);
    }

    #[test]
    fn test_redirects_prefer_source() {
        let config = FormConfig {
            source_url: Some("https://site/Lists/WorkOrders".into()),
            ..FormConfig::for_list("Work Orders")
        };
        assert_eq!(config.submit_redirect(), "https://site/Lists/WorkOrders");
        assert_eq!(config.delete_redirect(), "https://site/Lists/WorkOrders");
    }
}
