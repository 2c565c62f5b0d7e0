//! Config loading and defaults integration tests

use std::io::Write;

use listform::{CollisionPolicy, FormConfig, FormError};

#[test]
fn test_minimal_config_uses_defaults() {
    let config = FormConfig::from_toml_str(r#"list_name = "Work Orders""#).unwrap();

    assert!(config.validate().is_ok());
    assert_eq!(config.site_url, "http://localhost");
    assert_eq!(config.confirmation_url, "/SitePages/Confirmation.aspx");
    assert_eq!(config.error_log_list_name, "Error Log");
    assert_eq!(config.workflow_history_list_name, "Workflow History");
    assert_eq!(config.allowed_extensions.len(), 15);
    assert_eq!(config.collision_policy, CollisionPolicy::FirstWins);
    assert!(config.enable_error_log);
    assert!(!config.allow_save);
    assert!(!config.allow_delete);
    assert!(config.step_timeout_secs.is_none());
}

#[test]
fn test_config_with_all_fields() {
    let toml_str = r#"
list_name = "Work Orders"
site_url = "https://intranet.example.com/sites/facilities/"
api_key = "secret"
timeout_secs = 10
item_id = 4
source_url = "https://intranet.example.com/sites/facilities/Lists/WorkOrders"
allowed_extensions = ["pdf", "png"]
allow_delete = true
allow_save = true
require_attachments = true
attachment_message = "Attach a quote."
debug = true
step_timeout_secs = 15
history_limit = 50
people_search_limit = 5
collision_policy = "reject"
log_level = "debug"
"#;

    let config = FormConfig::from_toml_str(toml_str).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.item_id, Some(4));
    assert_eq!(config.collision_policy, CollisionPolicy::Reject);
    assert_eq!(config.site_root(), "https://intranet.example.com/sites/facilities");
    assert!(config.allows_extension("PNG"));
    assert!(!config.allows_extension("txt"));
    assert!(config.allow_save);

    let client = config.client_config();
    assert_eq!(client.api_key.as_deref(), Some("secret"));
    assert_eq!(client.timeout_secs, 10);
}

#[test]
fn test_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "list_name = \"Work Orders\"").unwrap();
    writeln!(file, "history_limit = 10").unwrap();

    let config = FormConfig::from_file(file.path()).unwrap();
    assert_eq!(config.list_name, "Work Orders");
    assert_eq!(config.history_limit, 10);
}

#[test]
fn test_from_file_validates() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "list_name = \"Work Orders\"").unwrap();
    writeln!(file, "site_url = \"ftp://files.example.com\"").unwrap();

    let err = FormConfig::from_file(file.path()).unwrap_err();
    assert!(matches!(err, FormError::Config(msg) if msg.contains("site_url")));
}

#[test]
fn test_missing_file_and_bad_toml() {
    let dir = tempfile::tempdir().unwrap();
    assert!(FormConfig::from_file(dir.path().join("missing.toml")).is_err());

    assert!(matches!(
        FormConfig::from_toml_str("list_name = ["),
        Err(FormError::Config(_))
    ));
    // list_name has no default
    assert!(FormConfig::from_toml_str("debug = true").is_err());
}

#[test]
fn test_location_sets_item_id() {
    let config = FormConfig::for_list("Work Orders").with_location("https://site/Form.aspx#/id/12");
    assert_eq!(config.item_id, Some(12));

    let config = FormConfig::for_list("Work Orders").with_location("https://site/Form.aspx");
    assert_eq!(config.item_id, None);
}
