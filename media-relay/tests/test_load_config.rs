use media_relay::load_config::{load_config, token_env_var};
use media_relay_core::config::PostStatus;
use serial_test::serial;
use std::env;
use std::fs::write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

fn config_file(yaml: &str) -> NamedTempFile {
    let file = NamedTempFile::new().expect("temp file");
    write(file.path(), yaml).unwrap();
    file
}

const FULL_CONFIG: &str = r#"
ledger_path: ./relay.sqlite3
staging_dir: /var/tmp/relay
graph:
  base_url: https://graph.facebook.com/v20.0
wordpress:
  base_url: https://blog.example.com
  username: relay-bot
  default_status: draft
  category_ids: [3, 7]
retry:
  max_retries: 4
accounts:
  - id: acme
    remote_account_id: "17841400000000000"
    start_date: 2024-01-01T00:00:00Z
  - id: acme-eu
    remote_account_id: "17841400000000001"
access:
  key_sha256: 5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8
"#;

#[test]
fn token_env_var_is_upper_snake() {
    assert_eq!(token_env_var("acme"), "RELAY_TOKEN_ACME");
    assert_eq!(token_env_var("acme-eu.2"), "RELAY_TOKEN_ACME_EU_2");
}

#[test]
#[serial]
fn test_load_config_injects_secrets_from_env() {
    let file = config_file(FULL_CONFIG);
    env::set_var("WORDPRESS_APP_PASSWORD", "abcd efgh ijkl");
    env::set_var("RELAY_TOKEN_ACME", "graph-token");
    env::remove_var("RELAY_TOKEN_ACME_EU");

    let config = load_config(file.path()).expect("Config should load");

    assert_eq!(config.ledger_path, PathBuf::from("./relay.sqlite3"));
    assert_eq!(config.staging_dir, Some(PathBuf::from("/var/tmp/relay")));
    assert_eq!(config.graph.base_url, "https://graph.facebook.com/v20.0");
    assert_eq!(config.graph.page_size, 50, "unset keys keep their defaults");
    assert_eq!(config.wordpress.app_password, "abcd efgh ijkl");
    assert_eq!(config.wordpress.default_status, PostStatus::Draft);
    assert_eq!(config.wordpress.category_ids, vec![3, 7]);
    assert_eq!(config.retry.max_retries, 4);
    assert_eq!(config.retry.base_delay_ms, 500);

    let acme = config.account("acme").unwrap();
    assert_eq!(acme.remote_token.as_deref(), Some("graph-token"));
    assert!(acme.start_date.is_some());
    let eu = config.account("acme-eu").unwrap();
    assert_eq!(eu.remote_token, None, "a missing token is not a load error");
    assert!(config.account("globex").is_err());

    env::remove_var("WORDPRESS_APP_PASSWORD");
    env::remove_var("RELAY_TOKEN_ACME");
}

#[test]
#[serial]
fn test_secrets_in_file_are_ignored() {
    let yaml = r#"
ledger_path: ./relay.sqlite3
wordpress:
  base_url: https://blog.example.com
  username: relay-bot
  app_password: from-the-file
accounts:
  - id: acme
    remote_token: from-the-file
access:
  key_sha256: "00"
"#;
    let file = config_file(yaml);
    env::remove_var("WORDPRESS_APP_PASSWORD");
    env::remove_var("RELAY_TOKEN_ACME");

    let config = load_config(file.path()).expect("Config should load");
    assert_eq!(config.wordpress.app_password, "");
    assert_eq!(config.accounts[0].remote_token, None);
    assert_eq!(config.retry.max_retries, 2);
}

#[test]
#[serial]
fn test_notify_webhook_comes_from_env_only() {
    let yaml = format!("{FULL_CONFIG}notify_webhook_url: https://hooks.example/from-the-file\n");
    let file = config_file(&yaml);
    env::remove_var("RELAY_NOTIFY_WEBHOOK_URL");

    let config = load_config(file.path()).unwrap();
    assert_eq!(config.notify_webhook_url, None);

    env::set_var("RELAY_NOTIFY_WEBHOOK_URL", "https://hooks.example/T0/B0/secret");
    let config = load_config(file.path()).unwrap();
    assert_eq!(
        config.notify_webhook_url.as_deref(),
        Some("https://hooks.example/T0/B0/secret")
    );

    env::remove_var("RELAY_NOTIFY_WEBHOOK_URL");
}

#[test]
#[serial]
fn test_blank_env_token_counts_as_missing() {
    let file = config_file(FULL_CONFIG);
    env::set_var("RELAY_TOKEN_ACME", "   ");

    let config = load_config(file.path()).unwrap();
    assert_eq!(config.account("acme").unwrap().remote_token, None);

    env::remove_var("RELAY_TOKEN_ACME");
}

#[test]
#[serial]
fn test_duplicate_account_ids_are_rejected() {
    let yaml = r#"
ledger_path: ./relay.sqlite3
wordpress:
  base_url: https://blog.example.com
  username: relay-bot
accounts:
  - id: acme
  - id: acme
access:
  key_sha256: "00"
"#;
    let err = load_config(config_file(yaml).path()).unwrap_err();
    assert!(err.to_string().contains("Duplicate account id"), "{err}");
}

#[test]
#[serial]
fn test_missing_required_sections_fail() {
    let yaml = "ledger_path: ./relay.sqlite3\naccounts: []\n";
    let err = load_config(config_file(yaml).path()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config YAML"), "{err}");
}

#[test]
fn test_missing_file_fails() {
    let err = load_config("/definitely/not/here.yaml").unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}
