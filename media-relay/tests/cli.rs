use assert_cmd::Command;
use media_relay_core::access::key_digest;
use predicates::prelude::*;
use std::fs::write;
use std::path::Path;
use tempfile::TempDir;

const OPERATOR_KEY: &str = "correct horse battery staple";

/// Writes a config whose ledger lives in `dir` and whose access gate accepts [`OPERATOR_KEY`].
fn write_config(dir: &Path) -> std::path::PathBuf {
    write_config_with_accounts(dir, &["acme"])
}

fn write_config_with_accounts(dir: &Path, account_ids: &[&str]) -> std::path::PathBuf {
    let config_path = dir.join("relay.yaml");
    let accounts: String = account_ids
        .iter()
        .map(|id| format!("  - id: {id}\n    remote_account_id: \"17841400000000000\"\n"))
        .collect();
    let yaml = format!(
        r#"
ledger_path: {ledger}
staging_dir: {dir}
wordpress:
  base_url: http://127.0.0.1:9
  username: relay-bot
retry:
  max_retries: 0
accounts:
{accounts}access:
  key_sha256: {digest}
"#,
        ledger = dir.join("ledger.sqlite3").display(),
        dir = dir.display(),
        accounts = accounts,
        digest = key_digest(OPERATOR_KEY),
    );
    write(&config_path, yaml).expect("Writing temp config failed");
    config_path
}

fn relay() -> Command {
    let mut cmd = Command::cargo_bin("media-relay").expect("Binary exists");
    cmd.env_remove("RELAY_TOKEN_ACME")
        .env_remove("RELAY_TOKEN_GLOBEX")
        .env_remove("RELAY_NOTIFY_WEBHOOK_URL")
        .env_remove("WORDPRESS_APP_PASSWORD")
        .env("RUST_LOG", "warn");
    cmd
}

#[test]
fn help_lists_all_commands() {
    relay()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("discover")
                .and(predicate::str::contains("publish"))
                .and(predicate::str::contains("sync"))
                .and(predicate::str::contains("status")),
        );
}

#[test]
fn missing_config_file_fails() {
    relay()
        .args(["status", "--config", "does-not-exist.yaml", "--account", "acme"])
        .env("RELAY_ACCESS_KEY", OPERATOR_KEY)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}

#[test]
fn wrong_access_key_is_refused() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    relay()
        .arg("status")
        .arg("--config")
        .arg(&config)
        .args(["--account", "acme"])
        .env("RELAY_ACCESS_KEY", "guess")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Access denied"));

    assert!(
        !dir.path().join("ledger.sqlite3").exists(),
        "ledger must not be touched before the gate passes"
    );
}

#[test]
fn status_of_fresh_ledger_is_empty() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    relay()
        .arg("status")
        .arg("--config")
        .arg(&config)
        .args(["--account", "acme"])
        .env("RELAY_ACCESS_KEY", OPERATOR_KEY)
        .assert()
        .success()
        .stdout(predicate::str::contains("0 seen, 0 published, 0 pending"));
}

#[test]
fn unknown_account_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    relay()
        .arg("status")
        .arg("--config")
        .arg(&config)
        .args(["--account", "globex"])
        .env("RELAY_ACCESS_KEY", OPERATOR_KEY)
        .assert()
        .failure()
        .stderr(predicate::str::contains("not configured"));
}

#[test]
fn publish_without_account_token_does_nothing() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    relay()
        .arg("publish")
        .arg("--config")
        .arg(&config)
        .args(["--account", "acme"])
        .env("RELAY_ACCESS_KEY", OPERATOR_KEY)
        .env("WORDPRESS_APP_PASSWORD", "abcd efgh ijkl")
        .assert()
        .failure()
        .stdout(predicate::str::contains("0 published before failure"))
        .stderr(predicate::str::contains("remote token"));
}

#[test]
fn publish_without_wordpress_password_is_refused() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    relay()
        .arg("publish")
        .arg("--config")
        .arg(&config)
        .args(["--account", "acme"])
        .env("RELAY_ACCESS_KEY", OPERATOR_KEY)
        .env("RELAY_TOKEN_ACME", "graph-token")
        .assert()
        .failure()
        .stderr(predicate::str::contains("WordPress application password"));
}

#[test]
fn sync_needs_account_or_all() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    relay()
        .arg("sync")
        .arg("--config")
        .arg(&config)
        .env("RELAY_ACCESS_KEY", OPERATOR_KEY)
        .assert()
        .failure()
        .stderr(predicate::str::contains("--all"));

    relay()
        .arg("sync")
        .arg("--config")
        .arg(&config)
        .args(["--account", "acme", "--all"])
        .env("RELAY_ACCESS_KEY", OPERATOR_KEY)
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn sync_all_runs_every_account_and_counts_failures() {
    let dir = TempDir::new().unwrap();
    let config = write_config_with_accounts(dir.path(), &["acme", "globex"]);

    relay()
        .arg("sync")
        .arg("--config")
        .arg(&config)
        .arg("--all")
        .env("RELAY_ACCESS_KEY", OPERATOR_KEY)
        .env("WORDPRESS_APP_PASSWORD", "abcd efgh ijkl")
        .assert()
        .failure()
        .stdout(
            predicate::str::contains("acme: failed after 0 published")
                .and(predicate::str::contains("globex: failed after 0 published")),
        )
        .stderr(predicate::str::contains("2 of 2 account(s) failed"));
}

#[test]
fn sync_all_unreachable_webhook_never_prints_its_url() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    relay()
        .arg("sync")
        .arg("--config")
        .arg(&config)
        .arg("--all")
        .env("RELAY_ACCESS_KEY", OPERATOR_KEY)
        .env("WORDPRESS_APP_PASSWORD", "abcd efgh ijkl")
        .env("RELAY_NOTIFY_WEBHOOK_URL", "http://127.0.0.1:9/hooks/SECRET-HOOK")
        .assert()
        .failure()
        .stdout(
            predicate::str::contains("acme: failed")
                .and(predicate::str::contains("SECRET-HOOK").not()),
        )
        .stderr(
            predicate::str::contains("1 of 1 account(s) failed")
                .and(predicate::str::contains("SECRET-HOOK").not()),
        );
}

use std::sync::{Arc, Mutex};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{layer::Context, Layer, Registry};

/// Layer collecting the debug rendering of every event.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.events.lock().unwrap().push(format!("{:?}", event));
    }
}

#[tokio::test]
async fn emits_trace_initialised_event() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use media_relay::cli::{run, Cli, Commands, Target};

    let cli = Cli {
        command: Commands::Status(Target {
            config: std::path::PathBuf::from("dummy.yaml"),
            account: "acme".to_string(),
        }),
    };

    let result = run(cli).await;
    assert!(result.is_err(), "dummy config must not load");

    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("trace_initialised")),
        "Expected a 'trace_initialised' trace event, got: {:?}",
        event_msgs
    );
}
