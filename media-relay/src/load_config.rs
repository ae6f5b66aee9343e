/// `load_config` module: loads the static YAML config and injects secrets from the environment.
///
/// This is the only place where user-supplied YAML is parsed and mapped onto the typed
/// configuration structs of `media-relay-core`.
///
/// # Responsibilities
/// - Parse the config file into [`CliConfig`]
/// - Inject secrets that never live in the file: the WordPress application password
///   (`WORDPRESS_APP_PASSWORD`) and one Graph API token per account
///   (`RELAY_TOKEN_<ACCOUNT_ID>`, see [`token_env_var`]), and the optional failure webhook
///   URL (`RELAY_NOTIFY_WEBHOOK_URL`)
/// - Reject configs that cannot describe a working relay (duplicate account ids)
///
/// A missing account token is not a load error: the orchestrator refuses to run that
/// account and says so.
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary.
use anyhow::{bail, Context, Result};
use media_relay_core::config::{AccessConfig, AccountConfig, GraphConfig, WordpressConfig};
use media_relay_core::retry::RetryConfig;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

pub const WORDPRESS_PASSWORD_ENV: &str = "WORDPRESS_APP_PASSWORD";
pub const ACCESS_KEY_ENV: &str = "RELAY_ACCESS_KEY";
pub const NOTIFY_WEBHOOK_ENV: &str = "RELAY_NOTIFY_WEBHOOK_URL";
const TOKEN_ENV_PREFIX: &str = "RELAY_TOKEN_";

#[derive(Debug, Deserialize)]
pub struct CliConfig {
    pub ledger_path: PathBuf,
    /// Parent directory for per-run staging scopes; the system temp dir when unset.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
    #[serde(default)]
    pub graph: GraphConfig,
    pub wordpress: WordpressConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    pub access: AccessConfig,
    /// Failure webhook for batch runs. Env only: the URL is itself a credential.
    #[serde(skip)]
    pub notify_webhook_url: Option<String>,
}

/// Environment variable holding the Graph API token of `account_id`.
///
/// `acme-eu` reads `RELAY_TOKEN_ACME_EU`.
pub fn token_env_var(account_id: &str) -> String {
    let suffix: String = account_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{TOKEN_ENV_PREFIX}{suffix}")
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Loads a static YAML config file (no secrets) and injects required env vars for secrets.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = fs::read_to_string(path_ref).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
        anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e)
    })?;

    let mut config: CliConfig = serde_yaml::from_str(&config_content).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
        anyhow::anyhow!("Failed to parse config YAML: {e}")
    })?;
    info!(config_path = ?path_ref, "Parsed config YAML successfully");

    let mut seen = HashSet::new();
    for account in &config.accounts {
        if account.id.trim().is_empty() {
            bail!("Account with empty id in {:?}", path_ref);
        }
        if !seen.insert(account.id.as_str()) {
            bail!("Duplicate account id {:?} in {:?}", account.id, path_ref);
        }
    }

    match non_empty_env(WORDPRESS_PASSWORD_ENV) {
        Some(password) => config.wordpress.app_password = password,
        None => warn!(
            env = WORDPRESS_PASSWORD_ENV,
            "WordPress application password not set; publishing will be refused"
        ),
    }

    for account in &mut config.accounts {
        account.remote_token = non_empty_env(&token_env_var(&account.id));
        account.trace_loaded();
    }

    config.notify_webhook_url = non_empty_env(NOTIFY_WEBHOOK_ENV);
    info!(
        notifier = config.notify_webhook_url.is_some(),
        "Failure notifications configured"
    );

    info!(
        accounts = config.accounts.len(),
        ledger_path = ?config.ledger_path,
        "Configuration loaded"
    );
    Ok(config)
}

impl CliConfig {
    pub fn account(&self, account_id: &str) -> Result<&AccountConfig> {
        self.accounts
            .iter()
            .find(|a| a.id == account_id)
            .with_context(|| format!("Account {account_id:?} is not configured"))
    }
}
