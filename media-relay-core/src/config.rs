use serde::{Deserialize, Serialize};
use tracing::info;

use chrono::{DateTime, Utc};

fn default_graph_base_url() -> String {
    "https://graph.facebook.com/v19.0".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_page_size() -> u32 {
    50
}

/// Where and how to reach the Instagram Graph API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default = "default_graph_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            base_url: default_graph_base_url(),
            timeout_secs: default_timeout_secs(),
            page_size: default_page_size(),
        }
    }
}

/// Status new WordPress posts are created with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    #[default]
    Publish,
    Draft,
    Private,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Publish => "publish",
            PostStatus::Draft => "draft",
            PostStatus::Private => "private",
        }
    }
}

/// Where and how to reach the WordPress REST API.
///
/// The application password is a secret and never comes from the config
/// file; the CLI injects it from the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordpressConfig {
    pub base_url: String,
    pub username: String,
    #[serde(skip)]
    pub app_password: String,
    #[serde(default)]
    pub default_status: PostStatus,
    #[serde(default)]
    pub category_ids: Vec<u64>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// A customer account as declared in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub id: String,
    #[serde(default)]
    pub remote_account_id: Option<String>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    /// Graph API token; injected from the environment.
    #[serde(skip)]
    pub remote_token: Option<String>,
}

impl AccountConfig {
    pub fn trace_loaded(&self) {
        info!(
            account_id = %self.id,
            remote_account_id = self.remote_account_id.as_deref().unwrap_or("<unset>"),
            token_present = self.remote_token.is_some(),
            start_date = ?self.start_date,
            "Loaded account"
        );
    }
}

/// Access gate settings: the sha256 hex digest of the operator key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessConfig {
    pub key_sha256: String,
    /// Restrict the key to a single account; all accounts when unset.
    #[serde(default)]
    pub account: Option<String>,
}
