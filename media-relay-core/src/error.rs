//! Error types shared by the pipeline and its collaborators.
//!
//! Remote clients speak [`ClientError`], the staging area speaks
//! [`StagingError`], the post ledger speaks [`LedgerError`]. The orchestrator
//! wraps all of them in [`SyncError`], attaching the offending media id.

use std::path::PathBuf;

use thiserror::Error;

/// Boxed error used where a stage can fail for more than one underlying reason.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome classification for a call against a remote API.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The remote refused the request (4xx). Never retried.
    #[error("{endpoint} rejected the request with status {status}: {body}")]
    Rejected {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// The remote could not serve the request right now (5xx, 429, timeout).
    #[error("{endpoint} is unavailable: {reason}")]
    Unavailable { endpoint: String, reason: String },

    /// The remote answered, but not with something we understand.
    #[error("unexpected response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },

    #[error("local file error: {0}")]
    Io(#[from] std::io::Error),
}

/// `url` without its query string or fragment. Graph calls carry the
/// access token as a query parameter, so no URL reaches an error unredacted.
pub fn redact_url(url: &str) -> String {
    url.split(['?', '#']).next().unwrap_or_default().to_string()
}

impl ClientError {
    /// Classify a non-success HTTP status.
    pub fn from_status(endpoint: impl AsRef<str>, status: u16, body: String) -> Self {
        let endpoint = redact_url(endpoint.as_ref());
        if status == 429 || status >= 500 {
            ClientError::Unavailable {
                endpoint,
                reason: format!("status {status}: {body}"),
            }
        } else {
            ClientError::Rejected {
                endpoint,
                status,
                body,
            }
        }
    }

    /// Classify a transport-level reqwest failure. The request URL is
    /// stripped from the reqwest error before it is rendered.
    pub fn from_transport(endpoint: impl AsRef<str>, err: reqwest::Error) -> Self {
        let endpoint = redact_url(endpoint.as_ref());
        let err = err.without_url();
        if err.is_decode() {
            return ClientError::Decode {
                endpoint,
                reason: err.to_string(),
            };
        }
        match err.status() {
            Some(status) => ClientError::from_status(endpoint, status.as_u16(), err.to_string()),
            None => ClientError::Unavailable {
                endpoint,
                reason: err.to_string(),
            },
        }
    }

    /// Whether a caller may retry this failure with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Unavailable { .. })
    }
}

/// Errors raised by the local staging area.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("failed to create staging area: {0}")]
    Create(#[source] std::io::Error),

    #[error("failed to write staged file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to fetch {url}: {source}")]
    Fetch { url: String, source: ClientError },

    #[error("failed to release staging area {path}: {source}")]
    Release {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Errors that can occur during post ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Failed to open or create the database file.
    #[error("Failed to open ledger at {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    /// Failed to run a schema migration.
    #[error("Ledger migration failed: {0}")]
    Migration(#[from] rusqlite::Error),

    #[error("Ledger query failed: {0}")]
    Query(String),

    /// Failed to spawn a blocking task.
    #[error("Failed to spawn blocking task: {0}")]
    Spawn(#[from] tokio::task::JoinError),

    /// The database schema version is newer than supported.
    #[error("Ledger schema version {found} is newer than supported version {expected}")]
    UnsupportedSchemaVersion { found: i32, expected: i32 },
}

impl LedgerError {
    pub fn query(source: rusqlite::Error) -> Self {
        Self::Query(source.to_string())
    }
}

/// Failure of a discovery or sync run, attributed to a stage and, where one
/// is in flight, to a media item.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The account lacks the credentials needed to call the remote APIs.
    #[error("account {account_id} has no {missing}; nothing was attempted")]
    Precondition {
        account_id: String,
        missing: &'static str,
    },

    #[error("account {0} not found")]
    AccountNotFound(String),

    #[error("account lookup failed: {0}")]
    AccountLookup(#[source] BoxError),

    #[error("staging area unavailable: {0}")]
    Staging(#[source] StagingError),

    #[error("failed to read pending items from the ledger: {0}")]
    LedgerRead(#[source] LedgerError),

    #[error("failed to list media for account {account_id}: {source}")]
    Listing {
        account_id: String,
        source: ClientError,
    },

    #[error("failed to fetch media {item}: {source}")]
    UpstreamFetch { item: String, source: ClientError },

    #[error("failed to download files for media {item}: {source}")]
    Download { item: String, source: BoxError },

    #[error("failed to upload files for media {item}: {source}")]
    Upload { item: String, source: ClientError },

    #[error("failed to create post for media {item}: {source}")]
    Publish { item: String, source: ClientError },

    /// The ledger write after a confirmed publish failed. The item will be
    /// published again on the next run.
    #[error("ledger write failed for media {item}, it may be published twice on retry: {source}")]
    Ledger { item: String, source: LedgerError },

    #[error("run cancelled after {after} item(s)")]
    Cancelled { after: usize },
}

impl SyncError {
    /// Media id the failure is attributed to, when one was in flight.
    pub fn item(&self) -> Option<&str> {
        match self {
            SyncError::UpstreamFetch { item, .. }
            | SyncError::Download { item, .. }
            | SyncError::Upload { item, .. }
            | SyncError::Publish { item, .. }
            | SyncError::Ledger { item, .. } => Some(item),
            _ => None,
        }
    }
}

/// Error side of a sync run: the stage failure plus how far the run got.
#[derive(Debug, Error)]
#[error("{error} (published {published} item(s) before failing)")]
pub struct SyncFailure {
    pub published: usize,
    #[source]
    pub error: SyncError,
}

impl SyncFailure {
    pub fn new(published: usize, error: SyncError) -> Self {
        Self { published, error }
    }
}

impl From<SyncError> for SyncFailure {
    fn from(error: SyncError) -> Self {
        Self::new(0, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_404_is_rejected() {
        let e = ClientError::from_status("graph", 404, "missing".into());
        assert!(matches!(e, ClientError::Rejected { status: 404, .. }));
        assert!(!e.is_retryable());
    }

    #[test]
    fn test_http_429_is_unavailable() {
        let e = ClientError::from_status("graph", 429, "slow down".into());
        assert!(e.is_retryable());
    }

    #[test]
    fn test_http_503_is_unavailable() {
        let e = ClientError::from_status("wordpress", 503, String::new());
        assert!(e.is_retryable());
    }

    #[test]
    fn test_status_error_drops_query_string() {
        let e = ClientError::from_status(
            "https://graph.example/17900?fields=id&access_token=SECRET",
            400,
            "bad".into(),
        );
        assert!(!e.to_string().contains("SECRET"), "{e}");
        assert!(e.to_string().contains("https://graph.example/17900"));
    }

    #[test]
    fn test_redact_url() {
        assert_eq!(redact_url("https://a.example/x?token=1#frag"), "https://a.example/x");
        assert_eq!(redact_url("https://a.example/x"), "https://a.example/x");
    }

    #[test]
    fn test_decode_not_retryable() {
        let e = ClientError::Decode {
            endpoint: "graph".into(),
            reason: "bad json".into(),
        };
        assert!(!e.is_retryable());
    }

    #[test]
    fn test_sync_error_item_attribution() {
        let e = SyncError::Download {
            item: "M3".into(),
            source: "boom".into(),
        };
        assert_eq!(e.item(), Some("M3"));
        assert_eq!(SyncError::Cancelled { after: 2 }.item(), None);
    }

    #[test]
    fn test_failure_display_reports_progress() {
        let failure = SyncFailure::new(
            2,
            SyncError::Publish {
                item: "M3".into(),
                source: ClientError::from_status("wordpress", 400, "bad".into()),
            },
        );
        let text = failure.to_string();
        assert!(text.contains("M3"));
        assert!(text.contains("published 2 item(s)"));
    }
}
