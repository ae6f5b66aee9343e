//! # contract: domain types and the capability traits of the relay pipeline
//!
//! The orchestrator in [`crate::synchronise`] only ever talks to the traits in
//! this module. Concrete implementations live next door ([`crate::graph`],
//! [`crate::wordpress`], [`crate::stage`], [`crate::ledger`],
//! [`crate::accounts`], [`crate::notify`]); tests plug in the generated
//! `Mock*` types instead.
//!
//! ## Mocking & Testing
//! - Every trait is annotated for `mockall`, exported under the
//!   `test-export-mocks` feature (on by default) so integration tests can use
//!   them from outside the crate.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use uuid::Uuid;

use crate::error::{BoxError, ClientError, LedgerError, StagingError};

/// Source-assigned identifier of a media item.
pub type MediaId = String;

/// A customer and the credentials needed to act on its behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    /// Access token for the Graph API.
    pub remote_token: Option<String>,
    /// Instagram business account id.
    pub remote_account_id: Option<String>,
    /// Items taken before this instant are never imported.
    pub start_date: Option<DateTime<Utc>>,
}

impl Account {
    /// Remote token and remote account id, or the name of whichever is
    /// missing. Empty strings count as missing.
    pub fn credentials(&self) -> Result<(&str, &str), &'static str> {
        let token = self
            .remote_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or("remote token")?;
        let remote_id = self
            .remote_account_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or("remote account id")?;
        Ok((token, remote_id))
    }

    /// Whether an item taken at `taken_at` falls inside the import window.
    pub fn accepts(&self, taken_at: DateTime<Utc>) -> bool {
        self.start_date.map_or(true, |start| taken_at >= start)
    }
}

/// Kind of media at the source, as named by the Graph API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaKind {
    Image,
    Video,
    CarouselAlbum,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "IMAGE",
            MediaKind::Video => "VIDEO",
            MediaKind::CarouselAlbum => "CAROUSEL_ALBUM",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IMAGE" => Some(MediaKind::Image),
            "VIDEO" => Some(MediaKind::Video),
            "CAROUSEL_ALBUM" => Some(MediaKind::CarouselAlbum),
            _ => None,
        }
    }

    /// File extension used when the remote URL does not carry one.
    pub fn default_extension(&self) -> &'static str {
        match self {
            MediaKind::Video => "mp4",
            MediaKind::Image | MediaKind::CarouselAlbum => "jpg",
        }
    }
}

/// One child of a carousel album.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildMedia {
    pub id: MediaId,
    pub kind: MediaKind,
    pub media_url: Option<String>,
}

/// One unit of content at the source. Identity is `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMediaItem {
    pub id: MediaId,
    pub kind: MediaKind,
    pub caption: Option<String>,
    pub media_url: Option<String>,
    pub permalink: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub children: Vec<ChildMedia>,
}

/// A downloadable file belonging to a media item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    /// Id of the media (or carousel child) the file belongs to.
    pub media_id: MediaId,
    pub kind: MediaKind,
    pub url: String,
}

/// A local copy of a [`FileRef`], alive for as long as its [`StagingScope`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub path: PathBuf,
    pub file_name: String,
    pub kind: MediaKind,
}

/// Exclusive scratch directory for one pipeline run.
///
/// Dropping the scope removes the directory; [`FileStager::release`] does the
/// same but reports failures.
#[derive(Debug)]
pub struct StagingScope {
    id: Uuid,
    dir: TempDir,
}

impl StagingScope {
    pub fn new(dir: TempDir) -> Self {
        Self {
            id: Uuid::new_v4(),
            dir,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn into_dir(self) -> TempDir {
        self.dir
    }
}

/// Destination-side reference to an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUploadHandle {
    pub id: u64,
    pub source_url: String,
    pub mime_type: String,
}

/// Destination-side post created from uploaded files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedPost {
    pub id: u64,
    pub link: String,
}

/// Ledger counters for one account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerSummary {
    pub seen: u64,
    pub published: u64,
    pub pending: u64,
}

/// A failed account run, as reported to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureNotice {
    pub account_id: String,
    /// Items published before the failure.
    pub published: usize,
    /// Media id in flight when the run failed, if any.
    pub item: Option<String>,
    pub message: String,
}

/// Resolves an account id handed over by the access gate.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Look up an account. `Ok(None)` when the id is unknown.
    async fn resolve(&self, account_id: &str) -> Result<Option<Account>, BoxError>;
}

/// Read access to the Instagram Graph API.
///
/// Implementations classify every failure as rejected or unavailable and
/// own any retry policy.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Ids of all media owned by the remote account, newest first.
    async fn list_media(
        &self,
        token: &str,
        remote_account_id: &str,
    ) -> Result<Vec<MediaId>, ClientError>;

    async fn get_media_detail(
        &self,
        token: &str,
        media_id: &str,
    ) -> Result<RemoteMediaItem, ClientError>;

    /// Downloadable files of an item, one per carousel child for albums.
    async fn resolve_file_refs(
        &self,
        token: &str,
        item: &RemoteMediaItem,
    ) -> Result<Vec<FileRef>, ClientError>;
}

/// Scoped local staging area for downloaded files.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait FileStager: Send + Sync {
    /// Create a fresh, empty staging scope.
    async fn acquire(&self) -> Result<StagingScope, StagingError>;

    /// Download every ref into the scope. Returns all files or an error,
    /// never a partial list.
    async fn download(
        &self,
        scope: &StagingScope,
        refs: &[FileRef],
    ) -> Result<Vec<StagedFile>, StagingError>;

    /// Remove the scope and everything staged in it.
    async fn release(&self, scope: StagingScope) -> Result<(), StagingError>;
}

/// Write access to the WordPress REST API.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn upload_files(
        &self,
        files: &[StagedFile],
    ) -> Result<Vec<RemoteUploadHandle>, ClientError>;

    async fn create_post(
        &self,
        item: &RemoteMediaItem,
        handles: &[RemoteUploadHandle],
    ) -> Result<PublishedPost, ClientError>;
}

/// Durable per-account record of which media items have been published.
///
/// The published marker only moves forward; there is no way to un-publish.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait PostLedger: Send + Sync {
    /// Ids known for the account and not yet published, in a stable order.
    async fn pending_set(&self, account_id: &str) -> Result<Vec<MediaId>, LedgerError>;

    /// Insert or refresh the seen record of an item, preserving its published
    /// marker. Returns `true` when the item was not known before.
    async fn record_seen(
        &self,
        account_id: &str,
        item: &RemoteMediaItem,
    ) -> Result<bool, LedgerError>;

    /// Mark an item published with a single durable write.
    async fn mark_published(
        &self,
        account_id: &str,
        media_id: &str,
        post: &PublishedPost,
    ) -> Result<(), LedgerError>;

    async fn summary(&self, account_id: &str) -> Result<LedgerSummary, LedgerError>;
}

/// Outbound channel for failure reports of batch runs.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait FailureNotifier: Send + Sync {
    async fn notify(&self, notice: &FailureNotice) -> Result<(), ClientError>;
}
