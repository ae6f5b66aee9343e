//! Local staging area for files on their way from the Graph API CDN to
//! WordPress.
//!
//! Every run gets its own [`StagingScope`] (a fresh temporary directory).
//! [`LocalFileStager::download`] streams a batch of refs to disk concurrently
//! and either returns every staged file or removes what it wrote and fails.
//! Files are written as `<name>.part` and renamed once complete, so a staged
//! name never points at a partial file.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use regex::Regex;
use tokio::io::AsyncWriteExt;

use crate::contract::{FileRef, FileStager, StagedFile, StagingScope};
use crate::error::{ClientError, StagingError};
use crate::retry::{self, RetryConfig};

/// Fetches the body behind a remote file URL into a local file.
#[async_trait]
pub trait RemoteFetch: Send + Sync {
    /// Write the body of `url` to `dest`, replacing any previous content.
    /// Returns the number of bytes written.
    async fn fetch_to(&self, url: &str, dest: &Path) -> Result<u64, ClientError>;
}

/// [`RemoteFetch`] over plain HTTP(S), retrying transient failures.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: reqwest::Client,
    retry: RetryConfig,
}

impl HttpFetcher {
    pub fn new(retry: RetryConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| ClientError::from_transport("cdn", e))?;
        Ok(Self { http, retry })
    }
}

#[async_trait]
impl RemoteFetch for HttpFetcher {
    async fn fetch_to(&self, url: &str, dest: &Path) -> Result<u64, ClientError> {
        retry::retry_with_backoff(&self.retry, retry::classify_client_error, || async {
            let response = self
                .http
                .get(url)
                .send()
                .await
                .map_err(|e| ClientError::from_transport(url, e))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ClientError::from_status(url, status.as_u16(), body));
            }

            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(dest)
                .await?;
            let mut written: u64 = 0;
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| ClientError::from_transport(url, e))?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            Ok(written)
        })
        .await
    }
}

/// [`FileStager`] writing into per-run temporary directories.
pub struct LocalFileStager<F> {
    /// Parent for scope directories; the system temp dir when `None`.
    parent: Option<PathBuf>,
    fetcher: F,
    max_concurrent: usize,
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

impl<F: RemoteFetch> LocalFileStager<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            parent: None,
            fetcher,
            max_concurrent: 4,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<PathBuf>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    async fn stage_one(
        &self,
        scope_dir: &Path,
        index: usize,
        file_ref: &FileRef,
    ) -> Result<StagedFile, StagingError> {
        let file_name = staged_file_name(index, file_ref);
        let path = scope_dir.join(&file_name);
        let partial = part_path(&path);

        let bytes = self
            .fetcher
            .fetch_to(&file_ref.url, &partial)
            .await
            .map_err(|source| StagingError::Fetch {
                url: crate::error::redact_url(&file_ref.url),
                source,
            })?;
        tokio::fs::rename(&partial, &path)
            .await
            .map_err(|source| StagingError::Write {
                path: path.clone(),
                source,
            })?;

        tracing::debug!(
            media_id = %file_ref.media_id,
            path = %path.display(),
            bytes,
            "[STAGE] Staged file"
        );
        Ok(StagedFile {
            path,
            file_name,
            kind: file_ref.kind,
        })
    }
}

#[async_trait]
impl<F: RemoteFetch> FileStager for LocalFileStager<F> {
    async fn acquire(&self) -> Result<StagingScope, StagingError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("media-relay-");
        let dir = match &self.parent {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .map_err(StagingError::Create)?;

        let scope = StagingScope::new(dir);
        tracing::info!(scope = %scope.id(), path = %scope.path().display(), "[STAGE] Acquired staging area");
        Ok(scope)
    }

    async fn download(
        &self,
        scope: &StagingScope,
        refs: &[FileRef],
    ) -> Result<Vec<StagedFile>, StagingError> {
        let scope_dir = scope.path();
        // Every transfer runs to completion, so no write can land after the
        // cleanup below.
        let transfers: Vec<_> = refs
            .iter()
            .enumerate()
            .map(|(index, file_ref)| self.stage_one(scope_dir, index, file_ref))
            .collect();
        let results: Vec<Result<StagedFile, StagingError>> =
            futures::stream::iter(transfers)
                .buffered(self.max_concurrent)
                .collect()
                .await;

        let result: Result<Vec<StagedFile>, StagingError> = results.into_iter().collect();
        if result.is_err() {
            // All or nothing: drop whatever this batch managed to write.
            for (index, file_ref) in refs.iter().enumerate() {
                let path = scope_dir.join(staged_file_name(index, file_ref));
                let _ = tokio::fs::remove_file(part_path(&path)).await;
                let _ = tokio::fs::remove_file(&path).await;
            }
        }
        result
    }

    async fn release(&self, scope: StagingScope) -> Result<(), StagingError> {
        let id = scope.id();
        let path = scope.path().to_path_buf();
        scope
            .into_dir()
            .close()
            .map_err(|source| StagingError::Release {
                path: path.clone(),
                source,
            })?;
        tracing::info!(scope = %id, path = %path.display(), "[STAGE] Released staging area");
        Ok(())
    }
}

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_-]+").expect("static regex"))
}

/// Deterministic, filesystem-safe name for the `index`-th ref of a batch.
pub fn staged_file_name(index: usize, file_ref: &FileRef) -> String {
    let stem = unsafe_chars().replace_all(&file_ref.media_id, "_");
    let ext = url_extension(&file_ref.url)
        .unwrap_or_else(|| file_ref.kind.default_extension().to_string());
    format!("{index:02}_{stem}.{ext}")
}

fn url_extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    let last = path.rsplit('/').next()?;
    let (_, ext) = last.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    let valid = !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then_some(ext)
}
