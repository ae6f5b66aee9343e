//! High-level pipeline: relays an account's pending Instagram media into WordPress posts.
//!
//! For every pending item the orchestrator runs
//! fetch detail → resolve + download files → upload files → create post → mark published,
//! strictly in that order and one item at a time.
//!
//! # Major Types
//! - [`SyncOrchestrator`]: owns the collaborators, exposes [`SyncOrchestrator::discover`]
//!   and [`SyncOrchestrator::run_sync`]
//! - [`SyncReport`] / [`DiscoveryReport`]: what a run did, for logs and the CLI
//!
//! # Responsibilities
//! - Fail-fast: the first failing stage aborts the run; later items are not attempted
//! - Idempotency: an item is marked published only after its post was created, and
//!   already-published items never come back from the ledger
//! - Cleanup: the run's staging scope is released whatever the outcome
//! - Cancellation is honoured between items, never mid-item
//!
//! # Error Handling
//! Every failure is a [`SyncError`] naming the stage and, where one was in flight, the
//! media id. `run_sync` wraps it in a [`SyncFailure`] carrying the number of items
//! published before the failure. Nothing here retries; the clients do.
//!
//! # Concurrency
//! At most one run per account at a time is assumed; callers serialise runs.
//! The orchestrator holds no lock.

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::contract::{
    Account, AccountDirectory, FileStager, MediaSource, PostLedger, PublishedPost, Publisher,
    StagingScope,
};
use crate::error::{SyncError, SyncFailure};

/// Outcome of a successful [`SyncOrchestrator::run_sync`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub account_id: String,
    /// Items advanced to published in this run, in processing order.
    pub published: Vec<PublishedItemReport>,
}

impl SyncReport {
    pub fn published_count(&self) -> usize {
        self.published.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedItemReport {
    pub media_id: String,
    pub post_id: u64,
    pub link: String,
}

/// Outcome of a successful [`SyncOrchestrator::discover`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub account_id: String,
    /// Media ids returned by the source.
    pub listed: usize,
    /// Items the ledger had not seen before.
    pub recorded_new: usize,
    /// Already known items whose seen record was refreshed.
    pub refreshed: usize,
    /// Items taken before the account's start date.
    pub skipped_before_start: usize,
}

/// The relay pipeline, composed from explicitly passed collaborators.
pub struct SyncOrchestrator<A, M, S, P, L> {
    accounts: A,
    media: M,
    stager: S,
    publisher: P,
    ledger: L,
    cancel: CancellationToken,
}

impl<A, M, S, P, L> SyncOrchestrator<A, M, S, P, L>
where
    A: AccountDirectory,
    M: MediaSource,
    S: FileStager,
    P: Publisher,
    L: PostLedger,
{
    pub fn new(accounts: A, media: M, stager: S, publisher: P, ledger: L) -> Self {
        Self {
            accounts,
            media,
            stager,
            publisher,
            ledger,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop runs between items once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Resolve the account and check its credentials. No remote I/O happens
    /// before this succeeds.
    async fn authorised_account(&self, account_id: &str) -> Result<Account, SyncError> {
        let account = self
            .accounts
            .resolve(account_id)
            .await
            .map_err(SyncError::AccountLookup)?
            .ok_or_else(|| SyncError::AccountNotFound(account_id.to_string()))?;

        if let Err(missing) = account.credentials() {
            warn!(account_id, missing, "[SYNC] Account lacks credentials, refusing to run");
            return Err(SyncError::Precondition {
                account_id: account_id.to_string(),
                missing,
            });
        }
        Ok(account)
    }

    /// List the account's remote media and record every item inside the
    /// import window in the ledger, which is what makes it pending.
    pub async fn discover(&self, account_id: &str) -> Result<DiscoveryReport, SyncError> {
        let account = self.authorised_account(account_id).await?;
        let (token, remote_account_id) = account
            .credentials()
            .map_err(|missing| SyncError::Precondition {
                account_id: account_id.to_string(),
                missing,
            })?;

        info!(account_id, "[SYNC] Starting discovery");
        let media_ids = self
            .media
            .list_media(token, remote_account_id)
            .await
            .map_err(|source| SyncError::Listing {
                account_id: account_id.to_string(),
                source,
            })?;

        let mut report = DiscoveryReport {
            account_id: account_id.to_string(),
            listed: media_ids.len(),
            ..Default::default()
        };

        for media_id in &media_ids {
            if self.cancel.is_cancelled() {
                return Err(SyncError::Cancelled {
                    after: report.recorded_new + report.refreshed,
                });
            }
            let detail = self
                .media
                .get_media_detail(token, media_id)
                .await
                .map_err(|source| SyncError::UpstreamFetch {
                    item: media_id.clone(),
                    source,
                })?;

            if !account.accepts(detail.timestamp) {
                report.skipped_before_start += 1;
                continue;
            }

            let is_new = self
                .ledger
                .record_seen(account_id, &detail)
                .await
                .map_err(|source| SyncError::Ledger {
                    item: media_id.clone(),
                    source,
                })?;
            if is_new {
                report.recorded_new += 1;
            } else {
                report.refreshed += 1;
            }
        }

        info!(
            account_id,
            listed = report.listed,
            new = report.recorded_new,
            refreshed = report.refreshed,
            skipped = report.skipped_before_start,
            "[SYNC] Discovery complete"
        );
        Ok(report)
    }

    /// Publish every pending item of the account.
    ///
    /// On failure the returned [`SyncFailure`] says how many items were
    /// published before the failing one. The staging scope is released on
    /// every path.
    pub async fn run_sync(&self, account_id: &str) -> Result<SyncReport, SyncFailure> {
        let account = self.authorised_account(account_id).await?;

        let pending = self
            .ledger
            .pending_set(account_id)
            .await
            .map_err(SyncError::LedgerRead)?;
        info!(account_id, pending = pending.len(), "[SYNC] Starting publish run");

        let scope = self.stager.acquire().await.map_err(SyncError::Staging)?;

        let mut report = SyncReport {
            account_id: account_id.to_string(),
            published: Vec::new(),
        };
        let outcome = self
            .publish_pending(&account, &pending, &scope, &mut report)
            .await;

        // Remote side effects are committed by now; a failed release is
        // only worth a warning.
        let scope_id = scope.id();
        if let Err(e) = self.stager.release(scope).await {
            warn!(account_id, scope = %scope_id, error = %e, "[SYNC] Failed to release staging area");
        }

        match outcome {
            Ok(()) => {
                info!(account_id, published = report.published_count(), "[SYNC] Publish run complete");
                Ok(report)
            }
            Err(error) => {
                error!(
                    account_id,
                    published = report.published_count(),
                    item = error.item().unwrap_or("-"),
                    error = %error,
                    "[SYNC][ERROR] Publish run aborted"
                );
                Err(SyncFailure::new(report.published_count(), error))
            }
        }
    }

    async fn publish_pending(
        &self,
        account: &Account,
        pending: &[String],
        scope: &StagingScope,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        for media_id in pending {
            if self.cancel.is_cancelled() {
                warn!(account_id = %account.id, "[SYNC] Cancelled between items");
                return Err(SyncError::Cancelled {
                    after: report.published_count(),
                });
            }

            let post = self.publish_item(account, media_id, scope).await?;

            // Only after the post exists, and before touching the next item.
            self.ledger
                .mark_published(&account.id, media_id, &post)
                .await
                .map_err(|source| SyncError::Ledger {
                    item: media_id.clone(),
                    source,
                })?;

            report.published.push(PublishedItemReport {
                media_id: media_id.clone(),
                post_id: post.id,
                link: post.link,
            });
        }
        Ok(())
    }

    async fn publish_item(
        &self,
        account: &Account,
        media_id: &str,
        scope: &StagingScope,
    ) -> Result<PublishedPost, SyncError> {
        let (token, _) = account
            .credentials()
            .map_err(|missing| SyncError::Precondition {
                account_id: account.id.clone(),
                missing,
            })?;
        let item = || media_id.to_string();

        let detail = self
            .media
            .get_media_detail(token, media_id)
            .await
            .map_err(|source| SyncError::UpstreamFetch {
                item: item(),
                source,
            })?;
        self.ledger
            .record_seen(&account.id, &detail)
            .await
            .map_err(|source| SyncError::Ledger {
                item: item(),
                source,
            })?;

        let refs = self
            .media
            .resolve_file_refs(token, &detail)
            .await
            .map_err(|source| SyncError::Download {
                item: item(),
                source: Box::new(source),
            })?;
        let staged = self
            .stager
            .download(scope, &refs)
            .await
            .map_err(|source| SyncError::Download {
                item: item(),
                source: Box::new(source),
            })?;
        info!(media_id, files = staged.len(), "[SYNC] Staged files");

        let handles = self
            .publisher
            .upload_files(&staged)
            .await
            .map_err(|source| SyncError::Upload {
                item: item(),
                source,
            })?;
        info!(media_id, handles = handles.len(), "[SYNC][UPLOAD] Uploaded files");

        let post = self
            .publisher
            .create_post(&detail, &handles)
            .await
            .map_err(|source| SyncError::Publish {
                item: item(),
                source,
            })?;
        info!(media_id, post_id = post.id, link = %post.link, "[SYNC][UPLOAD] Created post");

        Ok(post)
    }
}
