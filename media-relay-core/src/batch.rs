//! Serial batch over accounts: discover then publish, one account at a time.
//!
//! A failing account does not stop the batch. Its failure is logged, handed
//! to the optional [`FailureNotifier`], and the next account starts.
//! Cancellation stops the batch before the next account and is never
//! reported as a failure.

use tracing::{error, info, warn};

use crate::contract::{
    AccountDirectory, FailureNotice, FailureNotifier, FileStager, MediaSource, PostLedger,
    Publisher,
};
use crate::error::{SyncError, SyncFailure};
use crate::synchronise::{DiscoveryReport, SyncOrchestrator, SyncReport};

#[derive(Debug)]
pub enum AccountOutcome {
    Synced {
        discovery: DiscoveryReport,
        report: SyncReport,
    },
    Failed(FailureNotice),
}

#[derive(Debug)]
pub struct AccountRun {
    pub account_id: String,
    pub outcome: AccountOutcome,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    /// One entry per account that was started, in batch order.
    pub runs: Vec<AccountRun>,
    /// Set when the batch stopped early on cancellation.
    pub cancelled: bool,
}

impl BatchReport {
    pub fn failed_count(&self) -> usize {
        self.runs
            .iter()
            .filter(|r| matches!(r.outcome, AccountOutcome::Failed(_)))
            .count()
    }

    pub fn published_count(&self) -> usize {
        self.runs
            .iter()
            .map(|r| match &r.outcome {
                AccountOutcome::Synced { report, .. } => report.published_count(),
                AccountOutcome::Failed(notice) => notice.published,
            })
            .sum()
    }
}

fn notice_for(account_id: &str, failure: &SyncFailure) -> FailureNotice {
    FailureNotice {
        account_id: account_id.to_string(),
        published: failure.published,
        item: failure.error.item().map(str::to_string),
        message: failure.error.to_string(),
    }
}

/// Run discovery and publishing for every account in `account_ids`, in order.
pub async fn run_batch<A, M, S, P, L>(
    orchestrator: &SyncOrchestrator<A, M, S, P, L>,
    account_ids: &[String],
    notifier: Option<&dyn FailureNotifier>,
) -> BatchReport
where
    A: AccountDirectory,
    M: MediaSource,
    S: FileStager,
    P: Publisher,
    L: PostLedger,
{
    let mut batch = BatchReport::default();
    info!(accounts = account_ids.len(), "[BATCH] Starting batch");

    for account_id in account_ids {
        if orchestrator.cancellation().is_cancelled() {
            batch.cancelled = true;
            break;
        }

        let result = match orchestrator.discover(account_id).await {
            Ok(discovery) => orchestrator
                .run_sync(account_id)
                .await
                .map(|report| (discovery, report)),
            Err(e) => Err(SyncFailure::from(e)),
        };

        let outcome = match result {
            Ok((discovery, report)) => AccountOutcome::Synced { discovery, report },
            Err(failure) => {
                let notice = notice_for(account_id, &failure);
                if let SyncError::Cancelled { .. } = failure.error {
                    batch.cancelled = true;
                } else {
                    error!(
                        account_id = %account_id,
                        published = failure.published,
                        error = %failure.error,
                        "[BATCH][ERROR] Account failed"
                    );
                    if let Some(notifier) = notifier {
                        if let Err(e) = notifier.notify(&notice).await {
                            warn!(account_id = %account_id, error = %e, "[BATCH] Failed to send failure notice");
                        }
                    }
                }
                AccountOutcome::Failed(notice)
            }
        };
        batch.runs.push(AccountRun {
            account_id: account_id.clone(),
            outcome,
        });
        if batch.cancelled {
            break;
        }
    }

    info!(
        accounts = batch.runs.len(),
        failed = batch.failed_count(),
        published = batch.published_count(),
        cancelled = batch.cancelled,
        "[BATCH] Batch complete"
    );
    batch
}
