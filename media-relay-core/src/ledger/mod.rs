//! SQLite-backed post ledger.
//!
//! One row per (account, media id). A row without `published_at` is pending;
//! setting `published_at` is the single durable write that advances an item,
//! and nothing ever clears it again.

pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};

use crate::contract::{LedgerSummary, MediaId, PostLedger, PublishedPost, RemoteMediaItem};
use crate::error::LedgerError;

/// SQLite implementation of [`PostLedger`].
pub struct SqlitePostLedger {
    /// rusqlite::Connection is not Sync.
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl std::fmt::Debug for SqlitePostLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlitePostLedger")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqlitePostLedger {
    /// Open or create a ledger at the given path.
    pub async fn open(path: &Path) -> Result<Self, LedgerError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path_clone).map_err(|e| LedgerError::Open {
                path: path_clone.clone(),
                source: e,
            })?;

            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(LedgerError::Migration)?;
            // FULL so a returned mark_published survives power loss.
            conn.pragma_update(None, "synchronous", "FULL")
                .map_err(LedgerError::Migration)?;

            schema::migrate(&conn)?;

            Ok::<_, LedgerError>(conn)
        })
        .await??;

        tracing::info!(path = %path.display(), "[LEDGER] Opened post ledger");
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Open an in-memory ledger. Nothing survives the process.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory().map_err(|e| LedgerError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remote link recorded for a published item, if any.
    pub fn remote_link(&self, account_id: &str, media_id: &str) -> Result<Option<String>, LedgerError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| LedgerError::Query(e.to_string()))?;
        let link: Option<Option<String>> = conn
            .query_row(
                "SELECT remote_link FROM media_items WHERE account_id = ?1 AND media_id = ?2",
                [account_id, media_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(LedgerError::query)?;
        Ok(link.flatten())
    }
}

#[async_trait]
impl PostLedger for SqlitePostLedger {
    async fn pending_set(&self, account_id: &str) -> Result<Vec<MediaId>, LedgerError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| LedgerError::Query(e.to_string()))?;

        let mut stmt = conn
            .prepare(
                "SELECT media_id FROM media_items \
                 WHERE account_id = ?1 AND published_at IS NULL \
                 ORDER BY taken_at ASC, media_id ASC",
            )
            .map_err(LedgerError::query)?;
        let ids = stmt
            .query_map([account_id], |row| row.get::<_, String>(0))
            .map_err(LedgerError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(LedgerError::query)?;

        tracing::debug!(account_id, pending = ids.len(), "[LEDGER] Loaded pending set");
        Ok(ids)
    }

    async fn record_seen(
        &self,
        account_id: &str,
        item: &RemoteMediaItem,
    ) -> Result<bool, LedgerError> {
        let now = Utc::now().timestamp();

        let conn = self
            .conn
            .lock()
            .map_err(|e| LedgerError::Query(e.to_string()))?;

        let known = conn
            .query_row(
                "SELECT 1 FROM media_items WHERE account_id = ?1 AND media_id = ?2",
                [account_id, item.id.as_str()],
                |_| Ok(()),
            )
            .optional()
            .map_err(LedgerError::query)?
            .is_some();

        // Preserves published_at, remote_post_id and remote_link.
        conn.execute(
            r#"
            INSERT INTO media_items (account_id, media_id, media_kind, caption, permalink, taken_at, first_seen_at, last_seen_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            ON CONFLICT(account_id, media_id) DO UPDATE SET
                media_kind = excluded.media_kind,
                caption = excluded.caption,
                permalink = excluded.permalink,
                taken_at = excluded.taken_at,
                last_seen_at = excluded.last_seen_at
            "#,
            rusqlite::params![
                account_id,
                &item.id,
                item.kind.as_str(),
                &item.caption,
                &item.permalink,
                item.timestamp.timestamp(),
                now,
            ],
        )
        .map_err(LedgerError::query)?;

        Ok(!known)
    }

    async fn mark_published(
        &self,
        account_id: &str,
        media_id: &str,
        post: &PublishedPost,
    ) -> Result<(), LedgerError> {
        let now = Utc::now().timestamp();
        let remote_post_id = i64::try_from(post.id).map_err(|_| {
            LedgerError::Query(format!("remote post id {} does not fit the ledger", post.id))
        })?;

        let conn = self
            .conn
            .lock()
            .map_err(|e| LedgerError::Query(e.to_string()))?;

        // One statement: an unknown item is inserted already published, a
        // known one keeps its first publish record.
        conn.execute(
            r#"
            INSERT INTO media_items (account_id, media_id, taken_at, first_seen_at, last_seen_at, published_at, remote_post_id, remote_link)
            VALUES (?1, ?2, ?3, ?3, ?3, ?3, ?4, ?5)
            ON CONFLICT(account_id, media_id) DO UPDATE SET
                published_at = COALESCE(media_items.published_at, excluded.published_at),
                remote_post_id = COALESCE(media_items.remote_post_id, excluded.remote_post_id),
                remote_link = COALESCE(media_items.remote_link, excluded.remote_link)
            "#,
            rusqlite::params![account_id, media_id, now, remote_post_id, &post.link],
        )
        .map_err(LedgerError::query)?;

        tracing::info!(account_id, media_id, link = %post.link, "[LEDGER] Marked published");
        Ok(())
    }

    async fn summary(&self, account_id: &str) -> Result<LedgerSummary, LedgerError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| LedgerError::Query(e.to_string()))?;

        let (seen, published): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COUNT(published_at) FROM media_items WHERE account_id = ?1",
                [account_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(LedgerError::query)?;

        Ok(LedgerSummary {
            seen: seen as u64,
            published: published as u64,
            pending: (seen - published) as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::MediaKind;
    use chrono::{TimeZone, Utc};

    fn item(id: &str, day: u32) -> RemoteMediaItem {
        RemoteMediaItem {
            id: id.to_string(),
            kind: MediaKind::Image,
            caption: Some(format!("caption {id}")),
            media_url: Some(format!("https://cdn.example/{id}.jpg")),
            permalink: Some(format!("https://instagram.com/p/{id}")),
            timestamp: Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap(),
            children: vec![],
        }
    }

    fn post(id: u64) -> PublishedPost {
        PublishedPost {
            id,
            link: format!("https://blog.example/?p={id}"),
        }
    }

    #[tokio::test]
    async fn test_open_creates_db() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.sqlite3");
        let ledger = SqlitePostLedger::open(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(ledger.path(), path.as_path());
    }

    #[tokio::test]
    async fn test_pending_ordered_by_taken_at() {
        let ledger = SqlitePostLedger::open_in_memory().unwrap();
        ledger.record_seen("acme", &item("M3", 3)).await.unwrap();
        ledger.record_seen("acme", &item("M1", 1)).await.unwrap();
        ledger.record_seen("acme", &item("M2", 2)).await.unwrap();

        let pending = ledger.pending_set("acme").await.unwrap();
        assert_eq!(pending, vec!["M1", "M2", "M3"]);
    }

    #[tokio::test]
    async fn test_pending_scoped_per_account() {
        let ledger = SqlitePostLedger::open_in_memory().unwrap();
        ledger.record_seen("acme", &item("M1", 1)).await.unwrap();
        ledger.record_seen("globex", &item("G1", 1)).await.unwrap();

        assert_eq!(ledger.pending_set("acme").await.unwrap(), vec!["M1"]);
        assert_eq!(ledger.pending_set("globex").await.unwrap(), vec!["G1"]);
        assert!(ledger.pending_set("initech").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_published_removes_from_pending() {
        let ledger = SqlitePostLedger::open_in_memory().unwrap();
        ledger.record_seen("acme", &item("M1", 1)).await.unwrap();
        ledger.record_seen("acme", &item("M2", 2)).await.unwrap();

        ledger.mark_published("acme", "M1", &post(10)).await.unwrap();

        assert_eq!(ledger.pending_set("acme").await.unwrap(), vec!["M2"]);
        assert_eq!(
            ledger.remote_link("acme", "M1").unwrap().as_deref(),
            Some("https://blog.example/?p=10")
        );
    }

    #[tokio::test]
    async fn test_record_seen_preserves_published_marker() {
        let ledger = SqlitePostLedger::open_in_memory().unwrap();
        assert!(ledger.record_seen("acme", &item("M1", 1)).await.unwrap());
        ledger.mark_published("acme", "M1", &post(10)).await.unwrap();

        let mut refreshed = item("M1", 1);
        refreshed.caption = Some("edited caption".into());
        assert!(!ledger.record_seen("acme", &refreshed).await.unwrap());

        assert!(ledger.pending_set("acme").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_published_only_moves_forward() {
        let ledger = SqlitePostLedger::open_in_memory().unwrap();
        ledger.record_seen("acme", &item("M1", 1)).await.unwrap();
        ledger.mark_published("acme", "M1", &post(10)).await.unwrap();
        ledger.mark_published("acme", "M1", &post(11)).await.unwrap();

        assert_eq!(
            ledger.remote_link("acme", "M1").unwrap().as_deref(),
            Some("https://blog.example/?p=10")
        );
    }

    #[tokio::test]
    async fn test_mark_published_unknown_item() {
        let ledger = SqlitePostLedger::open_in_memory().unwrap();
        ledger.mark_published("acme", "M9", &post(90)).await.unwrap();

        let summary = ledger.summary("acme").await.unwrap();
        assert_eq!(summary.published, 1);
        assert_eq!(summary.pending, 0);
    }

    #[tokio::test]
    async fn test_oversized_post_id_is_refused() {
        let ledger = SqlitePostLedger::open_in_memory().unwrap();
        ledger.record_seen("acme", &item("M1", 1)).await.unwrap();

        let err = ledger
            .mark_published("acme", "M1", &post(u64::MAX))
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::Query(_)));
        assert_eq!(ledger.pending_set("acme").await.unwrap(), vec!["M1"]);
    }

    #[tokio::test]
    async fn test_summary_counts() {
        let ledger = SqlitePostLedger::open_in_memory().unwrap();
        for (id, day) in [("M1", 1), ("M2", 2), ("M3", 3)] {
            ledger.record_seen("acme", &item(id, day)).await.unwrap();
        }
        ledger.mark_published("acme", "M2", &post(2)).await.unwrap();

        let summary = ledger.summary("acme").await.unwrap();
        assert_eq!(
            summary,
            LedgerSummary {
                seen: 3,
                published: 1,
                pending: 2,
            }
        );
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.sqlite3");
        {
            let ledger = SqlitePostLedger::open(&path).await.unwrap();
            ledger.record_seen("acme", &item("M1", 1)).await.unwrap();
            ledger.record_seen("acme", &item("M2", 2)).await.unwrap();
            ledger.mark_published("acme", "M1", &post(1)).await.unwrap();
        }
        let ledger = SqlitePostLedger::open(&path).await.unwrap();
        assert_eq!(ledger.pending_set("acme").await.unwrap(), vec!["M2"]);
    }
}
