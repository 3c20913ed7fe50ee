use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::migrate::{ensure_db_parent, migrate_connection, open_connection};
use crate::runtime::ResolvedPaths;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Snapshot {
    pub id: i64,
    pub post_id: u64,
    pub meta_key: String,
    pub meta_value: Option<String>,
    pub content_hash: String,
    pub reason: String,
    pub created_at_unix: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SnapshotStats {
    pub snapshots: usize,
    pub posts: usize,
    pub stored_bytes: u64,
}

/// Local SQLite ledger of meta values captured before they were overwritten.
pub struct BackupLedger {
    connection: Connection,
}

impl BackupLedger {
    pub fn open(paths: &ResolvedPaths) -> Result<Self> {
        ensure_db_parent(&paths.db_path)?;
        let connection = open_connection(&paths.db_path)?;
        migrate_connection(&connection)?;
        Ok(Self { connection })
    }

    #[cfg(test)]
    pub(crate) fn in_memory() -> Result<Self> {
        let connection = Connection::open_in_memory().context("failed to open in-memory ledger")?;
        migrate_connection(&connection)?;
        Ok(Self { connection })
    }

    /// Record `value` for `(post_id, key)`. A value identical to the latest snapshot
    /// for the same pair is not stored twice; the existing id is returned. A missing
    /// row and an empty string are distinct snapshots.
    pub fn record(
        &self,
        post_id: u64,
        key: &str,
        value: Option<&str>,
        reason: &str,
    ) -> Result<i64> {
        let hash = content_hash(value);
        if let Some(latest) = self.latest(post_id, key)?
            && latest.content_hash == hash
            && latest.meta_value.is_none() == value.is_none()
        {
            return Ok(latest.id);
        }

        self.connection
            .execute(
                "INSERT INTO meta_snapshots (post_id, meta_key, meta_value, content_hash, reason, created_at_unix)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    to_sql_id(post_id)?,
                    key,
                    value,
                    hash,
                    reason,
                    unix_timestamp()?
                ],
            )
            .with_context(|| format!("failed to record snapshot of {key} for post {post_id}"))?;
        let id = self.connection.last_insert_rowid();
        debug!(id, post_id, key, reason, "recorded snapshot");
        Ok(id)
    }

    pub fn latest(&self, post_id: u64, key: &str) -> Result<Option<Snapshot>> {
        self.connection
            .query_row(
                "SELECT id, post_id, meta_key, meta_value, content_hash, reason, created_at_unix
                 FROM meta_snapshots WHERE post_id = ?1 AND meta_key = ?2 ORDER BY id DESC LIMIT 1",
                params![to_sql_id(post_id)?, key],
                snapshot_from_row,
            )
            .optional()
            .context("failed to query latest snapshot")
    }

    pub fn load(&self, id: i64) -> Result<Option<Snapshot>> {
        self.connection
            .query_row(
                "SELECT id, post_id, meta_key, meta_value, content_hash, reason, created_at_unix
                 FROM meta_snapshots WHERE id = ?1",
                [id],
                snapshot_from_row,
            )
            .optional()
            .with_context(|| format!("failed to load snapshot {id}"))
    }

    /// Newest first.
    pub fn list(&self, post_id: u64, limit: usize) -> Result<Vec<Snapshot>> {
        let mut statement = self
            .connection
            .prepare(
                "SELECT id, post_id, meta_key, meta_value, content_hash, reason, created_at_unix
                 FROM meta_snapshots WHERE post_id = ?1 ORDER BY id DESC LIMIT ?2",
            )
            .context("failed to prepare snapshot listing")?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = statement
            .query_map(params![to_sql_id(post_id)?, limit], snapshot_from_row)
            .context("failed to list snapshots")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to decode snapshot row")?);
        }
        Ok(out)
    }

    pub fn stats(&self) -> Result<SnapshotStats> {
        self.connection
            .query_row(
                "SELECT COUNT(*), COUNT(DISTINCT post_id), COALESCE(SUM(LENGTH(meta_value)), 0)
                 FROM meta_snapshots",
                [],
                |row| {
                    let snapshots: i64 = row.get(0)?;
                    let posts: i64 = row.get(1)?;
                    let bytes: i64 = row.get(2)?;
                    Ok(SnapshotStats {
                        snapshots: usize::try_from(snapshots).unwrap_or(0),
                        posts: usize::try_from(posts).unwrap_or(0),
                        stored_bytes: u64::try_from(bytes).unwrap_or(0),
                    })
                },
            )
            .context("failed to compute snapshot stats")
    }
}

fn snapshot_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Snapshot> {
    let post_id: i64 = row.get(1)?;
    Ok(Snapshot {
        id: row.get(0)?,
        post_id: u64::try_from(post_id).unwrap_or(0),
        meta_key: row.get(2)?,
        meta_value: row.get(3)?,
        content_hash: row.get(4)?,
        reason: row.get(5)?,
        created_at_unix: row.get(6)?,
    })
}

fn to_sql_id(post_id: u64) -> Result<i64> {
    i64::try_from(post_id).context("post id does not fit into i64")
}

pub fn content_hash(value: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    if let Some(value) = value {
        hasher.update(value.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

pub(crate) fn unix_timestamp() -> Result<i64> {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before UNIX_EPOCH")?
        .as_secs();
    i64::try_from(seconds).context("timestamp does not fit into i64")
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn record_and_load_round_trip() {
        let ledger = BackupLedger::in_memory().expect("ledger");
        let id = ledger
            .record(12, "_elementor_data", Some("[]"), "page set")
            .expect("record");
        let snapshot = ledger.load(id).expect("load").expect("exists");
        assert_eq!(snapshot.post_id, 12);
        assert_eq!(snapshot.meta_value.as_deref(), Some("[]"));
        assert_eq!(snapshot.content_hash, content_hash(Some("[]")));
        assert_eq!(snapshot.reason, "page set");
    }

    #[test]
    fn identical_consecutive_snapshots_are_deduplicated() {
        let ledger = BackupLedger::in_memory().expect("ledger");
        let first = ledger.record(5, "_elementor_data", Some("a"), "one").expect("first");
        let again = ledger.record(5, "_elementor_data", Some("a"), "two").expect("again");
        assert_eq!(first, again);
        let changed = ledger.record(5, "_elementor_data", Some("b"), "three").expect("changed");
        assert_ne!(first, changed);
        let back = ledger.record(5, "_elementor_data", Some("a"), "four").expect("back");
        assert_ne!(back, first);
        assert_eq!(ledger.list(5, 10).expect("list").len(), 3);
    }

    #[test]
    fn missing_row_and_empty_string_are_kept_apart() {
        let ledger = BackupLedger::in_memory().expect("ledger");
        let empty = ledger.record(4, "_elementor_data", Some(""), "empty").expect("empty");
        let missing = ledger.record(4, "_elementor_data", None, "deleted").expect("missing");
        assert_ne!(empty, missing);
        let latest = ledger.latest(4, "_elementor_data").expect("latest").expect("exists");
        assert_eq!(latest.id, missing);
        assert!(latest.meta_value.is_none());
        assert_eq!(
            ledger.record(4, "_elementor_data", None, "again").expect("again"),
            missing
        );
    }

    #[test]
    fn list_is_newest_first_and_scoped_to_post() {
        let ledger = BackupLedger::in_memory().expect("ledger");
        ledger.record(1, "_elementor_data", Some("x"), "a").expect("record");
        ledger.record(1, "_elementor_data", Some("y"), "b").expect("record");
        ledger.record(2, "_elementor_data", Some("z"), "c").expect("record");
        let listed = ledger.list(1, 10).expect("list");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].reason, "b");
        assert_eq!(ledger.list(1, 1).expect("limited").len(), 1);

        let stats = ledger.stats().expect("stats");
        assert_eq!(stats.snapshots, 3);
        assert_eq!(stats.posts, 2);
        assert_eq!(stats.stored_bytes, 3);
    }

    #[test]
    fn missing_values_are_recorded_as_null() {
        let ledger = BackupLedger::in_memory().expect("ledger");
        let id = ledger.record(3, "_elementor_css", None, "purge").expect("record");
        let snapshot = ledger.load(id).expect("load").expect("exists");
        assert!(snapshot.meta_value.is_none());
        assert!(ledger.latest(3, "_elementor_data").expect("latest").is_none());
    }

    #[test]
    fn open_creates_ledger_on_disk() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_project(temp.path());
        let ledger = BackupLedger::open(&paths).expect("open");
        ledger.record(1, "_elementor_data", Some("[]"), "test").expect("record");
        drop(ledger);
        let reopened = BackupLedger::open(&paths).expect("reopen");
        assert_eq!(reopened.stats().expect("stats").snapshots, 1);
    }
}
