use std::fs;
use std::path::Path;
use std::time::Duration;

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, params};
use tracing::debug;

use crate::backup::{content_hash, unix_timestamp};
use crate::runtime::ResolvedPaths;

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

impl Migration {
    fn checksum(&self) -> String {
        content_hash(Some(self.sql))
    }
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "snapshots",
        sql: include_str!("migrations/v001_snapshots.sql"),
    },
    Migration {
        version: 2,
        name: "snapshot_indexes",
        sql: include_str!("migrations/v002_snapshot_indexes.sql"),
    },
];

#[derive(Debug, Clone)]
pub struct MigrateReport {
    pub applied: Vec<AppliedMigration>,
    pub current_version: u32,
}

#[derive(Debug, Clone)]
pub struct AppliedMigration {
    pub version: u32,
    pub name: String,
}

pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Bring the snapshot ledger at `paths.db_path` up to date, creating it when absent.
pub fn run_migrations(paths: &ResolvedPaths) -> Result<MigrateReport> {
    ensure_db_parent(&paths.db_path)?;
    let connection = open_connection(&paths.db_path)?;
    migrate_connection(&connection)
}

pub(crate) fn migrate_connection(connection: &Connection) -> Result<MigrateReport> {
    ensure_schema_migrations_table(connection)?;
    let recorded = recorded_checksums(connection)?;

    let mut applied = Vec::new();
    for migration in MIGRATIONS {
        match recorded.get(&migration.version) {
            Some(checksum) if checksum == &migration.checksum() => continue,
            Some(_) => bail!(
                "ledger migration v{:03}_{} changed after it was applied",
                migration.version,
                migration.name
            ),
            None => {}
        }
        apply_migration(connection, migration).with_context(|| {
            format!(
                "failed to apply migration v{:03}_{}",
                migration.version, migration.name
            )
        })?;
        debug!(version = migration.version, name = migration.name, "applied ledger migration");
        applied.push(AppliedMigration {
            version: migration.version,
            name: migration.name.to_string(),
        });
    }

    Ok(MigrateReport {
        applied,
        current_version: current_version(connection)?,
    })
}

pub fn pending_migration_count(paths: &ResolvedPaths) -> Result<usize> {
    if !paths.db_path.exists() {
        return Ok(MIGRATIONS.len());
    }
    let connection = open_connection(&paths.db_path)?;
    ensure_schema_migrations_table(&connection)?;
    let recorded = recorded_checksums(&connection)?;
    Ok(MIGRATIONS
        .iter()
        .filter(|migration| !recorded.contains_key(&migration.version))
        .count())
}

/// Highest applied version, 0 for a fresh ledger.
pub fn current_version(connection: &Connection) -> Result<u32> {
    let version: i64 = connection
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .context("failed to read ledger schema version")?;
    u32::try_from(version).context("ledger schema version out of range")
}

fn ensure_schema_migrations_table(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                checksum TEXT NOT NULL,
                applied_at_unix INTEGER NOT NULL
            );",
        )
        .context("failed to create schema_migrations table")
}

fn recorded_checksums(connection: &Connection) -> Result<BTreeMap<u32, String>> {
    let mut statement = connection
        .prepare("SELECT version, checksum FROM schema_migrations")
        .context("failed to read applied migrations")?;
    let rows = statement
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))
        .context("failed to read applied migrations")?;
    let mut out = BTreeMap::new();
    for row in rows {
        let (version, checksum) = row.context("failed to decode applied migration")?;
        let version = u32::try_from(version).context("ledger schema version out of range")?;
        out.insert(version, checksum);
    }
    Ok(out)
}

fn apply_migration(connection: &Connection, migration: &Migration) -> Result<()> {
    let transaction = connection
        .unchecked_transaction()
        .context("failed to begin migration transaction")?;
    transaction
        .execute_batch(migration.sql)
        .with_context(|| format!("SQL execution failed for v{:03}", migration.version))?;
    transaction
        .execute(
            "INSERT INTO schema_migrations (version, name, checksum, applied_at_unix)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                i64::from(migration.version),
                migration.name,
                migration.checksum(),
                unix_timestamp()?,
            ],
        )
        .context("failed to record migration")?;
    transaction.commit().context("failed to commit migration")
}

pub(crate) fn open_connection(db_path: &Path) -> Result<Connection> {
    let connection =
        Connection::open(db_path).with_context(|| format!("failed to open {}", db_path.display()))?;
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to enable WAL journal mode")?;
    connection
        .busy_timeout(Duration::from_secs(5))
        .context("failed to set ledger busy timeout")?;
    Ok(connection)
}

pub(crate) fn ensure_db_parent(db_path: &Path) -> Result<()> {
    let Some(parent) = db_path.parent() else {
        bail!("ledger path has no parent: {}", db_path.display());
    };
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create ledger directory {}", parent.display()))
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn fresh_ledger_gets_every_migration_once() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_project(temp.path());
        assert_eq!(
            pending_migration_count(&paths).expect("pending"),
            MIGRATIONS.len()
        );

        let first = run_migrations(&paths).expect("first run");
        assert_eq!(first.applied.len(), MIGRATIONS.len());
        assert_eq!(first.current_version, latest_version());
        assert!(paths.db_path.exists());

        let second = run_migrations(&paths).expect("second run");
        assert!(second.applied.is_empty());
        assert_eq!(pending_migration_count(&paths).expect("pending"), 0);
    }

    #[test]
    fn edited_migration_is_refused() {
        let connection = Connection::open_in_memory().expect("open");
        migrate_connection(&connection).expect("migrate");
        connection
            .execute(
                "UPDATE schema_migrations SET checksum = 'stale' WHERE version = 1",
                [],
            )
            .expect("tamper");

        let error = migrate_connection(&connection).expect_err("must refuse");
        assert!(format!("{error:#}").contains("changed after it was applied"));
    }

    #[test]
    fn snapshot_table_exists_after_migration() {
        let connection = Connection::open_in_memory().expect("open");
        migrate_connection(&connection).expect("migrate");
        let count: i64 = connection
            .query_row("SELECT COUNT(*) FROM meta_snapshots", [], |row| row.get(0))
            .expect("query");
        assert_eq!(count, 0);
    }
}
