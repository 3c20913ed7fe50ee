//! `PostMetaStore` backed by the live WordPress MySQL database.
//!
//! sqlx is async-only; the store owns a current-thread runtime and blocks on each
//! statement so callers stay synchronous.

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

use crate::config::{DatabaseSettings, validate_table_prefix};
use crate::store::{BuilderPost, META_DATA, PostMetaStore, PostSummary};

const ACQUIRE_TIMEOUT_SECS: u64 = 10;

pub struct MySqlStore {
    runtime: Runtime,
    pool: MySqlPool,
    prefix: String,
}

type PostRow = (u64, String, String, String, String);

impl MySqlStore {
    pub fn connect(settings: &DatabaseSettings) -> Result<Self> {
        validate_table_prefix(&settings.table_prefix)?;
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start database runtime")?;

        let options = MySqlConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.user)
            .password(&settings.password)
            .database(&settings.name)
            .charset("utf8mb4");

        debug!(target = %settings.describe(), "connecting to MySQL");
        let pool = runtime
            .block_on(
                MySqlPoolOptions::new()
                    .max_connections(1)
                    .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
                    .connect_with(options),
            )
            .with_context(|| format!("failed to connect to {}", settings.describe()))?;

        Ok(Self {
            runtime,
            pool,
            prefix: settings.table_prefix.clone(),
        })
    }

    pub fn server_version(&mut self) -> Result<String> {
        self.runtime
            .block_on(sqlx::query_scalar::<_, String>("SELECT VERSION()").fetch_one(&self.pool))
            .context("failed to query MySQL server version")
    }

    fn table(&self, name: &str) -> String {
        format!("{}{name}", self.prefix)
    }
}

fn summary_from_row((id, title, slug, post_type, status): PostRow) -> PostSummary {
    PostSummary {
        id,
        title,
        slug,
        post_type,
        status,
    }
}

impl PostMetaStore for MySqlStore {
    fn post(&mut self, post_id: u64) -> Result<Option<PostSummary>> {
        let sql = format!(
            "SELECT ID, post_title, post_name, post_type, post_status FROM {} WHERE ID = ?",
            self.table("posts")
        );
        let row = self
            .runtime
            .block_on(
                sqlx::query_as::<_, PostRow>(&sql)
                    .bind(post_id)
                    .fetch_optional(&self.pool),
            )
            .with_context(|| format!("failed to load post {post_id}"))?;
        Ok(row.map(summary_from_row))
    }

    fn builder_posts(&mut self) -> Result<Vec<BuilderPost>> {
        let sql = format!(
            "SELECT p.ID, p.post_title, p.post_name, p.post_type, p.post_status, \
             COALESCE(LENGTH(m.meta_value), 0) \
             FROM {posts} p JOIN {postmeta} m ON m.post_id = p.ID AND m.meta_key = ? \
             WHERE p.post_type <> 'revision' ORDER BY p.ID",
            posts = self.table("posts"),
            postmeta = self.table("postmeta"),
        );
        let rows = self
            .runtime
            .block_on(
                sqlx::query_as::<_, (u64, String, String, String, String, i64)>(&sql)
                    .bind(META_DATA)
                    .fetch_all(&self.pool),
            )
            .context("failed to list Elementor posts")?;
        Ok(rows
            .into_iter()
            .map(|(id, title, slug, post_type, status, bytes)| BuilderPost {
                post: summary_from_row((id, title, slug, post_type, status)),
                data_bytes: u64::try_from(bytes).unwrap_or(0),
            })
            .collect())
    }

    fn get_meta(&mut self, post_id: u64, key: &str) -> Result<Option<String>> {
        let sql = format!(
            "SELECT meta_value FROM {} WHERE post_id = ? AND meta_key = ? ORDER BY meta_id LIMIT 1",
            self.table("postmeta")
        );
        let value = self
            .runtime
            .block_on(
                sqlx::query_scalar::<_, Option<String>>(&sql)
                    .bind(post_id)
                    .bind(key)
                    .fetch_optional(&self.pool),
            )
            .with_context(|| format!("failed to read {key} for post {post_id}"))?;
        // A present row with NULL meta_value reads as an empty string.
        Ok(value.map(Option::unwrap_or_default))
    }

    fn set_meta(&mut self, post_id: u64, key: &str, value: &str) -> Result<()> {
        let table = self.table("postmeta");
        let select = format!(
            "SELECT meta_id FROM {table} WHERE post_id = ? AND meta_key = ? ORDER BY meta_id LIMIT 1"
        );
        let existing = self
            .runtime
            .block_on(
                sqlx::query_scalar::<_, u64>(&select)
                    .bind(post_id)
                    .bind(key)
                    .fetch_optional(&self.pool),
            )
            .with_context(|| format!("failed to look up {key} for post {post_id}"))?;

        let result = match existing {
            Some(meta_id) => {
                let update = format!("UPDATE {table} SET meta_value = ? WHERE meta_id = ?");
                self.runtime.block_on(
                    sqlx::query(&update)
                        .bind(value)
                        .bind(meta_id)
                        .execute(&self.pool),
                )
            }
            None => {
                let insert =
                    format!("INSERT INTO {table} (post_id, meta_key, meta_value) VALUES (?, ?, ?)");
                self.runtime.block_on(
                    sqlx::query(&insert)
                        .bind(post_id)
                        .bind(key)
                        .bind(value)
                        .execute(&self.pool),
                )
            }
        };
        let done = result.with_context(|| format!("failed to write {key} for post {post_id}"))?;
        debug!(post_id, key, bytes = value.len(), rows = done.rows_affected(), "wrote post meta");
        Ok(())
    }

    fn delete_meta(&mut self, post_id: u64, key: &str) -> Result<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE post_id = ? AND meta_key = ?",
            self.table("postmeta")
        );
        let done = self
            .runtime
            .block_on(sqlx::query(&sql).bind(post_id).bind(key).execute(&self.pool))
            .with_context(|| format!("failed to delete {key} for post {post_id}"))?;
        Ok(done.rows_affected())
    }

    fn delete_meta_everywhere(&mut self, key: &str) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE meta_key = ?", self.table("postmeta"));
        let done = self
            .runtime
            .block_on(sqlx::query(&sql).bind(key).execute(&self.pool))
            .with_context(|| format!("failed to delete {key} rows"))?;
        Ok(done.rows_affected())
    }

    fn get_option(&mut self, name: &str) -> Result<Option<String>> {
        let sql = format!(
            "SELECT option_value FROM {} WHERE option_name = ? LIMIT 1",
            self.table("options")
        );
        self.runtime
            .block_on(
                sqlx::query_scalar::<_, String>(&sql)
                    .bind(name)
                    .fetch_optional(&self.pool),
            )
            .with_context(|| format!("failed to read option {name}"))
    }

    fn delete_option(&mut self, name: &str) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE option_name = ?", self.table("options"));
        let done = self
            .runtime
            .block_on(sqlx::query(&sql).bind(name).execute(&self.pool))
            .with_context(|| format!("failed to delete option {name}"))?;
        Ok(done.rows_affected())
    }
}
