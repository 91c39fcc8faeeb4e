use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

use shared::domain::{ItemId, Outcome};

/// Local durable state for the review client: the decision outbox.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

/// A decision that has been recorded locally but not yet acknowledged by the service.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    pub item_id: ItemId,
    pub outcome: Outcome,
    pub issued_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboxCounts {
    pub pending: u64,
    pub settled: u64,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every pooled connection to `sqlite::memory:` would see its own empty database.
        let max_connections = if is_memory_url(database_url) { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await?;
        let storage = Self { pool };
        storage.ensure_outbox_table().await?;
        Ok(storage)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    async fn ensure_outbox_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS decision_outbox (
                item_id     TEXT PRIMARY KEY NOT NULL,
                outcome     TEXT NOT NULL,
                issued_at   TEXT NOT NULL,
                attempts    INTEGER NOT NULL DEFAULT 0,
                last_error  TEXT,
                settled_at  TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to ensure decision_outbox table exists")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS decision_outbox_pending
             ON decision_outbox (settled_at, issued_at)",
        )
        .execute(&self.pool)
        .await
        .context("failed to ensure decision_outbox index exists")?;

        Ok(())
    }

    /// Records a decision. Returns `false` when the item already had one;
    /// the first recorded outcome always wins.
    pub async fn enqueue_decision(
        &self,
        item_id: ItemId,
        outcome: Outcome,
        issued_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO decision_outbox (item_id, outcome, issued_at)
             VALUES (?, ?, ?)
             ON CONFLICT(item_id) DO NOTHING",
        )
        .bind(item_id.to_string())
        .bind(outcome.as_wire())
        .bind(issued_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to enqueue decision for item {item_id}"))?;

        let inserted = result.rows_affected() == 1;
        debug!(item_id = %item_id, outcome = %outcome, inserted, "outbox: enqueue");
        Ok(inserted)
    }

    /// Unsettled decisions, oldest first.
    pub async fn pending_decisions(&self, limit: u32) -> Result<Vec<OutboxEntry>> {
        let rows = sqlx::query(
            "SELECT item_id, outcome, issued_at, attempts, last_error
             FROM decision_outbox
             WHERE settled_at IS NULL
             ORDER BY issued_at ASC, item_id ASC
             LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .context("failed to list pending decisions")?;

        rows.iter().map(outbox_entry_from_row).collect()
    }

    /// The unsettled decision for `item_id`, if any.
    pub async fn pending_decision(&self, item_id: ItemId) -> Result<Option<OutboxEntry>> {
        let row = sqlx::query(
            "SELECT item_id, outcome, issued_at, attempts, last_error
             FROM decision_outbox
             WHERE item_id = ? AND settled_at IS NULL",
        )
        .bind(item_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to load pending decision for item {item_id}"))?;

        row.as_ref().map(outbox_entry_from_row).transpose()
    }

    /// Bumps the attempt counter and returns the new count.
    pub async fn record_attempt_failure(&self, item_id: ItemId, error: &str) -> Result<u32> {
        let row = sqlx::query(
            "UPDATE decision_outbox
             SET attempts = attempts + 1, last_error = ?
             WHERE item_id = ?
             RETURNING attempts",
        )
        .bind(error)
        .bind(item_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to record delivery failure for item {item_id}"))?
        .ok_or_else(|| anyhow!("no outbox entry for item {item_id}"))?;

        let attempts: i64 = row.try_get(0)?;
        Ok(u32::try_from(attempts).unwrap_or(u32::MAX))
    }

    pub async fn mark_settled(&self, item_id: ItemId, settled_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE decision_outbox
             SET settled_at = ?, last_error = NULL
             WHERE item_id = ? AND settled_at IS NULL",
        )
        .bind(settled_at)
        .bind(item_id.to_string())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to mark item {item_id} settled"))?;
        Ok(())
    }

    /// Closes out a decision the service refused for good, keeping the reason.
    pub async fn mark_rejected(
        &self,
        item_id: ItemId,
        error: &str,
        settled_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE decision_outbox
             SET settled_at = ?, last_error = ?, attempts = attempts + 1
             WHERE item_id = ? AND settled_at IS NULL",
        )
        .bind(settled_at)
        .bind(error)
        .bind(item_id.to_string())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to mark item {item_id} rejected"))?;
        Ok(())
    }

    pub async fn outbox_counts(&self) -> Result<OutboxCounts> {
        let row = sqlx::query(
            "SELECT
                COALESCE(SUM(CASE WHEN settled_at IS NULL THEN 1 ELSE 0 END), 0) AS pending,
                COALESCE(SUM(CASE WHEN settled_at IS NOT NULL THEN 1 ELSE 0 END), 0) AS settled
             FROM decision_outbox",
        )
        .fetch_one(&self.pool)
        .await
        .context("failed to count outbox entries")?;

        let pending: i64 = row.try_get("pending")?;
        let settled: i64 = row.try_get("settled")?;
        Ok(OutboxCounts {
            pending: u64::try_from(pending).unwrap_or_default(),
            settled: u64::try_from(settled).unwrap_or_default(),
        })
    }

    /// Drops acknowledged decisions settled before `cutoff`.
    pub async fn purge_settled_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM decision_outbox WHERE settled_at IS NOT NULL AND settled_at < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .context("failed to purge settled decisions")?;
        Ok(result.rows_affected())
    }
}

fn outbox_entry_from_row(row: &SqliteRow) -> Result<OutboxEntry> {
    let raw_id: String = row.try_get("item_id")?;
    let raw_outcome: String = row.try_get("outcome")?;
    let attempts: i64 = row.try_get("attempts")?;
    Ok(OutboxEntry {
        item_id: ItemId::from_str(&raw_id)
            .with_context(|| format!("corrupt outbox item id '{raw_id}'"))?,
        outcome: Outcome::from_wire(&raw_outcome)
            .ok_or_else(|| anyhow!("corrupt outbox outcome '{raw_outcome}'"))?,
        issued_at: row.try_get("issued_at")?,
        attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        last_error: row.try_get("last_error")?,
    })
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.starts_with("sqlite::memory:") || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_memory_url(database_url) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
