use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;

use offerflow_core::activity::{ActivityEntry, ActivitySink, ActivityTarget};
use offerflow_core::repository::RepositoryError;

use super::{column, db_error, format_timestamp, timestamp_column};
use crate::DbPool;

/// Append-only activity log.
pub struct SqlActivityLog {
    pool: DbPool,
}

impl SqlActivityLog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Entries for one target, oldest first.
    pub async fn list_for_target(
        &self,
        target_type: ActivityTarget,
        target_id: &str,
    ) -> Result<Vec<ActivityEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, target_type, target_id, title, body, actor, created_at
             FROM activities
             WHERE target_type = ? AND target_id = ?
             ORDER BY created_at, rowid",
        )
        .bind(target_type.as_str())
        .bind(target_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(row_to_entry).collect()
    }
}

fn row_to_entry(row: &SqliteRow) -> Result<ActivityEntry, RepositoryError> {
    let target_raw: String = column(row, "target_type")?;
    let target_type = ActivityTarget::parse(&target_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown activity target `{target_raw}`")))?;

    Ok(ActivityEntry {
        id: column(row, "id")?,
        target_type,
        target_id: column(row, "target_id")?,
        title: column(row, "title")?,
        body: column(row, "body")?,
        actor: column(row, "actor")?,
        occurred_at: timestamp_column(row, "created_at")?,
    })
}

#[async_trait]
impl ActivitySink for SqlActivityLog {
    async fn record(&self, entry: ActivityEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO activities (id, target_type, target_id, title, body, actor, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(entry.target_type.as_str())
        .bind(&entry.target_id)
        .bind(&entry.title)
        .bind(&entry.body)
        .bind(&entry.actor)
        .bind(format_timestamp(entry.occurred_at))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }
}
