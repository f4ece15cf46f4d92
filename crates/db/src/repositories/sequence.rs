use async_trait::async_trait;
use chrono::Utc;

use offerflow_core::domain::company::CompanyId;
use offerflow_core::repository::{RepositoryError, SequenceRepository};

use super::{db_error, format_timestamp};
use crate::DbPool;

/// Counters live in `number_sequences`; every increment is one upsert statement, so
/// concurrent writers are serialized by SQLite.
pub struct SqlSequenceRepository {
    pool: DbPool,
}

impl SqlSequenceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn to_counter(value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("negative sequence value `{value}`")))
}

#[async_trait]
impl SequenceRepository for SqlSequenceRepository {
    async fn next(&self, company_id: &CompanyId, year: i32) -> Result<u64, RepositoryError> {
        let value: i64 = sqlx::query_scalar(
            "INSERT INTO number_sequences (company_id, year, last_value, updated_at)
             VALUES (?, ?, 1, ?)
             ON CONFLICT(company_id, year) DO UPDATE SET
                 last_value = number_sequences.last_value + 1,
                 updated_at = excluded.updated_at
             RETURNING last_value",
        )
        .bind(&company_id.0)
        .bind(year)
        .bind(format_timestamp(Utc::now()))
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        to_counter(value)
    }

    async fn current(&self, company_id: &CompanyId, year: i32) -> Result<u64, RepositoryError> {
        let value: Option<i64> = sqlx::query_scalar(
            "SELECT last_value FROM number_sequences WHERE company_id = ? AND year = ?",
        )
        .bind(&company_id.0)
        .bind(year)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        value.map(to_counter).transpose().map(Option::unwrap_or_default)
    }

    async fn initialize(
        &self,
        company_id: &CompanyId,
        year: i32,
        value: u64,
    ) -> Result<u64, RepositoryError> {
        let requested = i64::try_from(value).map_err(|_| {
            RepositoryError::Database(format!("sequence value `{value}` is too large"))
        })?;
        let resulting: i64 = sqlx::query_scalar(
            "INSERT INTO number_sequences (company_id, year, last_value, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(company_id, year) DO UPDATE SET
                 last_value = MAX(number_sequences.last_value, excluded.last_value),
                 updated_at = excluded.updated_at
             RETURNING last_value",
        )
        .bind(&company_id.0)
        .bind(year)
        .bind(requested)
        .bind(format_timestamp(Utc::now()))
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        to_counter(resulting)
    }
}
