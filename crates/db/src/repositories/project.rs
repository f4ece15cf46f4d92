use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;

use offerflow_core::domain::company::CompanyId;
use offerflow_core::domain::customer::CustomerId;
use offerflow_core::domain::project::{Project, ProjectId, ProjectPhase};
use offerflow_core::repository::{ProjectRepository, RepositoryError};

use super::{column, db_error, format_timestamp, timestamp_column};
use crate::DbPool;

pub struct SqlProjectRepository {
    pool: DbPool,
}

impl SqlProjectRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_project(row: &SqliteRow) -> Result<Project, RepositoryError> {
    let phase_raw: String = column(row, "phase")?;
    let phase = ProjectPhase::parse(&phase_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown project phase `{phase_raw}`")))?;
    let customer_id: Option<String> = column(row, "customer_id")?;

    Ok(Project {
        id: ProjectId(column(row, "id")?),
        company_id: CompanyId(column(row, "company_id")?),
        name: column(row, "name")?,
        phase,
        customer_id: customer_id.map(CustomerId),
        updated_at: timestamp_column(row, "updated_at")?,
    })
}

#[async_trait]
impl ProjectRepository for SqlProjectRepository {
    async fn find_by_id(&self, id: &ProjectId) -> Result<Option<Project>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, company_id, name, phase, customer_id, updated_at
             FROM projects WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match row {
            Some(ref row) => Ok(Some(row_to_project(row)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, project: Project) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO projects (id, company_id, name, phase, customer_id, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 phase = excluded.phase,
                 customer_id = excluded.customer_id,
                 updated_at = excluded.updated_at",
        )
        .bind(&project.id.0)
        .bind(&project.company_id.0)
        .bind(&project.name)
        .bind(project.phase.as_str())
        .bind(project.customer_id.as_ref().map(|id| id.0.as_str()))
        .bind(format_timestamp(project.updated_at))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn set_customer(
        &self,
        id: &ProjectId,
        customer_id: Option<&CustomerId>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE projects SET customer_id = ?, updated_at = ? WHERE id = ?")
            .bind(customer_id.map(|id| id.0.as_str()))
            .bind(format_timestamp(updated_at))
            .bind(&id.0)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(())
    }
}
