use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;

use offerflow_core::domain::company::{Company, CompanyId};
use offerflow_core::repository::{CompanyRepository, RepositoryError};

use super::{column, db_error};
use crate::DbPool;

pub struct SqlCompanyRepository {
    pool: DbPool,
}

impl SqlCompanyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_company(row: &SqliteRow) -> Result<Company, RepositoryError> {
    Ok(Company {
        id: CompanyId(column(row, "id")?),
        name: column(row, "name")?,
        number_prefix: column(row, "number_prefix")?,
        default_responsible_user: column(row, "default_responsible_user")?,
    })
}

#[async_trait]
impl CompanyRepository for SqlCompanyRepository {
    async fn find_by_id(&self, id: &CompanyId) -> Result<Option<Company>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, number_prefix, default_responsible_user FROM companies WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match row {
            Some(ref row) => Ok(Some(row_to_company(row)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, company: Company) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO companies (id, name, number_prefix, default_responsible_user)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 number_prefix = excluded.number_prefix,
                 default_responsible_user = excluded.default_responsible_user",
        )
        .bind(&company.id.0)
        .bind(&company.name)
        .bind(company.number_prefix.as_deref())
        .bind(company.default_responsible_user.as_deref())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }
}
