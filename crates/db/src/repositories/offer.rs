use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;

use offerflow_core::domain::company::CompanyId;
use offerflow_core::domain::customer::CustomerId;
use offerflow_core::domain::financials::DwFinancials;
use offerflow_core::domain::offer::{Offer, OfferId, OfferPhase};
use offerflow_core::domain::project::ProjectId;
use offerflow_core::pipeline::DateRange;
use offerflow_core::repository::{OfferRepository, RepositoryError};

use super::{
    column, db_error, decimal_column, format_timestamp, optional_timestamp_column,
    timestamp_column,
};
use crate::DbPool;

const OFFER_COLUMNS: &str = "id, company_id, customer_id, project_id, project_linked_at, title,
    description, notes, phase, offer_number, external_reference, probability, value, cost,
    dw_total_income, dw_material_costs, dw_employee_costs, dw_other_costs, dw_net_result,
    spent, invoiced, responsible_user, sent_date, expiration_date, start_date, end_date,
    due_date, dw_last_synced_at, created_by, updated_by, version, created_at, updated_at";

pub struct SqlOfferRepository {
    pool: DbPool,
}

impl SqlOfferRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn rows_to_offers(rows: Vec<SqliteRow>) -> Result<Vec<Offer>, RepositoryError> {
    rows.iter().map(row_to_offer).collect()
}

fn row_to_offer(row: &SqliteRow) -> Result<Offer, RepositoryError> {
    let phase_raw: String = column(row, "phase")?;
    let phase = OfferPhase::parse(&phase_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown offer phase `{phase_raw}`")))?;
    let probability: i64 = column(row, "probability")?;
    let probability = u8::try_from(probability)
        .map_err(|_| RepositoryError::Decode(format!("probability `{probability}` out of range")))?;

    let customer_id: Option<String> = column(row, "customer_id")?;
    let project_id: Option<String> = column(row, "project_id")?;

    Ok(Offer {
        id: OfferId(column(row, "id")?),
        company_id: CompanyId(column(row, "company_id")?),
        customer_id: customer_id.map(CustomerId),
        project_id: project_id.map(ProjectId),
        project_linked_at: optional_timestamp_column(row, "project_linked_at")?,
        title: column(row, "title")?,
        description: column(row, "description")?,
        notes: column(row, "notes")?,
        phase,
        offer_number: column(row, "offer_number")?,
        external_reference: column(row, "external_reference")?,
        probability,
        value: decimal_column(row, "value")?,
        cost: decimal_column(row, "cost")?,
        financials: DwFinancials {
            total_income: decimal_column(row, "dw_total_income")?,
            material_costs: decimal_column(row, "dw_material_costs")?,
            employee_costs: decimal_column(row, "dw_employee_costs")?,
            other_costs: decimal_column(row, "dw_other_costs")?,
            net_result: decimal_column(row, "dw_net_result")?,
        },
        spent: decimal_column(row, "spent")?,
        invoiced: decimal_column(row, "invoiced")?,
        responsible_user: column(row, "responsible_user")?,
        sent_date: optional_timestamp_column(row, "sent_date")?,
        expiration_date: optional_timestamp_column(row, "expiration_date")?,
        start_date: optional_timestamp_column(row, "start_date")?,
        end_date: optional_timestamp_column(row, "end_date")?,
        due_date: optional_timestamp_column(row, "due_date")?,
        dw_last_synced_at: optional_timestamp_column(row, "dw_last_synced_at")?,
        created_by: column(row, "created_by")?,
        updated_by: column(row, "updated_by")?,
        version: column(row, "version")?,
        created_at: timestamp_column(row, "created_at")?,
        updated_at: timestamp_column(row, "updated_at")?,
    })
}

#[async_trait]
impl OfferRepository for SqlOfferRepository {
    async fn find_by_id(&self, id: &OfferId) -> Result<Option<Offer>, RepositoryError> {
        let sql = format!("SELECT {OFFER_COLUMNS} FROM offers WHERE id = ?");
        let row =
            sqlx::query(&sql).bind(&id.0).fetch_optional(&self.pool).await.map_err(db_error)?;

        match row {
            Some(ref row) => Ok(Some(row_to_offer(row)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, offer: &Offer) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO offers (id, company_id, customer_id, project_id, project_linked_at, title,
                                 description, notes, phase, offer_number, external_reference,
                                 probability, value, cost, dw_total_income, dw_material_costs,
                                 dw_employee_costs, dw_other_costs, dw_net_result, spent, invoiced,
                                 responsible_user, sent_date, expiration_date, start_date,
                                 end_date, due_date, dw_last_synced_at, created_by, updated_by,
                                 version, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                     ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&offer.id.0)
        .bind(&offer.company_id.0)
        .bind(offer.customer_id.as_ref().map(|id| id.0.as_str()))
        .bind(offer.project_id.as_ref().map(|id| id.0.as_str()))
        .bind(offer.project_linked_at.map(format_timestamp))
        .bind(&offer.title)
        .bind(&offer.description)
        .bind(&offer.notes)
        .bind(offer.phase.as_str())
        .bind(&offer.offer_number)
        .bind(&offer.external_reference)
        .bind(i64::from(offer.probability))
        .bind(offer.value.to_string())
        .bind(offer.cost.to_string())
        .bind(offer.financials.total_income.to_string())
        .bind(offer.financials.material_costs.to_string())
        .bind(offer.financials.employee_costs.to_string())
        .bind(offer.financials.other_costs.to_string())
        .bind(offer.financials.net_result.to_string())
        .bind(offer.spent.to_string())
        .bind(offer.invoiced.to_string())
        .bind(offer.responsible_user.as_deref())
        .bind(offer.sent_date.map(format_timestamp))
        .bind(offer.expiration_date.map(format_timestamp))
        .bind(offer.start_date.map(format_timestamp))
        .bind(offer.end_date.map(format_timestamp))
        .bind(offer.due_date.map(format_timestamp))
        .bind(offer.dw_last_synced_at.map(format_timestamp))
        .bind(&offer.created_by)
        .bind(&offer.updated_by)
        .bind(offer.version)
        .bind(format_timestamp(offer.created_at))
        .bind(format_timestamp(offer.updated_at))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn update(&self, offer: &Offer, expected_version: i64) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let result = sqlx::query(
            "UPDATE offers SET
                 customer_id = ?, project_id = ?, project_linked_at = ?, title = ?,
                 description = ?, notes = ?, phase = ?, offer_number = ?,
                 external_reference = ?, probability = ?, value = ?, cost = ?,
                 responsible_user = ?, sent_date = ?, expiration_date = ?, start_date = ?,
                 end_date = ?, due_date = ?, updated_by = ?, updated_at = ?,
                 version = version + 1
             WHERE id = ? AND version = ?",
        )
        .bind(offer.customer_id.as_ref().map(|id| id.0.as_str()))
        .bind(offer.project_id.as_ref().map(|id| id.0.as_str()))
        .bind(offer.project_linked_at.map(format_timestamp))
        .bind(&offer.title)
        .bind(&offer.description)
        .bind(&offer.notes)
        .bind(offer.phase.as_str())
        .bind(&offer.offer_number)
        .bind(&offer.external_reference)
        .bind(i64::from(offer.probability))
        .bind(offer.value.to_string())
        .bind(offer.cost.to_string())
        .bind(offer.responsible_user.as_deref())
        .bind(offer.sent_date.map(format_timestamp))
        .bind(offer.expiration_date.map(format_timestamp))
        .bind(offer.start_date.map(format_timestamp))
        .bind(offer.end_date.map(format_timestamp))
        .bind(offer.due_date.map(format_timestamp))
        .bind(&offer.updated_by)
        .bind(format_timestamp(offer.updated_at))
        .bind(&offer.id.0)
        .bind(expected_version)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 1 {
            if offer.external_reference.is_empty() {
                sqlx::query(
                    "UPDATE offers SET
                         dw_total_income = '0', dw_material_costs = '0', dw_employee_costs = '0',
                         dw_other_costs = '0', dw_net_result = '0', spent = '0', invoiced = '0',
                         dw_last_synced_at = NULL
                     WHERE id = ?",
                )
                .bind(&offer.id.0)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
            }
            tx.commit().await.map_err(db_error)?;
            return Ok(());
        }

        let exists: Option<i64> = sqlx::query_scalar("SELECT version FROM offers WHERE id = ?")
            .bind(&offer.id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?;
        match exists {
            Some(_) => Err(RepositoryError::VersionConflict { id: offer.id.0.clone() }),
            None => Err(RepositoryError::Database(format!("offer `{}` missing", offer.id))),
        }
    }

    async fn update_financials(
        &self,
        id: &OfferId,
        external_reference: &str,
        financials: &DwFinancials,
        synced_at: Option<DateTime<Utc>>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE offers SET
                 dw_total_income = ?, dw_material_costs = ?, dw_employee_costs = ?,
                 dw_other_costs = ?, dw_net_result = ?, spent = ?, invoiced = ?,
                 dw_last_synced_at = ?
             WHERE id = ? AND external_reference = ?",
        )
        .bind(financials.total_income.to_string())
        .bind(financials.material_costs.to_string())
        .bind(financials.employee_costs.to_string())
        .bind(financials.other_costs.to_string())
        .bind(financials.net_result.to_string())
        .bind(financials.total_costs().to_string())
        .bind(financials.total_income.to_string())
        .bind(synced_at.map(format_timestamp))
        .bind(&id.0)
        .bind(external_reference)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let exists: Option<i64> = sqlx::query_scalar("SELECT version FROM offers WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        match exists {
            Some(_) => Ok(false),
            None => Err(RepositoryError::Database(format!("offer `{id}` missing"))),
        }
    }

    async fn offer_number_taken(
        &self,
        company_id: &CompanyId,
        offer_number: &str,
        exclude: &OfferId,
    ) -> Result<bool, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM offers WHERE company_id = ? AND offer_number = ? AND id <> ?",
        )
        .bind(&company_id.0)
        .bind(offer_number)
        .bind(&exclude.0)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(count > 0)
    }

    async fn external_reference_taken(
        &self,
        company_id: &CompanyId,
        external_reference: &str,
        exclude: &OfferId,
    ) -> Result<bool, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM offers
             WHERE company_id = ? AND external_reference = ? AND id <> ?",
        )
        .bind(&company_id.0)
        .bind(external_reference)
        .bind(&exclude.0)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(count > 0)
    }

    async fn list_by_project(&self, project_id: &ProjectId) -> Result<Vec<Offer>, RepositoryError> {
        let sql = format!("SELECT {OFFER_COLUMNS} FROM offers WHERE project_id = ? ORDER BY id");
        let rows = sqlx::query(&sql)
            .bind(&project_id.0)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows_to_offers(rows)
    }

    async fn list_sync_candidates(
        &self,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<Offer>, RepositoryError> {
        let sql = format!(
            "SELECT {OFFER_COLUMNS} FROM offers
             WHERE phase = 'order'
               AND TRIM(external_reference) <> ''
               AND (dw_last_synced_at IS NULL OR dw_last_synced_at < ?)
             ORDER BY id"
        );
        let rows = sqlx::query(&sql)
            .bind(format_timestamp(stale_before))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows_to_offers(rows)
    }

    async fn list_created_within(
        &self,
        company_id: Option<&CompanyId>,
        range: &DateRange,
    ) -> Result<Vec<Offer>, RepositoryError> {
        let sql = format!(
            "SELECT {OFFER_COLUMNS} FROM offers
             WHERE (? IS NULL OR company_id = ?)
               AND (? IS NULL OR created_at >= ?)
               AND (? IS NULL OR created_at < ?)
             ORDER BY id"
        );
        let company = company_id.map(|id| id.0.as_str());
        let from = range.from.map(format_timestamp);
        let to = range.to.map(format_timestamp);
        let rows = sqlx::query(&sql)
            .bind(company)
            .bind(company)
            .bind(from.as_deref())
            .bind(from.as_deref())
            .bind(to.as_deref())
            .bind(to.as_deref())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows_to_offers(rows)
    }
}
