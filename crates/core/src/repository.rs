use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::company::{Company, CompanyId};
use crate::domain::customer::CustomerId;
use crate::domain::financials::DwFinancials;
use crate::domain::offer::{Offer, OfferId};
use crate::domain::project::{Project, ProjectId};
use crate::pipeline::DateRange;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("record `{id}` was modified concurrently")]
    VersionConflict { id: String },
}

#[async_trait]
pub trait OfferRepository: Send + Sync {
    async fn find_by_id(&self, id: &OfferId) -> Result<Option<Offer>, RepositoryError>;

    async fn insert(&self, offer: &Offer) -> Result<(), RepositoryError>;

    /// Writes every lifecycle field of `offer` if the stored version still equals
    /// `expected_version`. The warehouse-sourced fields are left untouched, except that an
    /// empty external reference zeroes them and the sync timestamp in the same write.
    async fn update(&self, offer: &Offer, expected_version: i64) -> Result<(), RepositoryError>;

    /// Overwrites only the warehouse-sourced fields and the sync timestamp, provided the
    /// offer still carries `external_reference`. Returns `false` when the reference has
    /// changed since the figures were fetched.
    async fn update_financials(
        &self,
        id: &OfferId,
        external_reference: &str,
        financials: &DwFinancials,
        synced_at: Option<DateTime<Utc>>,
    ) -> Result<bool, RepositoryError>;

    async fn offer_number_taken(
        &self,
        company_id: &CompanyId,
        offer_number: &str,
        exclude: &OfferId,
    ) -> Result<bool, RepositoryError>;

    async fn external_reference_taken(
        &self,
        company_id: &CompanyId,
        external_reference: &str,
        exclude: &OfferId,
    ) -> Result<bool, RepositoryError>;

    async fn list_by_project(&self, project_id: &ProjectId) -> Result<Vec<Offer>, RepositoryError>;

    /// Order-phase offers with an external reference whose last sync is missing or older
    /// than `stale_before`.
    async fn list_sync_candidates(
        &self,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<Offer>, RepositoryError>;

    /// Offers created inside `range`, optionally scoped to one company.
    async fn list_created_within(
        &self,
        company_id: Option<&CompanyId>,
        range: &DateRange,
    ) -> Result<Vec<Offer>, RepositoryError>;
}

#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn find_by_id(&self, id: &ProjectId) -> Result<Option<Project>, RepositoryError>;

    async fn save(&self, project: Project) -> Result<(), RepositoryError>;

    async fn set_customer(
        &self,
        id: &ProjectId,
        customer_id: Option<&CustomerId>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait CompanyRepository: Send + Sync {
    async fn find_by_id(&self, id: &CompanyId) -> Result<Option<Company>, RepositoryError>;

    async fn save(&self, company: Company) -> Result<(), RepositoryError>;
}

/// Per (company, year) counters backing offer numbers.
#[async_trait]
pub trait SequenceRepository: Send + Sync {
    /// Atomically increments and returns the counter, starting from zero when absent.
    async fn next(&self, company_id: &CompanyId, year: i32) -> Result<u64, RepositoryError>;

    /// Current value without mutation; zero when absent.
    async fn current(&self, company_id: &CompanyId, year: i32) -> Result<u64, RepositoryError>;

    /// Raises the counter to at least `value` and returns the resulting value.
    async fn initialize(
        &self,
        company_id: &CompanyId,
        year: i32,
        value: u64,
    ) -> Result<u64, RepositoryError>;
}
