use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use crate::domain::company::{Company, CompanyId};
use crate::domain::customer::CustomerId;
use crate::domain::financials::DwFinancials;
use crate::domain::offer::{Offer, OfferId, OfferPhase};
use crate::domain::project::{Project, ProjectId};
use crate::pipeline::DateRange;
use crate::repository::{
    CompanyRepository, OfferRepository, ProjectRepository, RepositoryError, SequenceRepository,
};
use crate::sync::{FinancialSource, FinancialSourceError};

#[derive(Default)]
pub struct InMemoryOfferRepository {
    offers: RwLock<HashMap<String, Offer>>,
}

#[async_trait]
impl OfferRepository for InMemoryOfferRepository {
    async fn find_by_id(&self, id: &OfferId) -> Result<Option<Offer>, RepositoryError> {
        let offers = self.offers.read().await;
        Ok(offers.get(&id.0).cloned())
    }

    async fn insert(&self, offer: &Offer) -> Result<(), RepositoryError> {
        let mut offers = self.offers.write().await;
        if offers.contains_key(&offer.id.0) {
            return Err(RepositoryError::Database(format!("offer `{}` already exists", offer.id)));
        }
        ensure_unique(&offers, offer)?;
        offers.insert(offer.id.0.clone(), offer.clone());
        Ok(())
    }

    async fn update(&self, offer: &Offer, expected_version: i64) -> Result<(), RepositoryError> {
        let mut offers = self.offers.write().await;
        let stored_version = offers
            .get(&offer.id.0)
            .map(|stored| stored.version)
            .ok_or_else(|| RepositoryError::Database(format!("offer `{}` missing", offer.id)))?;
        if stored_version != expected_version {
            return Err(RepositoryError::VersionConflict { id: offer.id.0.clone() });
        }
        ensure_unique(&offers, offer)?;

        let Some(stored) = offers.get_mut(&offer.id.0) else {
            return Err(RepositoryError::Database(format!("offer `{}` missing", offer.id)));
        };
        let financials = stored.financials;
        let spent = stored.spent;
        let invoiced = stored.invoiced;
        let synced_at = stored.dw_last_synced_at;
        let created_by = stored.created_by.clone();

        *stored = offer.clone();
        stored.financials = financials;
        stored.spent = spent;
        stored.invoiced = invoiced;
        stored.dw_last_synced_at = synced_at;
        stored.created_by = created_by;
        stored.version = expected_version + 1;
        if stored.external_reference.is_empty() {
            stored.clear_financials();
        }
        Ok(())
    }

    async fn update_financials(
        &self,
        id: &OfferId,
        external_reference: &str,
        financials: &DwFinancials,
        synced_at: Option<DateTime<Utc>>,
    ) -> Result<bool, RepositoryError> {
        let mut offers = self.offers.write().await;
        let stored = offers
            .get_mut(&id.0)
            .ok_or_else(|| RepositoryError::Database(format!("offer `{id}` missing")))?;
        if stored.external_reference != external_reference {
            return Ok(false);
        }
        stored.financials = *financials;
        stored.spent = financials.total_costs();
        stored.invoiced = financials.total_income;
        stored.dw_last_synced_at = synced_at;
        Ok(true)
    }

    async fn offer_number_taken(
        &self,
        company_id: &CompanyId,
        offer_number: &str,
        exclude: &OfferId,
    ) -> Result<bool, RepositoryError> {
        let offers = self.offers.read().await;
        Ok(offers.values().any(|offer| {
            offer.company_id == *company_id
                && offer.id != *exclude
                && offer.offer_number == offer_number
        }))
    }

    async fn external_reference_taken(
        &self,
        company_id: &CompanyId,
        external_reference: &str,
        exclude: &OfferId,
    ) -> Result<bool, RepositoryError> {
        let offers = self.offers.read().await;
        Ok(offers.values().any(|offer| {
            offer.company_id == *company_id
                && offer.id != *exclude
                && offer.external_reference == external_reference
        }))
    }

    async fn list_by_project(&self, project_id: &ProjectId) -> Result<Vec<Offer>, RepositoryError> {
        let offers = self.offers.read().await;
        let mut linked: Vec<Offer> = offers
            .values()
            .filter(|offer| offer.project_id.as_ref() == Some(project_id))
            .cloned()
            .collect();
        linked.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(linked)
    }

    async fn list_sync_candidates(
        &self,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<Offer>, RepositoryError> {
        let offers = self.offers.read().await;
        let mut candidates: Vec<Offer> = offers
            .values()
            .filter(|offer| {
                offer.phase == OfferPhase::Order
                    && offer.has_external_reference()
                    && offer.dw_last_synced_at.map_or(true, |at| at < stale_before)
            })
            .cloned()
            .collect();
        candidates.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(candidates)
    }

    async fn list_created_within(
        &self,
        company_id: Option<&CompanyId>,
        range: &DateRange,
    ) -> Result<Vec<Offer>, RepositoryError> {
        let offers = self.offers.read().await;
        let mut matching: Vec<Offer> = offers
            .values()
            .filter(|offer| company_id.map_or(true, |company| offer.company_id == *company))
            .filter(|offer| range.contains(offer.created_at))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matching)
    }
}

/// Mirrors the per-company unique indexes on non-empty offer numbers and references.
fn ensure_unique(offers: &HashMap<String, Offer>, offer: &Offer) -> Result<(), RepositoryError> {
    let rivals = offers
        .values()
        .filter(|other| other.id != offer.id && other.company_id == offer.company_id);
    for other in rivals {
        if !offer.offer_number.is_empty() && other.offer_number == offer.offer_number {
            return Err(RepositoryError::Database(format!(
                "offer number `{}` already used in company `{}`",
                offer.offer_number, offer.company_id
            )));
        }
        if !offer.external_reference.is_empty()
            && other.external_reference == offer.external_reference
        {
            return Err(RepositoryError::Database(format!(
                "external reference `{}` already used in company `{}`",
                offer.external_reference, offer.company_id
            )));
        }
    }
    Ok(())
}

#[derive(Default)]
pub struct InMemoryProjectRepository {
    projects: RwLock<HashMap<String, Project>>,
}

#[async_trait]
impl ProjectRepository for InMemoryProjectRepository {
    async fn find_by_id(&self, id: &ProjectId) -> Result<Option<Project>, RepositoryError> {
        let projects = self.projects.read().await;
        Ok(projects.get(&id.0).cloned())
    }

    async fn save(&self, project: Project) -> Result<(), RepositoryError> {
        let mut projects = self.projects.write().await;
        projects.insert(project.id.0.clone(), project);
        Ok(())
    }

    async fn set_customer(
        &self,
        id: &ProjectId,
        customer_id: Option<&CustomerId>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut projects = self.projects.write().await;
        if let Some(project) = projects.get_mut(&id.0) {
            project.customer_id = customer_id.cloned();
            project.updated_at = updated_at;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryCompanyRepository {
    companies: RwLock<HashMap<String, Company>>,
}

#[async_trait]
impl CompanyRepository for InMemoryCompanyRepository {
    async fn find_by_id(&self, id: &CompanyId) -> Result<Option<Company>, RepositoryError> {
        let companies = self.companies.read().await;
        Ok(companies.get(&id.0).cloned())
    }

    async fn save(&self, company: Company) -> Result<(), RepositoryError> {
        let mut companies = self.companies.write().await;
        companies.insert(company.id.0.clone(), company);
        Ok(())
    }
}

/// Counters guarded by a single mutex, so increment-and-read is one critical section.
#[derive(Default)]
pub struct InMemorySequenceRepository {
    counters: Mutex<HashMap<(String, i32), u64>>,
}

#[async_trait]
impl SequenceRepository for InMemorySequenceRepository {
    async fn next(&self, company_id: &CompanyId, year: i32) -> Result<u64, RepositoryError> {
        let mut counters = self.counters.lock().await;
        let counter = counters.entry((company_id.0.clone(), year)).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn current(&self, company_id: &CompanyId, year: i32) -> Result<u64, RepositoryError> {
        let counters = self.counters.lock().await;
        Ok(counters.get(&(company_id.0.clone(), year)).copied().unwrap_or(0))
    }

    async fn initialize(
        &self,
        company_id: &CompanyId,
        year: i32,
        value: u64,
    ) -> Result<u64, RepositoryError> {
        let mut counters = self.counters.lock().await;
        let counter = counters.entry((company_id.0.clone(), year)).or_insert(0);
        *counter = (*counter).max(value);
        Ok(*counter)
    }
}

/// Figures keyed by external reference. Unknown references report all-zero figures, the
/// way a warehouse without ledger lines does.
#[derive(Default)]
pub struct InMemoryFinancialSource {
    figures: std::sync::Mutex<HashMap<String, DwFinancials>>,
    failing: std::sync::Mutex<HashSet<String>>,
}

impl InMemoryFinancialSource {
    pub fn set(&self, external_reference: &str, financials: DwFinancials) {
        match self.figures.lock() {
            Ok(mut figures) => figures.insert(external_reference.to_string(), financials),
            Err(poisoned) => {
                poisoned.into_inner().insert(external_reference.to_string(), financials)
            }
        };
        match self.failing.lock() {
            Ok(mut failing) => failing.remove(external_reference),
            Err(poisoned) => poisoned.into_inner().remove(external_reference),
        };
    }

    pub fn fail(&self, external_reference: &str) {
        match self.failing.lock() {
            Ok(mut failing) => failing.insert(external_reference.to_string()),
            Err(poisoned) => poisoned.into_inner().insert(external_reference.to_string()),
        };
    }
}

#[async_trait]
impl FinancialSource for InMemoryFinancialSource {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn project_financials(
        &self,
        _company_id: &CompanyId,
        external_reference: &str,
    ) -> Result<DwFinancials, FinancialSourceError> {
        let failing = match self.failing.lock() {
            Ok(failing) => failing.contains(external_reference),
            Err(poisoned) => poisoned.into_inner().contains(external_reference),
        };
        if failing {
            return Err(FinancialSourceError::Unavailable(format!(
                "query for `{external_reference}` failed"
            )));
        }

        let figures = match self.figures.lock() {
            Ok(figures) => figures.get(external_reference).copied(),
            Err(poisoned) => poisoned.into_inner().get(external_reference).copied(),
        };
        Ok(figures.unwrap_or_default())
    }
}
