use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::activity::{record_quietly, ActivityEntry, ActivitySink, ActivityTarget};
use crate::domain::customer::CustomerId;
use crate::domain::offer::{Offer, OfferId};
use crate::domain::project::ProjectId;
use crate::errors::{ApplicationError, DomainError};
use crate::lifecycle::Actor;
use crate::repository::{OfferRepository, ProjectRepository};

/// Keeps the offer to project association and the project's derived customer in step.
pub struct ProjectLinker {
    offers: Arc<dyn OfferRepository>,
    projects: Arc<dyn ProjectRepository>,
    activity: Arc<dyn ActivitySink>,
}

impl ProjectLinker {
    pub fn new(
        offers: Arc<dyn OfferRepository>,
        projects: Arc<dyn ProjectRepository>,
        activity: Arc<dyn ActivitySink>,
    ) -> Self {
        Self { offers, projects, activity }
    }

    pub async fn link(
        &self,
        offer_id: &OfferId,
        project_id: &ProjectId,
        actor: &Actor,
    ) -> Result<Offer, ApplicationError> {
        let mut offer = self.load_open(offer_id).await?;
        let project = self
            .projects
            .find_by_id(project_id)
            .await?
            .ok_or_else(|| DomainError::ProjectNotFound(project_id.clone()))?;

        if project.company_id != offer.company_id {
            return Err(DomainError::Validation(format!(
                "project `{project_id}` belongs to another company"
            ))
            .into());
        }
        if !project.phase.accepts_offers() {
            return Err(DomainError::ProjectNotInTilbudPhase {
                project_id: project.id,
                phase: project.phase,
            }
            .into());
        }
        if offer.project_id.as_ref() == Some(project_id) {
            return Ok(offer);
        }

        let now = Utc::now();
        let previous = offer.project_id.replace(project_id.clone());
        offer.project_linked_at = Some(now);
        self.persist(&mut offer, actor, now).await?;

        self.rederive_customer(project_id, now).await?;
        if let Some(previous) = &previous {
            self.rederive_customer(previous, now).await?;
        }

        let body = match &previous {
            Some(previous) => format!("Moved from project {previous} to project {project_id}"),
            None => format!("Linked to project {project_id}"),
        };
        self.record(&offer, "Offer linked to project", body, actor).await;
        tracing::info!(
            event_name = "offer.project.linked",
            offer_id = %offer.id,
            project_id = %project_id,
            previous_project_id = previous.as_ref().map(|id| id.0.as_str()).unwrap_or(""),
            "offer linked to project"
        );
        Ok(offer)
    }

    /// Detaching an offer that has no project is a no-op.
    pub async fn unlink(&self, offer_id: &OfferId, actor: &Actor) -> Result<Offer, ApplicationError> {
        let mut offer = self.load_open(offer_id).await?;
        let Some(previous) = offer.project_id.take() else {
            return Ok(offer);
        };

        let now = Utc::now();
        offer.project_linked_at = None;
        self.persist(&mut offer, actor, now).await?;
        self.rederive_customer(&previous, now).await?;

        self.record(
            &offer,
            "Offer unlinked from project",
            format!("Unlinked from project {previous}"),
            actor,
        )
        .await;
        tracing::info!(
            event_name = "offer.project.unlinked",
            offer_id = %offer.id,
            project_id = %previous,
            "offer unlinked from project"
        );
        Ok(offer)
    }

    /// Sets the project's customer to that of its most recently linked offer, or clears it
    /// when nothing is linked.
    pub async fn rederive_customer(
        &self,
        project_id: &ProjectId,
        now: DateTime<Utc>,
    ) -> Result<Option<CustomerId>, ApplicationError> {
        let linked = self.offers.list_by_project(project_id).await?;
        let customer = linked
            .iter()
            .max_by(|a, b| {
                a.project_linked_at.cmp(&b.project_linked_at).then_with(|| a.id.cmp(&b.id))
            })
            .and_then(|offer| offer.customer_id.clone());

        self.projects.set_customer(project_id, customer.as_ref(), now).await?;
        tracing::debug!(
            event_name = "project.customer.rederived",
            project_id = %project_id,
            linked_offers = linked.len(),
            customer_id = customer.as_ref().map(|id| id.0.as_str()).unwrap_or(""),
            "re-derived project customer"
        );
        Ok(customer)
    }

    async fn load_open(&self, offer_id: &OfferId) -> Result<Offer, ApplicationError> {
        let offer = self
            .offers
            .find_by_id(offer_id)
            .await?
            .ok_or_else(|| DomainError::OfferNotFound(offer_id.clone()))?;
        if offer.is_closed() {
            return Err(DomainError::AlreadyClosed { id: offer.id, phase: offer.phase }.into());
        }
        Ok(offer)
    }

    async fn persist(
        &self,
        offer: &mut Offer,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        let expected = offer.version;
        offer.updated_by = actor.id.clone();
        offer.updated_at = now;
        offer.version = expected + 1;
        self.offers.update(offer, expected).await?;
        Ok(())
    }

    async fn record(&self, offer: &Offer, title: &str, body: String, actor: &Actor) {
        record_quietly(
            self.activity.as_ref(),
            ActivityEntry::new(
                ActivityTarget::Offer,
                offer.id.0.clone(),
                title,
                body,
                actor.id.clone(),
            ),
        )
        .await;
    }
}
