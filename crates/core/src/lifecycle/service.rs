use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::activity::{record_quietly, ActivityEntry, ActivitySink, ActivityTarget};
use crate::domain::company::CompanyId;
use crate::domain::customer::CustomerId;
use crate::domain::offer::{Offer, OfferId, OfferPhase};
use crate::errors::{ApplicationError, DomainError};
use crate::lifecycle::permissions::{ensure_editable, Actor, OfferField};
use crate::numbering::OfferNumbering;
use crate::repository::{CompanyRepository, OfferRepository, ProjectRepository, RepositoryError};
use crate::sync::{NoopSyncTrigger, SyncTrigger};

pub const DEFAULT_EXPIRATION_DAYS: i64 = 60;
/// Sequence draws per transition before minting gives up with a number conflict.
const MAX_NUMBER_ATTEMPTS: usize = 5;

#[derive(Clone, Copy, Debug)]
pub struct LifecycleSettings {
    /// Days after `sent_date` used when an offer is sent without an expiration date.
    pub default_expiration_days: i64,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self { default_expiration_days: DEFAULT_EXPIRATION_DAYS }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewOffer {
    pub company_id: CompanyId,
    pub customer_id: Option<CustomerId>,
    pub title: String,
    pub description: String,
    pub value: Decimal,
    pub cost: Decimal,
    pub probability: u8,
    pub responsible_user: Option<String>,
}

/// One field write. Dates are full timestamps; `None` clears the field.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldChange {
    Title(String),
    Value(Decimal),
    Cost(Decimal),
    Probability(u8),
    Notes(String),
    SentDate(Option<DateTime<Utc>>),
    DueDate(Option<DateTime<Utc>>),
    ExpirationDate(Option<DateTime<Utc>>),
    ResponsibleUser(Option<String>),
    Description(String),
    StartDate(Option<DateTime<Utc>>),
    EndDate(Option<DateTime<Utc>>),
}

impl FieldChange {
    pub fn field(&self) -> OfferField {
        match self {
            Self::Title(_) => OfferField::Title,
            Self::Value(_) => OfferField::Value,
            Self::Cost(_) => OfferField::Cost,
            Self::Probability(_) => OfferField::Probability,
            Self::Notes(_) => OfferField::Notes,
            Self::SentDate(_) => OfferField::SentDate,
            Self::DueDate(_) => OfferField::DueDate,
            Self::ExpirationDate(_) => OfferField::ExpirationDate,
            Self::ResponsibleUser(_) => OfferField::ResponsibleUser,
            Self::Description(_) => OfferField::Description,
            Self::StartDate(_) => OfferField::StartDate,
            Self::EndDate(_) => OfferField::EndDate,
        }
    }
}

/// Phase state machine and phase-gated field edits for offers.
///
/// Writes are optimistic: each one is a compare-and-set on the offer version, and a
/// concurrent writer surfaces as [`DomainError::ConcurrentModification`].
pub struct OfferLifecycle {
    offers: Arc<dyn OfferRepository>,
    projects: Arc<dyn ProjectRepository>,
    companies: Arc<dyn CompanyRepository>,
    numbering: Arc<OfferNumbering>,
    activity: Arc<dyn ActivitySink>,
    sync: Arc<dyn SyncTrigger>,
    settings: LifecycleSettings,
}

impl OfferLifecycle {
    pub fn new(
        offers: Arc<dyn OfferRepository>,
        projects: Arc<dyn ProjectRepository>,
        companies: Arc<dyn CompanyRepository>,
        numbering: Arc<OfferNumbering>,
        activity: Arc<dyn ActivitySink>,
    ) -> Self {
        Self {
            offers,
            projects,
            companies,
            numbering,
            activity,
            sync: Arc::new(NoopSyncTrigger),
            settings: LifecycleSettings::default(),
        }
    }

    pub fn with_sync_trigger(mut self, sync: Arc<dyn SyncTrigger>) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_settings(mut self, settings: LifecycleSettings) -> Self {
        self.settings = settings;
        self
    }

    pub async fn get(&self, id: &OfferId) -> Result<Offer, ApplicationError> {
        self.load(id).await
    }

    pub async fn create(&self, new: NewOffer, actor: &Actor) -> Result<Offer, ApplicationError> {
        if new.title.trim().is_empty() {
            return Err(DomainError::Validation("title must not be empty".to_string()).into());
        }
        validate_probability(new.probability)?;
        validate_amount(OfferField::Value, new.value)?;
        validate_amount(OfferField::Cost, new.cost)?;

        let now = Utc::now();
        let mut offer = Offer::draft(
            OfferId(Uuid::new_v4().to_string()),
            new.company_id,
            new.title.trim(),
            actor.id.clone(),
            now,
        );
        offer.customer_id = new.customer_id;
        offer.description = new.description;
        offer.value = new.value;
        offer.cost = new.cost;
        offer.probability = new.probability;
        offer.responsible_user = new.responsible_user;

        self.offers.insert(&offer).await?;
        self.record(&offer, "Offer created", format!("Offer '{}' created", offer.title), actor)
            .await;
        tracing::info!(
            event_name = "offer.created",
            offer_id = %offer.id,
            company_id = %offer.company_id,
            actor = %actor.id,
            "offer created"
        );
        Ok(offer)
    }

    /// Moves an offer one step along the phase graph.
    pub async fn advance(
        &self,
        id: &OfferId,
        target: OfferPhase,
        actor: &Actor,
    ) -> Result<Offer, ApplicationError> {
        let mut offer = self.load(id).await?;
        let from = offer.phase;

        if from == OfferPhase::Won && target == OfferPhase::Won {
            return Err(DomainError::AlreadyWon(offer.id).into());
        }
        if from.is_closed() {
            return Err(DomainError::AlreadyClosed { id: offer.id, phase: from }.into());
        }
        if !from.can_transition_to(target) {
            return Err(DomainError::InvalidPhaseTransition { from, to: target }.into());
        }

        if target == OfferPhase::InProgress && offer.responsible().is_none() {
            let fallback = self
                .companies
                .find_by_id(&offer.company_id)
                .await?
                .and_then(|company| company.default_responsible().map(str::to_string));
            match fallback {
                Some(user) => offer.responsible_user = Some(user),
                None => return Err(DomainError::MissingResponsible(offer.id).into()),
            }
        }

        if target == OfferPhase::Won {
            if let Some(project_id) = &offer.project_id {
                let project = self
                    .projects
                    .find_by_id(project_id)
                    .await?
                    .ok_or_else(|| DomainError::ProjectNotFound(project_id.clone()))?;
                if !project.phase.accepts_offers() {
                    return Err(DomainError::ProjectNotInTilbudPhase {
                        project_id: project.id,
                        phase: project.phase,
                    }
                    .into());
                }
            }
        }

        let now = Utc::now();
        if target == OfferPhase::Sent {
            let sent = *offer.sent_date.get_or_insert(now);
            if offer.expiration_date.is_none() {
                offer.expiration_date =
                    Some(sent + chrono::Duration::days(self.settings.default_expiration_days));
            }
        }

        if target != OfferPhase::Draft && offer.offer_number.trim().is_empty() {
            offer.offer_number = self.mint_number(&offer, now.year()).await?;
        }

        offer.phase = target;
        offer.check_number_invariant()?;
        offer.check_date_order()?;
        self.persist(&mut offer, actor, now).await?;

        self.record(
            &offer,
            "Offer phase changed",
            format!("Offer {} '{}' moved from {from} to {target}", offer.offer_number, offer.title),
            actor,
        )
        .await;
        tracing::info!(
            event_name = "offer.phase.advanced",
            offer_id = %offer.id,
            from = from.as_str(),
            to = target.as_str(),
            offer_number = %offer.offer_number,
            actor = %actor.id,
            "offer phase advanced"
        );

        if target == OfferPhase::Order && offer.has_external_reference() {
            self.sync.schedule(offer.id.clone());
        }

        Ok(offer)
    }

    /// Applies one phase-gated field write and records the old and new value.
    pub async fn update_field(
        &self,
        id: &OfferId,
        change: FieldChange,
        actor: &Actor,
    ) -> Result<Offer, ApplicationError> {
        let mut offer = self.load(id).await?;
        let field = change.field();
        ensure_editable(field, &offer.id, offer.phase, actor.role)?;

        let (old, new) = apply_change(&mut offer, change)?;
        offer.check_date_order()?;
        self.persist(&mut offer, actor, Utc::now()).await?;

        self.record(&offer, "Offer updated", format!("{field} changed from {old} to {new}"), actor)
            .await;
        Ok(offer)
    }

    /// Administrative correction of the offer number.
    pub async fn update_offer_number(
        &self,
        id: &OfferId,
        offer_number: &str,
        actor: &Actor,
    ) -> Result<Offer, ApplicationError> {
        let mut offer = self.load(id).await?;
        ensure_editable(OfferField::OfferNumber, &offer.id, offer.phase, actor.role)?;

        let requested = offer_number.trim();
        if offer.phase == OfferPhase::Draft {
            if !requested.is_empty() {
                return Err(DomainError::DraftOfferCannotHaveNumber.into());
            }
            return Ok(offer);
        }
        if requested.is_empty() {
            return Err(DomainError::NonDraftOfferMustHaveNumber.into());
        }
        if self.offers.offer_number_taken(&offer.company_id, requested, &offer.id).await? {
            return Err(DomainError::OfferNumberConflict(requested.to_string()).into());
        }

        let old = std::mem::replace(&mut offer.offer_number, requested.to_string());
        self.persist(&mut offer, actor, Utc::now()).await?;
        self.record(
            &offer,
            "Offer number corrected",
            format!("offer_number changed from {old} to {requested}"),
            actor,
        )
        .await;
        Ok(offer)
    }

    /// Sets or clears the warehouse reference. Clearing zeroes the synced figures in the same
    /// write; setting a new reference schedules a sync.
    pub async fn update_external_reference(
        &self,
        id: &OfferId,
        external_reference: &str,
        actor: &Actor,
    ) -> Result<Offer, ApplicationError> {
        let mut offer = self.load(id).await?;
        ensure_editable(OfferField::ExternalReference, &offer.id, offer.phase, actor.role)?;

        let requested = external_reference.trim();
        if requested == offer.external_reference {
            return Ok(offer);
        }
        if !requested.is_empty()
            && self.offers.external_reference_taken(&offer.company_id, requested, &offer.id).await?
        {
            return Err(DomainError::ExternalReferenceConflict(requested.to_string()).into());
        }

        let old = std::mem::replace(&mut offer.external_reference, requested.to_string());
        if requested.is_empty() {
            offer.clear_financials();
        }
        self.persist(&mut offer, actor, Utc::now()).await?;

        self.record(
            &offer,
            "External reference updated",
            format!(
                "external_reference changed from {} to {}",
                display_text(&old),
                display_text(requested)
            ),
            actor,
        )
        .await;

        if !requested.is_empty() {
            self.sync.schedule(offer.id.clone());
        }
        Ok(offer)
    }

    /// Draws sequence values until one is not already held by another offer of the company.
    /// Numbers set by hand can sit ahead of the counter.
    async fn mint_number(&self, offer: &Offer, year: i32) -> Result<String, ApplicationError> {
        let mut candidate = String::new();
        for _ in 0..MAX_NUMBER_ATTEMPTS {
            candidate = self.numbering.next(&offer.company_id, year).await?;
            if !self.offers.offer_number_taken(&offer.company_id, &candidate, &offer.id).await? {
                return Ok(candidate);
            }
            tracing::warn!(
                event_name = "offer.number.skipped",
                offer_id = %offer.id,
                offer_number = %candidate,
                "sequence value already in use; drawing the next one"
            );
        }
        Err(DomainError::OfferNumberConflict(candidate).into())
    }

    async fn load(&self, id: &OfferId) -> Result<Offer, ApplicationError> {
        self.offers
            .find_by_id(id)
            .await?
            .ok_or_else(|| DomainError::OfferNotFound(id.clone()).into())
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

        self.offers.update(offer, expected).await.map_err(|error| {
            if matches!(error, RepositoryError::VersionConflict { .. }) {
                tracing::warn!(
                    event_name = "offer.write.conflict",
                    offer_id = %offer.id,
                    expected_version = expected,
                    "offer changed between read and write"
                );
            }
            ApplicationError::from(error)
        })
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

fn validate_probability(probability: u8) -> Result<(), DomainError> {
    if probability > 100 {
        return Err(DomainError::Validation(format!(
            "probability must be between 0 and 100, got {probability}"
        )));
    }
    Ok(())
}

fn validate_amount(field: OfferField, amount: Decimal) -> Result<(), DomainError> {
    if amount < Decimal::ZERO {
        return Err(DomainError::Validation(format!("{field} must not be negative")));
    }
    Ok(())
}

fn display_text(value: &str) -> String {
    if value.is_empty() {
        "(empty)".to_string()
    } else {
        format!("'{value}'")
    }
}

fn display_date(value: Option<DateTime<Utc>>) -> String {
    value.map(|at| at.format("%Y-%m-%d").to_string()).unwrap_or_else(|| "(none)".to_string())
}

fn replace_date(
    slot: &mut Option<DateTime<Utc>>,
    value: Option<DateTime<Utc>>,
) -> (String, String) {
    let old = std::mem::replace(slot, value);
    (display_date(old), display_date(value))
}

fn apply_change(offer: &mut Offer, change: FieldChange) -> Result<(String, String), DomainError> {
    let described = match change {
        FieldChange::Title(title) => {
            let title = title.trim().to_string();
            if title.is_empty() {
                return Err(DomainError::Validation("title must not be empty".to_string()));
            }
            let old = std::mem::replace(&mut offer.title, title);
            (display_text(&old), display_text(&offer.title))
        }
        FieldChange::Value(value) => {
            validate_amount(OfferField::Value, value)?;
            let old = std::mem::replace(&mut offer.value, value);
            (old.to_string(), value.to_string())
        }
        FieldChange::Cost(cost) => {
            validate_amount(OfferField::Cost, cost)?;
            let old = std::mem::replace(&mut offer.cost, cost);
            (old.to_string(), cost.to_string())
        }
        FieldChange::Probability(probability) => {
            validate_probability(probability)?;
            let old = std::mem::replace(&mut offer.probability, probability);
            (format!("{old}%"), format!("{probability}%"))
        }
        FieldChange::Notes(notes) => {
            let old = std::mem::replace(&mut offer.notes, notes);
            (display_text(&old), display_text(&offer.notes))
        }
        FieldChange::Description(description) => {
            let old = std::mem::replace(&mut offer.description, description);
            (display_text(&old), display_text(&offer.description))
        }
        FieldChange::ResponsibleUser(user) => {
            let user = user.map(|user| user.trim().to_string()).filter(|user| !user.is_empty());
            let old = std::mem::replace(&mut offer.responsible_user, user);
            (
                display_text(old.as_deref().unwrap_or_default()),
                display_text(offer.responsible_user.as_deref().unwrap_or_default()),
            )
        }
        FieldChange::SentDate(at) => replace_date(&mut offer.sent_date, at),
        FieldChange::DueDate(at) => replace_date(&mut offer.due_date, at),
        FieldChange::ExpirationDate(at) => replace_date(&mut offer.expiration_date, at),
        FieldChange::StartDate(at) => replace_date(&mut offer.start_date, at),
        FieldChange::EndDate(at) => replace_date(&mut offer.end_date, at),
    };
    Ok(described)
}
