use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::activity::{record_quietly, ActivityEntry, ActivitySink, ActivityTarget};
use crate::domain::company::CompanyId;
use crate::domain::financials::DwFinancials;
use crate::domain::offer::{Offer, OfferId};
use crate::errors::{ApplicationError, DomainError};
use crate::repository::OfferRepository;

/// Age after which the startup pass re-syncs an offer.
pub const DEFAULT_STALE_MAX_AGE: Duration = Duration::from_secs(60 * 60);
/// Age used by the periodic pass. Kept under the hourly schedule interval.
pub const SCHEDULED_STALE_MAX_AGE: Duration = Duration::from_secs(55 * 60);
pub const DEFAULT_BULK_CONCURRENCY: usize = 4;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FinancialSourceError {
    #[error("financial source is disabled")]
    Disabled,
    #[error("financial source unavailable: {0}")]
    Unavailable(String),
    #[error("financial source returned an unreadable response: {0}")]
    Decode(String),
}

/// External system holding authoritative income and cost figures.
#[async_trait]
pub trait FinancialSource: Send + Sync {
    fn is_enabled(&self) -> bool;

    async fn project_financials(
        &self,
        company_id: &CompanyId,
        external_reference: &str,
    ) -> Result<DwFinancials, FinancialSourceError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledFinancialSource;

#[async_trait]
impl FinancialSource for DisabledFinancialSource {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn project_financials(
        &self,
        _company_id: &CompanyId,
        _external_reference: &str,
    ) -> Result<DwFinancials, FinancialSourceError> {
        Err(FinancialSourceError::Disabled)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SyncOutcome {
    pub offer_id: OfferId,
    pub external_reference: String,
    pub financials: DwFinancials,
    pub spent: Decimal,
    pub invoiced: Decimal,
    pub synced_at: Option<DateTime<Utc>>,
    /// False when the source is disabled, the offer has no reference, or the query failed.
    pub connected: bool,
    pub persisted: bool,
}

impl SyncOutcome {
    fn from_offer(offer: &Offer, connected: bool, persisted: bool) -> Self {
        Self {
            offer_id: offer.id.clone(),
            external_reference: offer.external_reference.clone(),
            financials: offer.financials,
            spent: offer.spent,
            invoiced: offer.invoiced,
            synced_at: offer.dw_last_synced_at,
            connected,
            persisted,
        }
    }

    fn disconnected(offer: &Offer) -> Self {
        Self::from_offer(offer, false, false)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounts {
    pub synced: usize,
    pub failed: usize,
}

#[derive(Clone, Copy, Debug)]
pub struct SyncSettings {
    pub bulk_concurrency: usize,
    pub scheduled_max_age: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            bulk_concurrency: DEFAULT_BULK_CONCURRENCY,
            scheduled_max_age: SCHEDULED_STALE_MAX_AGE,
        }
    }
}

/// Pulls warehouse figures onto offers. Failures degrade to a disconnected result.
pub struct FinancialSync {
    offers: Arc<dyn OfferRepository>,
    source: Arc<dyn FinancialSource>,
    activity: Arc<dyn ActivitySink>,
    settings: SyncSettings,
}

impl FinancialSync {
    pub fn new(
        offers: Arc<dyn OfferRepository>,
        source: Arc<dyn FinancialSource>,
        activity: Arc<dyn ActivitySink>,
    ) -> Self {
        Self { offers, source, activity, settings: SyncSettings::default() }
    }

    pub fn with_settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.source.is_enabled()
    }

    pub async fn sync_one(&self, offer_id: &OfferId) -> Result<SyncOutcome, ApplicationError> {
        let offer = self
            .offers
            .find_by_id(offer_id)
            .await?
            .ok_or_else(|| DomainError::OfferNotFound(offer_id.clone()))?;

        if !offer.has_external_reference() || !self.source.is_enabled() {
            return Ok(SyncOutcome::disconnected(&offer));
        }

        let reference = offer.external_reference.trim().to_string();
        let financials = match self.source.project_financials(&offer.company_id, &reference).await
        {
            Ok(financials) => financials,
            Err(error) => {
                tracing::warn!(
                    event_name = "sync.offer.query_failed",
                    offer_id = %offer.id,
                    external_reference = %reference,
                    error = %error,
                    "financial source query failed; returning stale figures"
                );
                return Ok(SyncOutcome::disconnected(&offer));
            }
        };

        let synced_at = Utc::now();
        let mut updated = offer.clone();
        updated.apply_financials(financials, synced_at);

        let write = self
            .offers
            .update_financials(&offer.id, &offer.external_reference, &financials, Some(synced_at))
            .await;
        let persisted = match write {
            Ok(true) => true,
            Ok(false) => {
                tracing::info!(
                    event_name = "sync.offer.reference_changed",
                    offer_id = %offer.id,
                    external_reference = %reference,
                    "external reference changed during sync; figures discarded"
                );
                false
            }
            Err(error) => {
                tracing::warn!(
                    event_name = "sync.offer.persist_failed",
                    offer_id = %offer.id,
                    error = %error,
                    "failed to persist synced figures"
                );
                false
            }
        };

        if persisted {
            record_quietly(
                self.activity.as_ref(),
                ActivityEntry::new(
                    ActivityTarget::Offer,
                    offer.id.0.clone(),
                    "Financial data synced",
                    format!(
                        "Synced from {reference}: income {}, costs {}, net result {}",
                        financials.total_income,
                        financials.total_costs(),
                        financials.net_result
                    ),
                    "system",
                ),
            )
            .await;
        }

        tracing::info!(
            event_name = "sync.offer.completed",
            offer_id = %offer.id,
            external_reference = %reference,
            persisted,
            "synced offer financials"
        );
        Ok(SyncOutcome::from_offer(&updated, true, persisted))
    }

    /// Syncs order-phase offers whose figures are missing or older than `max_age`.
    pub async fn sync_stale(&self, max_age: Duration) -> Result<SyncCounts, ApplicationError> {
        if !self.source.is_enabled() {
            tracing::info!(
                event_name = "sync.batch.skipped",
                "financial source disabled; skipping bulk sync"
            );
            return Ok(SyncCounts::default());
        }

        let now = Utc::now();
        let age = chrono::Duration::from_std(max_age)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        let stale_before = now.checked_sub_signed(age).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let candidates = self.offers.list_sync_candidates(stale_before).await?;
        let total = candidates.len();

        tracing::info!(
            event_name = "sync.batch.start",
            candidates = total,
            max_age_secs = max_age.as_secs(),
            "starting bulk financial sync"
        );

        let this = self;
        let results: Vec<bool> = stream::iter(candidates)
            .map(move |offer| async move {
                match this.sync_one(&offer.id).await {
                    Ok(outcome) => outcome.connected && outcome.persisted,
                    Err(error) => {
                        tracing::warn!(
                            event_name = "sync.batch.item_failed",
                            offer_id = %offer.id,
                            error = %error,
                            "bulk sync item failed"
                        );
                        false
                    }
                }
            })
            .buffer_unordered(self.settings.bulk_concurrency.max(1))
            .collect()
            .await;

        let synced = results.iter().filter(|ok| **ok).count();
        let counts = SyncCounts { synced, failed: results.len() - synced };
        tracing::info!(
            event_name = "sync.batch.finished",
            synced = counts.synced,
            failed = counts.failed,
            "bulk financial sync finished"
        );
        Ok(counts)
    }

    /// Scheduled variant of [`FinancialSync::sync_stale`].
    pub async fn sync_all(&self) -> Result<SyncCounts, ApplicationError> {
        self.sync_stale(self.settings.scheduled_max_age).await
    }
}

/// Hands an offer to the sync adapter without waiting for the result.
pub trait SyncTrigger: Send + Sync {
    fn schedule(&self, offer_id: OfferId);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSyncTrigger;

impl SyncTrigger for NoopSyncTrigger {
    fn schedule(&self, _offer_id: OfferId) {}
}

/// Spawns `sync_one` on the current tokio runtime.
#[derive(Clone)]
pub struct DetachedSync {
    sync: Arc<FinancialSync>,
}

impl DetachedSync {
    pub fn new(sync: Arc<FinancialSync>) -> Self {
        Self { sync }
    }
}

impl SyncTrigger for DetachedSync {
    fn schedule(&self, offer_id: OfferId) {
        if !self.sync.is_enabled() {
            return;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(error) => {
                tracing::warn!(
                    event_name = "sync.offer.not_scheduled",
                    offer_id = %offer_id,
                    error = %error,
                    "no async runtime available for detached sync"
                );
                return;
            }
        };

        let sync = self.sync.clone();
        handle.spawn(async move {
            if let Err(error) = sync.sync_one(&offer_id).await {
                tracing::warn!(
                    event_name = "sync.offer.detached_failed",
                    offer_id = %offer_id,
                    error = %error,
                    "detached financial sync failed"
                );
            }
        });
    }
}

/// Collects scheduled offer ids instead of syncing them.
#[derive(Clone, Default)]
pub struct RecordingSyncTrigger {
    scheduled: Arc<Mutex<Vec<OfferId>>>,
}

impl RecordingSyncTrigger {
    pub fn scheduled(&self) -> Vec<OfferId> {
        match self.scheduled.lock() {
            Ok(scheduled) => scheduled.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl SyncTrigger for RecordingSyncTrigger {
    fn schedule(&self, offer_id: OfferId) {
        match self.scheduled.lock() {
            Ok(mut scheduled) => scheduled.push(offer_id),
            Err(poisoned) => poisoned.into_inner().push(offer_id),
        }
    }
}
