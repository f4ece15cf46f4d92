use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::company::CompanyId;
use crate::domain::customer::CustomerId;
use crate::domain::financials::DwFinancials;
use crate::domain::project::ProjectId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OfferId(pub String);

impl fmt::Display for OfferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferPhase {
    Draft,
    Sent,
    InProgress,
    Order,
    Won,
    Lost,
    Expired,
}

impl OfferPhase {
    pub const ALL: [OfferPhase; 7] = [
        Self::Draft,
        Self::Sent,
        Self::InProgress,
        Self::Order,
        Self::Won,
        Self::Lost,
        Self::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::InProgress => "in_progress",
            Self::Order => "order",
            Self::Won => "won",
            Self::Lost => "lost",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "sent" => Some(Self::Sent),
            "in_progress" => Some(Self::InProgress),
            "order" => Some(Self::Order),
            "won" => Some(Self::Won),
            "lost" => Some(Self::Lost),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Won, lost and expired are terminal.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Won | Self::Lost | Self::Expired)
    }

    pub fn can_transition_to(&self, next: OfferPhase) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Sent)
                | (Self::Draft, Self::InProgress)
                | (Self::Sent, Self::InProgress)
                | (Self::InProgress, Self::Order)
                | (Self::InProgress, Self::Lost)
                | (Self::InProgress, Self::Expired)
                | (Self::Order, Self::Won)
                | (Self::Order, Self::Lost)
        )
    }

    pub fn successors(&self) -> Vec<OfferPhase> {
        Self::ALL.into_iter().filter(|next| self.can_transition_to(*next)).collect()
    }
}

impl fmt::Display for OfferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub company_id: CompanyId,
    pub customer_id: Option<CustomerId>,
    pub project_id: Option<ProjectId>,
    pub project_linked_at: Option<DateTime<Utc>>,
    pub title: String,
    pub description: String,
    pub notes: String,
    pub phase: OfferPhase,
    pub offer_number: String,
    pub external_reference: String,
    pub probability: u8,
    pub value: Decimal,
    pub cost: Decimal,
    pub financials: DwFinancials,
    pub spent: Decimal,
    pub invoiced: Decimal,
    pub responsible_user: Option<String>,
    pub sent_date: Option<DateTime<Utc>>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub dw_last_synced_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub updated_by: String,
    /// Bumped on every lifecycle write; used as the compare-and-set token.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Offer {
    pub fn draft(
        id: OfferId,
        company_id: CompanyId,
        title: impl Into<String>,
        created_by: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let created_by = created_by.into();
        Self {
            id,
            company_id,
            customer_id: None,
            project_id: None,
            project_linked_at: None,
            title: title.into(),
            description: String::new(),
            notes: String::new(),
            phase: OfferPhase::Draft,
            offer_number: String::new(),
            external_reference: String::new(),
            probability: 0,
            value: Decimal::ZERO,
            cost: Decimal::ZERO,
            financials: DwFinancials::default(),
            spent: Decimal::ZERO,
            invoiced: Decimal::ZERO,
            responsible_user: None,
            sent_date: None,
            expiration_date: None,
            start_date: None,
            end_date: None,
            due_date: None,
            dw_last_synced_at: None,
            updated_by: created_by.clone(),
            created_by,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.phase.is_closed()
    }

    pub fn responsible(&self) -> Option<&str> {
        self.responsible_user.as_deref().map(str::trim).filter(|user| !user.is_empty())
    }

    pub fn has_external_reference(&self) -> bool {
        !self.external_reference.trim().is_empty()
    }

    /// `value * probability / 100`.
    pub fn weighted_value(&self) -> Decimal {
        self.value * Decimal::from(self.probability) / Decimal::ONE_HUNDRED
    }

    pub fn margin_percent(&self) -> Decimal {
        if self.value.is_zero() {
            return Decimal::ZERO;
        }
        if self.cost.is_zero() {
            return Decimal::ONE_HUNDRED;
        }
        ((self.value - self.cost) / self.value * Decimal::ONE_HUNDRED).round_dp(2)
    }

    /// Draft offers never carry a number and every other phase always does.
    pub fn check_number_invariant(&self) -> Result<(), DomainError> {
        let has_number = !self.offer_number.trim().is_empty();
        match (self.phase, has_number) {
            (OfferPhase::Draft, true) => Err(DomainError::DraftOfferCannotHaveNumber),
            (phase, false) if phase != OfferPhase::Draft => {
                Err(DomainError::NonDraftOfferMustHaveNumber)
            }
            _ => Ok(()),
        }
    }

    pub fn check_date_order(&self) -> Result<(), DomainError> {
        if let (Some(sent), Some(expiration)) = (self.sent_date, self.expiration_date) {
            if expiration < sent {
                return Err(DomainError::InvalidDateRange(
                    "expiration_date must not be before sent_date".to_string(),
                ));
            }
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if end < start {
                return Err(DomainError::InvalidDateRange(
                    "end_date must not be before start_date".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn apply_financials(&mut self, financials: DwFinancials, synced_at: DateTime<Utc>) {
        self.financials = financials;
        self.spent = financials.total_costs();
        self.invoiced = financials.total_income;
        self.dw_last_synced_at = Some(synced_at);
    }

    pub fn clear_financials(&mut self) {
        self.financials = DwFinancials::default();
        self.spent = Decimal::ZERO;
        self.invoiced = Decimal::ZERO;
        self.dw_last_synced_at = None;
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use crate::domain::company::CompanyId;
    use crate::domain::financials::DwFinancials;
    use crate::errors::DomainError;

    use super::{Offer, OfferId, OfferPhase};

    fn offer(phase: OfferPhase, number: &str) -> Offer {
        let mut offer = Offer::draft(
            OfferId("off-1".to_string()),
            CompanyId("stalbygg".to_string()),
            "Hall roof",
            "kari",
            Utc::now(),
        );
        offer.phase = phase;
        offer.offer_number = number.to_string();
        offer
    }

    #[test]
    fn transition_graph_matches_lifecycle() {
        assert_eq!(OfferPhase::Draft.successors(), vec![OfferPhase::Sent, OfferPhase::InProgress]);
        assert_eq!(OfferPhase::Sent.successors(), vec![OfferPhase::InProgress]);
        assert_eq!(
            OfferPhase::InProgress.successors(),
            vec![OfferPhase::Order, OfferPhase::Lost, OfferPhase::Expired]
        );
        assert_eq!(OfferPhase::Order.successors(), vec![OfferPhase::Won, OfferPhase::Lost]);
        for closed in [OfferPhase::Won, OfferPhase::Lost, OfferPhase::Expired] {
            assert!(closed.is_closed());
            assert!(closed.successors().is_empty());
        }
    }

    #[test]
    fn phase_storage_encoding_round_trips() {
        for phase in OfferPhase::ALL {
            assert_eq!(OfferPhase::parse(phase.as_str()), Some(phase));
        }
        assert_eq!(OfferPhase::parse(" IN_PROGRESS "), Some(OfferPhase::InProgress));
        assert_eq!(OfferPhase::parse("cancelled"), None);
    }

    #[test]
    fn number_invariant_depends_on_phase() {
        assert!(offer(OfferPhase::Draft, "").check_number_invariant().is_ok());
        assert!(offer(OfferPhase::Sent, "ST-2025-001").check_number_invariant().is_ok());
        assert_eq!(
            offer(OfferPhase::Draft, "ST-2025-001").check_number_invariant(),
            Err(DomainError::DraftOfferCannotHaveNumber)
        );
        assert_eq!(
            offer(OfferPhase::Order, " ").check_number_invariant(),
            Err(DomainError::NonDraftOfferMustHaveNumber)
        );
    }

    #[test]
    fn date_order_rejects_inverted_ranges() {
        let now = Utc::now();
        let mut offer = offer(OfferPhase::Sent, "ST-2025-001");
        offer.sent_date = Some(now);
        offer.expiration_date = Some(now - Duration::days(1));
        assert!(matches!(offer.check_date_order(), Err(DomainError::InvalidDateRange(_))));

        offer.expiration_date = Some(now);
        offer.start_date = Some(now);
        offer.end_date = Some(now + Duration::days(30));
        assert!(offer.check_date_order().is_ok());
    }

    #[test]
    fn margin_handles_zero_cost_and_zero_value() {
        let mut offer = offer(OfferPhase::Draft, "");
        assert_eq!(offer.margin_percent(), Decimal::ZERO);

        offer.value = Decimal::new(1_000, 0);
        assert_eq!(offer.margin_percent(), Decimal::ONE_HUNDRED);

        offer.cost = Decimal::new(750, 0);
        assert_eq!(offer.margin_percent(), Decimal::new(25, 0));
    }

    #[test]
    fn weighted_value_uses_probability_percent() {
        let mut offer = offer(OfferPhase::Sent, "ST-2025-001");
        offer.value = Decimal::new(2_000, 0);
        offer.probability = 25;
        assert_eq!(offer.weighted_value(), Decimal::new(500, 0));
    }

    #[test]
    fn applying_and_clearing_financials_updates_derived_totals() {
        let mut offer = offer(OfferPhase::Order, "ST-2025-001");
        let financials = DwFinancials {
            total_income: Decimal::new(900, 0),
            material_costs: Decimal::new(100, 0),
            employee_costs: Decimal::new(200, 0),
            other_costs: Decimal::new(50, 0),
            net_result: Decimal::new(550, 0),
        };

        offer.apply_financials(financials, Utc::now());
        assert_eq!(offer.spent, Decimal::new(350, 0));
        assert_eq!(offer.invoiced, Decimal::new(900, 0));
        assert!(offer.dw_last_synced_at.is_some());

        offer.clear_financials();
        assert_eq!(offer.financials, DwFinancials::default());
        assert_eq!(offer.spent, Decimal::ZERO);
        assert_eq!(offer.invoiced, Decimal::ZERO);
        assert!(offer.dw_last_synced_at.is_none());
    }
}
