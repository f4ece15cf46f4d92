use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::offer::OfferPhase;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferField {
    Title,
    Value,
    Cost,
    Probability,
    Notes,
    SentDate,
    DueDate,
    ExpirationDate,
    ResponsibleUser,
    Description,
    StartDate,
    EndDate,
    OfferNumber,
    ExternalReference,
}

impl OfferField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Value => "value",
            Self::Cost => "cost",
            Self::Probability => "probability",
            Self::Notes => "notes",
            Self::SentDate => "sent_date",
            Self::DueDate => "due_date",
            Self::ExpirationDate => "expiration_date",
            Self::ResponsibleUser => "responsible_user",
            Self::Description => "description",
            Self::StartDate => "start_date",
            Self::EndDate => "end_date",
            Self::OfferNumber => "offer_number",
            Self::ExternalReference => "external_reference",
        }
    }
}

impl fmt::Display for OfferField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Viewer,
    Member,
    Admin,
    System,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: ActorRole,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: ActorRole) -> Self {
        Self { id: id.into(), role }
    }

    pub fn member(id: impl Into<String>) -> Self {
        Self::new(id, ActorRole::Member)
    }

    pub fn system() -> Self {
        Self::new("system", ActorRole::System)
    }
}

/// Whether `role` may change `field` on an offer currently in `phase`.
pub fn can_edit(field: OfferField, phase: OfferPhase, role: ActorRole) -> bool {
    if role == ActorRole::Viewer {
        return false;
    }

    match field {
        OfferField::Title
        | OfferField::Value
        | OfferField::Cost
        | OfferField::Probability
        | OfferField::Notes
        | OfferField::SentDate
        | OfferField::DueDate => !phase.is_closed(),
        OfferField::ResponsibleUser
        | OfferField::Description
        | OfferField::StartDate
        | OfferField::EndDate
        | OfferField::OfferNumber => true,
        OfferField::ExpirationDate => phase == OfferPhase::Sent,
        OfferField::ExternalReference => match role {
            ActorRole::Admin | ActorRole::System => true,
            _ => !phase.is_closed(),
        },
    }
}

pub(crate) fn ensure_editable(
    field: OfferField,
    offer_id: &crate::domain::offer::OfferId,
    phase: OfferPhase,
    role: ActorRole,
) -> Result<(), DomainError> {
    if can_edit(field, phase, role) {
        return Ok(());
    }
    if phase.is_closed() && role != ActorRole::Viewer {
        return Err(DomainError::AlreadyClosed { id: offer_id.clone(), phase });
    }
    Err(DomainError::FieldNotEditable { field, phase })
}

#[cfg(test)]
mod tests {
    use crate::domain::offer::{OfferId, OfferPhase};
    use crate::errors::DomainError;

    use super::{can_edit, ensure_editable, ActorRole, OfferField};

    const CLOSED: [OfferPhase; 3] = [OfferPhase::Won, OfferPhase::Lost, OfferPhase::Expired];

    #[test]
    fn commercial_fields_lock_once_closed() {
        for field in [OfferField::Title, OfferField::Value, OfferField::Probability] {
            assert!(can_edit(field, OfferPhase::Order, ActorRole::Member));
            for phase in CLOSED {
                assert!(!can_edit(field, phase, ActorRole::Member));
                assert!(!can_edit(field, phase, ActorRole::Admin));
            }
        }
    }

    #[test]
    fn ownership_and_schedule_fields_are_always_editable() {
        for field in [
            OfferField::ResponsibleUser,
            OfferField::Description,
            OfferField::StartDate,
            OfferField::EndDate,
        ] {
            for phase in OfferPhase::ALL {
                assert!(can_edit(field, phase, ActorRole::Member), "{field} in {phase}");
            }
        }
    }

    #[test]
    fn expiration_is_only_editable_while_sent() {
        let editable: Vec<_> = OfferPhase::ALL
            .into_iter()
            .filter(|phase| can_edit(OfferField::ExpirationDate, *phase, ActorRole::Member))
            .collect();
        assert_eq!(editable, vec![OfferPhase::Sent]);
    }

    #[test]
    fn admins_can_correct_external_reference_on_closed_offers() {
        assert!(!can_edit(OfferField::ExternalReference, OfferPhase::Won, ActorRole::Member));
        assert!(can_edit(OfferField::ExternalReference, OfferPhase::Won, ActorRole::Admin));
    }

    #[test]
    fn viewers_cannot_edit_anything() {
        assert!(!can_edit(OfferField::Description, OfferPhase::Draft, ActorRole::Viewer));
        assert_eq!(
            ensure_editable(
                OfferField::Notes,
                &OfferId("off-1".to_string()),
                OfferPhase::Won,
                ActorRole::Viewer
            ),
            Err(DomainError::FieldNotEditable { field: OfferField::Notes, phase: OfferPhase::Won })
        );
    }

    #[test]
    fn denial_on_closed_offer_reports_already_closed() {
        let error = ensure_editable(
            OfferField::Cost,
            &OfferId("off-1".to_string()),
            OfferPhase::Lost,
            ActorRole::Member,
        );
        assert!(matches!(error, Err(DomainError::AlreadyClosed { phase: OfferPhase::Lost, .. })));

        let error = ensure_editable(
            OfferField::ExpirationDate,
            &OfferId("off-1".to_string()),
            OfferPhase::Order,
            ActorRole::Member,
        );
        assert!(matches!(error, Err(DomainError::FieldNotEditable { .. })));
    }
}
