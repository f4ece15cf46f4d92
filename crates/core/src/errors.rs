use thiserror::Error;

use crate::domain::offer::{OfferId, OfferPhase};
use crate::domain::project::{ProjectId, ProjectPhase};
use crate::lifecycle::OfferField;
use crate::repository::RepositoryError;

/// Coarse classification callers use to pick a client-facing response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    Conflict,
    Validation,
    DependencyUnavailable,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("offer `{0}` was not found")]
    OfferNotFound(OfferId),
    #[error("project `{0}` was not found")]
    ProjectNotFound(ProjectId),
    #[error("offer `{id}` is closed ({phase})")]
    AlreadyClosed { id: OfferId, phase: OfferPhase },
    #[error("invalid phase transition from {from} to {to}")]
    InvalidPhaseTransition { from: OfferPhase, to: OfferPhase },
    #[error("offer `{0}` has no responsible user and its company has no default")]
    MissingResponsible(OfferId),
    #[error("project `{project_id}` is in phase {phase}, not tilbud")]
    ProjectNotInTilbudPhase { project_id: ProjectId, phase: ProjectPhase },
    #[error("offer `{0}` is already won")]
    AlreadyWon(OfferId),
    #[error("draft offers cannot have an offer number")]
    DraftOfferCannotHaveNumber,
    #[error("non-draft offers must have an offer number")]
    NonDraftOfferMustHaveNumber,
    #[error("offer number `{0}` is already in use")]
    OfferNumberConflict(String),
    #[error("external reference `{0}` is already in use")]
    ExternalReferenceConflict(String),
    #[error("invalid date range: {0}")]
    InvalidDateRange(String),
    #[error("field `{field}` is not editable in phase {phase}")]
    FieldNotEditable { field: OfferField, phase: OfferPhase },
    #[error("offer `{0}` was modified concurrently")]
    ConcurrentModification(OfferId),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

impl DomainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OfferNotFound(_) | Self::ProjectNotFound(_) => ErrorKind::NotFound,
            Self::AlreadyClosed { .. }
            | Self::InvalidPhaseTransition { .. }
            | Self::ProjectNotInTilbudPhase { .. }
            | Self::AlreadyWon(_)
            | Self::DraftOfferCannotHaveNumber
            | Self::NonDraftOfferMustHaveNumber
            | Self::FieldNotEditable { .. }
            | Self::InvariantViolation(_) => ErrorKind::InvalidState,
            Self::OfferNumberConflict(_)
            | Self::ExternalReferenceConflict(_)
            | Self::ConcurrentModification(_) => ErrorKind::Conflict,
            Self::MissingResponsible(_) | Self::InvalidDateRange(_) | Self::Validation(_) => {
                ErrorKind::Validation
            }
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Domain(error) => Some(error.kind()),
            Self::Integration(_) => Some(ErrorKind::DependencyUnavailable),
            Self::Persistence(_) | Self::Configuration(_) => None,
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::VersionConflict { id } => {
                Self::Domain(DomainError::ConcurrentModification(OfferId(id)))
            }
            other => Self::Persistence(other.to_string()),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::Conflict { .. } => {
                "The record was changed or is already in use. Reload and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(error) => {
                let message = error.to_string();
                match error.kind() {
                    ErrorKind::NotFound => Self::NotFound { message, correlation_id },
                    ErrorKind::Conflict => Self::Conflict { message, correlation_id },
                    ErrorKind::DependencyUnavailable => {
                        Self::ServiceUnavailable { message, correlation_id }
                    }
                    ErrorKind::InvalidState | ErrorKind::Validation => {
                        Self::BadRequest { message, correlation_id }
                    }
                }
            }
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}
