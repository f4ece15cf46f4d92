pub mod activity;
pub mod config;
pub mod domain;
pub mod errors;
pub mod lifecycle;
pub mod linker;
pub mod memory;
pub mod numbering;
pub mod pipeline;
pub mod repository;
pub mod sync;

pub use activity::{ActivityEntry, ActivitySink, ActivityTarget, InMemoryActivityLog};
pub use domain::company::{Company, CompanyId};
pub use domain::customer::CustomerId;
pub use domain::financials::{AccountClass, DwFinancials, LedgerLine};
pub use domain::offer::{Offer, OfferId, OfferPhase};
pub use domain::project::{Project, ProjectId, ProjectPhase};
pub use errors::{ApplicationError, DomainError, ErrorKind, InterfaceError};
pub use lifecycle::{
    can_edit, Actor, ActorRole, FieldChange, LifecycleSettings, NewOffer, OfferField,
    OfferLifecycle,
};
pub use linker::ProjectLinker;
pub use numbering::{format_offer_number, OfferNumbering};
pub use pipeline::{
    AggregatedPipelinePoint, DateRange, PipelineQuery, PipelineReport, PipelineService,
    TimeWindow,
};
pub use repository::{
    CompanyRepository, OfferRepository, ProjectRepository, RepositoryError, SequenceRepository,
};
pub use sync::{
    DetachedSync, DisabledFinancialSource, FinancialSource, FinancialSourceError, FinancialSync,
    SyncCounts, SyncOutcome, SyncSettings, SyncTrigger,
};
