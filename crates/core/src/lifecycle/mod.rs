pub mod permissions;
pub mod service;

pub use permissions::{can_edit, Actor, ActorRole, OfferField};
pub use service::{FieldChange, LifecycleSettings, NewOffer, OfferLifecycle};
