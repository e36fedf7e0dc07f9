//! `helpdesk-moderation`: moderation lifecycle engine and access-time reconciliation.
//!
//! The engine owns no storage. It talks to a backing store through the
//! traits in [`store`]; [`InMemoryModerationStore`] implements them for tests
//! and development.

pub mod admin;
pub mod cascade;
pub mod config;
pub mod engine;
pub mod error;
pub mod queries;
pub mod reconcile;
pub mod sanction;
pub mod store;

pub use admin::{AccountAdmin, AdminEdit, GroupAdmin, GroupChange, GroupEdit, NewGroup, SelfEdit};
pub use cascade::{CascadeDirection, CascadeReport, IpBlockOutcome};
pub use config::{ConfigError, IpExpiryPolicy, ModerationConfig};
pub use engine::{IpLiftCommand, IpSanctionCommand, LiftCommand, ModerationEngine, SanctionCommand};
pub use error::{ModerationError, ModerationResult};
pub use queries::ModerationQueries;
pub use reconcile::{AuthorizedActor, ReconcileFault, Reconciliation};
pub use sanction::{IpBlock, Sanction, SanctionKind, expired_reason, parse_expiry, validate_reason};
pub use store::{
    ActorStore, BulkUpdate, GroupStore, InMemoryModerationStore, IpHistory, ModerationBackend,
    ModerationStore, PointerUpdate, RefGuard, StoreError, StoreResult,
};
