//! `helpdesk-auth`: capability registry, group aggregation and the
//! authorization gate.
//!
//! This crate is intentionally decoupled from HTTP and storage; group
//! definitions arrive through the [`GroupSource`] trait.

pub mod authorize;
pub mod capabilities;
pub mod group;
pub mod permissions;
pub mod principal;

pub use authorize::{
    AuthorizationExplanation, AuthzError, CapabilityDefinition, allow, authorize,
    capability_definitions, ensure_can_target, explain_authorization, has_immunity,
    is_full_privilege,
};
pub use capabilities::{Capabilities, Capability, all_capabilities};
pub use group::{Group, GroupMode};
pub use permissions::{GroupResolutionError, GroupSource, load_referenced, resolve, resolve_refs};
pub use principal::{Actor, Track};
