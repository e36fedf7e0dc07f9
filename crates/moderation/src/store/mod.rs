//! Moderation store adapter boundary.
//!
//! The engine owns no storage. It reads and writes through these traits, and
//! every method is one atomic unit against the backing store:
//!
//! - reads return a consistent snapshot
//! - [`ModerationStore::record_sanction`] appends a ledger entry **and** moves an
//!   actor pointer together, or does neither
//! - pointer moves are guarded by [`RefGuard`], the optimistic-concurrency check
//!   that turns a read-check-then-write race into a [`StoreError::Conflict`]
//!
//! Bulk pointer updates are the one exception: they apply per actor and report
//! per-actor outcomes, so a partially applied cascade is visible to the caller.

pub mod in_memory;

use std::net::IpAddr;

use thiserror::Error;

use helpdesk_auth::{Actor, Group, GroupSource, Track};
use helpdesk_core::{ActorId, GroupId, IpBlockId, SanctionId};

use crate::sanction::{IpBlock, Sanction};

pub use in_memory::InMemoryModerationStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Backing-store fault.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    /// A guarded write observed a different current state.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Precondition on an actor's current sanction pointer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RefGuard {
    /// Overwrite whatever is there.
    Any,
    /// Only write if the pointer currently equals this value.
    Expect(Option<SanctionId>),
}

impl RefGuard {
    pub fn matches(self, current: Option<SanctionId>) -> bool {
        match self {
            RefGuard::Any => true,
            RefGuard::Expect(expected) => expected == current,
        }
    }
}

/// A guarded move of one actor's sanction pointer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PointerUpdate {
    pub actor: ActorId,
    pub track: Track,
    pub guard: RefGuard,
    pub new: Option<SanctionId>,
}

/// Per-actor result of a bulk pointer update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkUpdate {
    pub updated: Vec<ActorId>,
    /// Guard did not match; nothing written for these actors.
    pub skipped: Vec<ActorId>,
    pub failed: Vec<(ActorId, StoreError)>,
}

/// Actor records.
pub trait ActorStore: Send + Sync {
    fn load_actor(&self, id: ActorId) -> StoreResult<Option<Actor>>;

    /// Load many actors; unknown ids are absent from the result.
    fn load_actors(&self, ids: &[ActorId]) -> StoreResult<Vec<Actor>>;

    /// Actors whose pointer on `track` currently references `sanction`.
    fn actors_referencing(&self, track: Track, sanction: SanctionId) -> StoreResult<Vec<ActorId>>;

    fn actors_in_group(&self, group: GroupId) -> StoreResult<Vec<ActorId>>;

    /// Replace an actor's group references and append the ledger entry
    /// describing the change, atomically.
    fn set_actor_groups(&self, actor: ActorId, groups: Vec<GroupId>, ledger: Sanction) -> StoreResult<()>;
}

/// Group definitions (administrative writes on top of [`GroupSource`]).
pub trait GroupStore: GroupSource {
    fn list_groups(&self) -> StoreResult<Vec<Group>>;

    fn load_group(&self, id: GroupId) -> StoreResult<Option<Group>>;

    /// Insert a new group; `Conflict` if the name is taken.
    fn insert_group(&self, group: Group) -> StoreResult<()>;

    /// Replace an existing group; `Conflict` if the new name belongs to another group.
    fn update_group(&self, group: Group) -> StoreResult<()>;

    /// Delete a group and detach it from every holder, returning the holders.
    fn delete_group(&self, id: GroupId) -> StoreResult<(Group, Vec<ActorId>)>;
}

/// Read-only projections over historical access records.
pub trait IpHistory: Send + Sync {
    /// Distinct actors ever observed at `ip`, in first-seen order.
    fn actors_by_ip(&self, ip: IpAddr) -> StoreResult<Vec<ActorId>>;

    /// Distinct addresses an actor was observed at, least recent first.
    fn ips_by_actor(&self, actor: ActorId) -> StoreResult<Vec<IpAddr>>;
}

/// Sanction ledger, actor pointers and IP block records.
pub trait ModerationStore: Send + Sync {
    fn load_sanction(&self, id: SanctionId) -> StoreResult<Option<Sanction>>;

    fn sanctions_for_target(&self, target: ActorId) -> StoreResult<Vec<Sanction>>;

    fn sanctions_by_author(&self, author: ActorId) -> StoreResult<Vec<Sanction>>;

    /// Append a ledger entry that moves no pointer.
    fn create_sanction(&self, sanction: Sanction) -> StoreResult<()>;

    /// Append a ledger entry and apply a guarded pointer move, atomically.
    fn record_sanction(&self, sanction: Sanction, pointer: PointerUpdate) -> StoreResult<()>;

    fn set_actor_sanction_ref(
        &self,
        actor: ActorId,
        track: Track,
        guard: RefGuard,
        new: Option<SanctionId>,
    ) -> StoreResult<()>;

    fn bulk_set_actor_sanction_ref(
        &self,
        actors: &[ActorId],
        track: Track,
        guard: RefGuard,
        new: Option<SanctionId>,
    ) -> BulkUpdate;

    fn active_ip_block(&self, ip: IpAddr) -> StoreResult<Option<IpBlock>>;

    fn ip_block_for_sanction(&self, sanction: SanctionId) -> StoreResult<Option<IpBlock>>;

    fn ip_blocks(&self, ip: IpAddr) -> StoreResult<Vec<IpBlock>>;

    /// Append the `BLOCK_IP` sanction and insert the block record atomically.
    /// `Conflict` if an active block already exists for the address.
    fn create_ip_block(&self, block: IpBlock, sanction: Sanction) -> StoreResult<()>;

    /// Flip the block's `active` flag and append the ledger entry atomically.
    /// `Conflict` if the block is already in that state.
    fn set_ip_block_active(&self, id: IpBlockId, active: bool, ledger: Sanction) -> StoreResult<()>;
}

/// Everything the engine needs from a backing store.
pub trait ModerationBackend: ActorStore + GroupStore + IpHistory + ModerationStore {}

impl<T> ModerationBackend for T where T: ActorStore + GroupStore + IpHistory + ModerationStore {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_matching() {
        let id = SanctionId::new();
        assert!(RefGuard::Any.matches(Some(id)));
        assert!(RefGuard::Expect(None).matches(None));
        assert!(!RefGuard::Expect(None).matches(Some(id)));
        assert!(RefGuard::Expect(Some(id)).matches(Some(id)));
        assert!(!RefGuard::Expect(Some(id)).matches(Some(SanctionId::new())));
    }
}
