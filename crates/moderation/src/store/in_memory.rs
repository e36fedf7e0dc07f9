use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use helpdesk_auth::{Actor, Group, GroupResolutionError, GroupSource, Track};
use helpdesk_core::{ActorId, GroupId, IpBlockId, SanctionId};

use super::{
    ActorStore, BulkUpdate, GroupStore, IpHistory, ModerationStore, PointerUpdate, RefGuard,
    StoreError, StoreResult,
};
use crate::sanction::{IpBlock, Sanction};

#[derive(Debug, Clone)]
struct AccessRecord {
    actor: ActorId,
    ip: IpAddr,
    at: DateTime<Utc>,
}

/// Injected faults, for exercising failure paths in tests.
#[derive(Debug, Default)]
struct Faults {
    reads_unavailable: bool,
    ledger_unavailable: bool,
    pointer_writes: HashSet<ActorId>,
}

#[derive(Debug, Default)]
struct State {
    actors: HashMap<ActorId, Actor>,
    groups: HashMap<GroupId, Group>,
    ledger: Vec<Sanction>,
    ip_blocks: HashMap<IpBlockId, IpBlock>,
    access_log: Vec<AccessRecord>,
    faults: Faults,
}

impl State {
    fn check_reads(&self) -> StoreResult<()> {
        if self.faults.reads_unavailable {
            return Err(StoreError::Unavailable("reads disabled".to_string()));
        }
        Ok(())
    }

    fn check_ledger(&self) -> StoreResult<()> {
        if self.faults.ledger_unavailable {
            return Err(StoreError::Unavailable("ledger writes disabled".to_string()));
        }
        Ok(())
    }

    fn check_pointer(&self, actor: ActorId) -> StoreResult<()> {
        if self.faults.pointer_writes.contains(&actor) {
            return Err(StoreError::Unavailable(format!("writes to actor {actor} disabled")));
        }
        Ok(())
    }

    /// Validate a guarded pointer move without applying it.
    fn check_pointer_update(&self, update: &PointerUpdate) -> StoreResult<()> {
        self.check_pointer(update.actor)?;
        let actor = self
            .actors
            .get(&update.actor)
            .ok_or_else(|| StoreError::NotFound(format!("actor {}", update.actor)))?;
        let current = actor.sanction_ref(update.track);
        if !update.guard.matches(current) {
            return Err(StoreError::Conflict(format!(
                "actor {} {} pointer is {current:?}, expected {:?}",
                update.actor, update.track, update.guard
            )));
        }
        Ok(())
    }

    fn apply_pointer_update(&mut self, update: &PointerUpdate) {
        if let Some(actor) = self.actors.get_mut(&update.actor) {
            actor.set_sanction_ref(update.track, update.new);
        }
    }

    fn append(&mut self, sanction: Sanction) -> StoreResult<()> {
        if self.ledger.iter().any(|s| s.id == sanction.id) {
            return Err(StoreError::Conflict(format!("sanction {} already recorded", sanction.id)));
        }
        self.ledger.push(sanction);
        Ok(())
    }
}

/// In-memory moderation store.
///
/// Intended for tests/dev. A single lock guards every table, so each trait
/// call is atomic.
#[derive(Debug, Default)]
pub struct InMemoryModerationStore {
    state: RwLock<State>,
}

impl InMemoryModerationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Seeding and inspection
    // ─────────────────────────────────────────────────────────────────────────

    pub fn insert_actor(&self, actor: Actor) -> StoreResult<()> {
        self.write()?.actors.insert(actor.id, actor);
        Ok(())
    }

    /// Record an observed access. The HTTP layer owns these records; the
    /// engine only ever reads them.
    pub fn record_access(&self, actor: ActorId, ip: IpAddr, at: DateTime<Utc>) -> StoreResult<()> {
        self.write()?.access_log.push(AccessRecord { actor, ip, at });
        Ok(())
    }

    pub fn actor(&self, id: ActorId) -> Option<Actor> {
        self.read().ok()?.actors.get(&id).cloned()
    }

    /// The full ledger in append order.
    pub fn ledger(&self) -> Vec<Sanction> {
        self.read().map(|s| s.ledger.clone()).unwrap_or_default()
    }

    pub fn all_ip_blocks(&self) -> Vec<IpBlock> {
        self.read()
            .map(|s| s.ip_blocks.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn set_reads_unavailable(&self, unavailable: bool) {
        if let Ok(mut state) = self.state.write() {
            state.faults.reads_unavailable = unavailable;
        }
    }

    pub fn set_ledger_unavailable(&self, unavailable: bool) {
        if let Ok(mut state) = self.state.write() {
            state.faults.ledger_unavailable = unavailable;
        }
    }

    /// Make every pointer write for `actor` fail until faults are cleared.
    pub fn fail_pointer_writes_for(&self, actor: ActorId) {
        if let Ok(mut state) = self.state.write() {
            state.faults.pointer_writes.insert(actor);
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut state) = self.state.write() {
            state.faults = Faults::default();
        }
    }
}

impl GroupSource for InMemoryModerationStore {
    fn load_groups(&self, ids: &[GroupId]) -> Result<Vec<Group>, GroupResolutionError> {
        let state = self
            .read()
            .map_err(|e| GroupResolutionError::Unavailable(e.to_string()))?;
        state
            .check_reads()
            .map_err(|e| GroupResolutionError::Unavailable(e.to_string()))?;
        Ok(ids.iter().filter_map(|id| state.groups.get(id).cloned()).collect())
    }
}

impl GroupStore for InMemoryModerationStore {
    fn list_groups(&self) -> StoreResult<Vec<Group>> {
        let state = self.read()?;
        state.check_reads()?;
        let mut groups: Vec<Group> = state.groups.values().cloned().collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(groups)
    }

    fn load_group(&self, id: GroupId) -> StoreResult<Option<Group>> {
        let state = self.read()?;
        state.check_reads()?;
        Ok(state.groups.get(&id).cloned())
    }

    fn insert_group(&self, group: Group) -> StoreResult<()> {
        let mut state = self.write()?;
        if state.groups.values().any(|g| g.name == group.name) {
            return Err(StoreError::Conflict(format!("group name '{}' is taken", group.name)));
        }
        if state.groups.contains_key(&group.id) {
            return Err(StoreError::Conflict(format!("group {} already exists", group.id)));
        }
        state.groups.insert(group.id, group);
        Ok(())
    }

    fn update_group(&self, group: Group) -> StoreResult<()> {
        let mut state = self.write()?;
        if !state.groups.contains_key(&group.id) {
            return Err(StoreError::NotFound(format!("group {}", group.id)));
        }
        if state
            .groups
            .values()
            .any(|g| g.id != group.id && g.name == group.name)
        {
            return Err(StoreError::Conflict(format!("group name '{}' is taken", group.name)));
        }
        state.groups.insert(group.id, group);
        Ok(())
    }

    fn delete_group(&self, id: GroupId) -> StoreResult<(Group, Vec<ActorId>)> {
        let mut state = self.write()?;
        let group = state
            .groups
            .remove(&id)
            .ok_or_else(|| StoreError::NotFound(format!("group {id}")))?;

        let mut holders = Vec::new();
        for actor in state.actors.values_mut() {
            if actor.has_group(id) {
                actor.group_refs.retain(|g| *g != id);
                holders.push(actor.id);
            }
        }
        holders.sort();
        Ok((group, holders))
    }
}

impl ActorStore for InMemoryModerationStore {
    fn load_actor(&self, id: ActorId) -> StoreResult<Option<Actor>> {
        let state = self.read()?;
        state.check_reads()?;
        Ok(state.actors.get(&id).cloned())
    }

    fn load_actors(&self, ids: &[ActorId]) -> StoreResult<Vec<Actor>> {
        let state = self.read()?;
        state.check_reads()?;
        Ok(ids.iter().filter_map(|id| state.actors.get(id).cloned()).collect())
    }

    fn actors_referencing(&self, track: Track, sanction: SanctionId) -> StoreResult<Vec<ActorId>> {
        let state = self.read()?;
        state.check_reads()?;
        let mut ids: Vec<ActorId> = state
            .actors
            .values()
            .filter(|a| a.sanction_ref(track) == Some(sanction))
            .map(|a| a.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn actors_in_group(&self, group: GroupId) -> StoreResult<Vec<ActorId>> {
        let state = self.read()?;
        state.check_reads()?;
        let mut ids: Vec<ActorId> = state
            .actors
            .values()
            .filter(|a| a.has_group(group))
            .map(|a| a.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn set_actor_groups(&self, actor: ActorId, groups: Vec<GroupId>, ledger: Sanction) -> StoreResult<()> {
        let mut state = self.write()?;
        state.check_ledger()?;
        state.check_pointer(actor)?;
        if !state.actors.contains_key(&actor) {
            return Err(StoreError::NotFound(format!("actor {actor}")));
        }
        state.append(ledger)?;
        if let Some(a) = state.actors.get_mut(&actor) {
            a.group_refs = groups;
        }
        Ok(())
    }
}

impl IpHistory for InMemoryModerationStore {
    fn actors_by_ip(&self, ip: IpAddr) -> StoreResult<Vec<ActorId>> {
        let state = self.read()?;
        state.check_reads()?;
        let mut records: Vec<&AccessRecord> = state.access_log.iter().filter(|r| r.ip == ip).collect();
        records.sort_by_key(|r| r.at);

        let mut seen = HashSet::new();
        Ok(records
            .into_iter()
            .filter(|r| seen.insert(r.actor))
            .map(|r| r.actor)
            .collect())
    }

    fn ips_by_actor(&self, actor: ActorId) -> StoreResult<Vec<IpAddr>> {
        let state = self.read()?;
        state.check_reads()?;
        let mut records: Vec<&AccessRecord> =
            state.access_log.iter().filter(|r| r.actor == actor).collect();
        records.sort_by_key(|r| r.at);

        // Ordered by last use, so the final entry is the most recent address.
        let mut ips: Vec<IpAddr> = Vec::new();
        for r in records {
            ips.retain(|ip| *ip != r.ip);
            ips.push(r.ip);
        }
        Ok(ips)
    }
}

impl ModerationStore for InMemoryModerationStore {
    fn load_sanction(&self, id: SanctionId) -> StoreResult<Option<Sanction>> {
        let state = self.read()?;
        state.check_reads()?;
        Ok(state.ledger.iter().find(|s| s.id == id).cloned())
    }

    fn sanctions_for_target(&self, target: ActorId) -> StoreResult<Vec<Sanction>> {
        let state = self.read()?;
        state.check_reads()?;
        Ok(state.ledger.iter().filter(|s| s.target == target).cloned().collect())
    }

    fn sanctions_by_author(&self, author: ActorId) -> StoreResult<Vec<Sanction>> {
        let state = self.read()?;
        state.check_reads()?;
        Ok(state.ledger.iter().filter(|s| s.author == author).cloned().collect())
    }

    fn create_sanction(&self, sanction: Sanction) -> StoreResult<()> {
        let mut state = self.write()?;
        state.check_ledger()?;
        state.append(sanction)
    }

    fn record_sanction(&self, sanction: Sanction, pointer: PointerUpdate) -> StoreResult<()> {
        let mut state = self.write()?;
        state.check_ledger()?;
        state.check_pointer_update(&pointer)?;
        state.append(sanction)?;
        state.apply_pointer_update(&pointer);
        Ok(())
    }

    fn set_actor_sanction_ref(
        &self,
        actor: ActorId,
        track: Track,
        guard: RefGuard,
        new: Option<SanctionId>,
    ) -> StoreResult<()> {
        let update = PointerUpdate {
            actor,
            track,
            guard,
            new,
        };
        let mut state = self.write()?;
        state.check_pointer_update(&update)?;
        state.apply_pointer_update(&update);
        Ok(())
    }

    fn bulk_set_actor_sanction_ref(
        &self,
        actors: &[ActorId],
        track: Track,
        guard: RefGuard,
        new: Option<SanctionId>,
    ) -> BulkUpdate {
        let mut outcome = BulkUpdate::default();
        let mut state = match self.write() {
            Ok(state) => state,
            Err(e) => {
                outcome.failed = actors.iter().map(|a| (*a, e.clone())).collect();
                return outcome;
            }
        };

        for &actor in actors {
            let update = PointerUpdate {
                actor,
                track,
                guard,
                new,
            };
            match state.check_pointer_update(&update) {
                Ok(()) => {
                    state.apply_pointer_update(&update);
                    outcome.updated.push(actor);
                }
                Err(StoreError::Conflict(_)) => outcome.skipped.push(actor),
                Err(e) => outcome.failed.push((actor, e)),
            }
        }
        outcome
    }

    fn active_ip_block(&self, ip: IpAddr) -> StoreResult<Option<IpBlock>> {
        let state = self.read()?;
        state.check_reads()?;
        Ok(state
            .ip_blocks
            .values()
            .find(|b| b.ip == ip && b.active)
            .cloned())
    }

    fn ip_block_for_sanction(&self, sanction: SanctionId) -> StoreResult<Option<IpBlock>> {
        let state = self.read()?;
        state.check_reads()?;
        Ok(state
            .ip_blocks
            .values()
            .find(|b| b.sanction == sanction)
            .cloned())
    }

    fn ip_blocks(&self, ip: IpAddr) -> StoreResult<Vec<IpBlock>> {
        let state = self.read()?;
        state.check_reads()?;
        let mut blocks: Vec<IpBlock> = state.ip_blocks.values().filter(|b| b.ip == ip).cloned().collect();
        blocks.sort_by_key(|b| b.created_at);
        Ok(blocks)
    }

    fn create_ip_block(&self, block: IpBlock, sanction: Sanction) -> StoreResult<()> {
        let mut state = self.write()?;
        state.check_ledger()?;
        if state.ip_blocks.values().any(|b| b.ip == block.ip && b.active) {
            return Err(StoreError::Conflict(format!("{} already has an active block", block.ip)));
        }
        state.append(sanction)?;
        state.ip_blocks.insert(block.id, block);
        Ok(())
    }

    fn set_ip_block_active(&self, id: IpBlockId, active: bool, ledger: Sanction) -> StoreResult<()> {
        let mut state = self.write()?;
        state.check_ledger()?;
        let current = state
            .ip_blocks
            .get(&id)
            .map(|b| b.active)
            .ok_or_else(|| StoreError::NotFound(format!("ip block {id}")))?;
        if current == active {
            return Err(StoreError::Conflict(format!("ip block {id} already active={active}")));
        }
        state.append(ledger)?;
        if let Some(block) = state.ip_blocks.get_mut(&id) {
            block.active = active;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanction::SanctionKind;
    use chrono::Duration;

    fn seeded() -> (InMemoryModerationStore, Actor) {
        let store = InMemoryModerationStore::new();
        let actor = Actor::new("alice");
        store.insert_actor(actor.clone()).unwrap();
        (store, actor)
    }

    #[test]
    fn record_sanction_is_all_or_nothing() {
        let (store, actor) = seeded();
        let first = Sanction::new(SanctionKind::Mute, actor.id, actor.id, "a", Utc::now());
        let pointer = PointerUpdate {
            actor: actor.id,
            track: Track::Mute,
            guard: RefGuard::Expect(None),
            new: Some(first.id),
        };
        store.record_sanction(first.clone(), pointer).unwrap();

        let second = Sanction::new(SanctionKind::Mute, actor.id, actor.id, "b", Utc::now());
        let err = store
            .record_sanction(second.clone(), PointerUpdate { new: Some(second.id), ..pointer })
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.ledger(), vec![first.clone()]);
        assert_eq!(store.actor(actor.id).unwrap().muted, Some(first.id));
    }

    #[test]
    fn ledger_fault_blocks_pointer_move_too() {
        let (store, actor) = seeded();
        store.set_ledger_unavailable(true);
        let s = Sanction::new(SanctionKind::Block, actor.id, actor.id, "a", Utc::now());
        let err = store
            .record_sanction(
                s.clone(),
                PointerUpdate {
                    actor: actor.id,
                    track: Track::Block,
                    guard: RefGuard::Any,
                    new: Some(s.id),
                },
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert_eq!(store.actor(actor.id).unwrap().blocked, None);
        assert!(store.ledger().is_empty());
    }

    #[test]
    fn bulk_update_reports_each_actor() {
        let (store, alice) = seeded();
        let bob = Actor::new("bob");
        let carol = Actor::new("carol");
        store.insert_actor(bob.clone()).unwrap();
        store.insert_actor(carol.clone()).unwrap();
        store.fail_pointer_writes_for(carol.id);
        let ghost = ActorId::new();
        let id = SanctionId::new();

        store
            .set_actor_sanction_ref(bob.id, Track::Block, RefGuard::Any, Some(SanctionId::new()))
            .unwrap();

        let outcome = store.bulk_set_actor_sanction_ref(
            &[alice.id, bob.id, carol.id, ghost],
            Track::Block,
            RefGuard::Expect(None),
            Some(id),
        );
        assert_eq!(outcome.updated, vec![alice.id]);
        assert_eq!(outcome.skipped, vec![bob.id]);
        let failed: Vec<ActorId> = outcome.failed.iter().map(|(a, _)| *a).collect();
        assert_eq!(failed, vec![carol.id, ghost]);
    }

    #[test]
    fn only_one_active_block_per_address() {
        let (store, actor) = seeded();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let s1 = Sanction::new(SanctionKind::BlockIp, actor.id, actor.id, "a", Utc::now());
        let block = IpBlock::new(ip, s1.id, Utc::now());
        store.create_ip_block(block.clone(), s1).unwrap();

        let s2 = Sanction::new(SanctionKind::BlockIp, actor.id, actor.id, "b", Utc::now());
        let err = store
            .create_ip_block(IpBlock::new(ip, s2.id, Utc::now()), s2)
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let lift = Sanction::new(SanctionKind::Unblock, actor.id, actor.id, "c", Utc::now());
        store.set_ip_block_active(block.id, false, lift.clone()).unwrap();
        assert!(store.active_ip_block(ip).unwrap().is_none());
        let again = store.set_ip_block_active(block.id, false, lift).unwrap_err();
        assert!(matches!(again, StoreError::Conflict(_)));
    }

    #[test]
    fn ip_history_orders_by_time() {
        let (store, alice) = seeded();
        let bob = Actor::new("bob");
        store.insert_actor(bob.clone()).unwrap();
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();
        let t = Utc::now();

        store.record_access(alice.id, a, t).unwrap();
        store.record_access(alice.id, b, t + Duration::seconds(1)).unwrap();
        store.record_access(bob.id, a, t + Duration::seconds(2)).unwrap();
        store.record_access(alice.id, a, t + Duration::seconds(3)).unwrap();

        assert_eq!(store.ips_by_actor(alice.id).unwrap(), vec![b, a]);
        assert_eq!(store.actors_by_ip(a).unwrap(), vec![alice.id, bob.id]);
    }

    #[test]
    fn deleting_a_group_detaches_holders() {
        let store = InMemoryModerationStore::new();
        let group = Group::granting("support", helpdesk_auth::Capability::VIEW_TICKET);
        store.insert_group(group.clone()).unwrap();
        let holder = Actor::new("h").with_groups([group.id]);
        store.insert_actor(holder.clone()).unwrap();

        let (deleted, holders) = store.delete_group(group.id).unwrap();
        assert_eq!(deleted.id, group.id);
        assert_eq!(holders, vec![holder.id]);
        assert!(store.actor(holder.id).unwrap().group_refs.is_empty());
    }

    #[test]
    fn duplicate_group_names_are_rejected() {
        let store = InMemoryModerationStore::new();
        store.insert_group(Group::granting("user", helpdesk_auth::Capability::VIEW_TICKET)).unwrap();
        let err = store
            .insert_group(Group::granting("user", helpdesk_auth::Capability::CREATE_TICKET))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }
}
