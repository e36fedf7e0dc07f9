//! Group and account administration.
//!
//! Every administrative change to an actor's account is recorded in the
//! sanction ledger as an `UPDATE_INFO` entry.

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use helpdesk_auth::{Capabilities, Capability, CapabilityDefinition, Group, GroupMode, capability_definitions};
use helpdesk_core::{ActorId, DomainError, GroupId};

use crate::engine::ModerationEngine;
use crate::error::{ModerationError, ModerationResult};
use crate::sanction::{Sanction, SanctionKind};
use crate::store::{ModerationBackend, StoreError};

// ─────────────────────────────────────────────────────────────────────────────
// Groups
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGroup {
    pub name: String,
    pub mode: GroupMode,
    pub permissions: Capabilities,
    pub is_default: bool,
}

/// Partial update of a group; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupEdit {
    pub name: Option<String>,
    pub mode: Option<GroupMode>,
    pub permissions: Option<Capabilities>,
    pub is_default: Option<bool>,
}

pub struct GroupAdmin<'a, S> {
    engine: &'a ModerationEngine<S>,
}

impl<'a, S> GroupAdmin<'a, S>
where
    S: ModerationBackend,
{
    #[instrument(skip(self, group), fields(name = %group.name), err)]
    pub fn create_group(&self, author: ActorId, group: NewGroup) -> ModerationResult<Group> {
        self.engine.require(author, Capability::CREATE_GROUP)?;
        let name = group_name(&group.name)?;
        let permissions = Capabilities::from_bits_checked(group.permissions.bits())?;

        let created = Group::new(name, group.mode, permissions)
            .with_default(group.is_default)
            .with_author(author);
        self.engine
            .store
            .insert_group(created.clone())
            .map_err(name_taken)?;

        info!(group = %created.id, name = %created.name, mode = %created.mode, "group created");
        Ok(created)
    }

    #[instrument(skip(self, edit), err)]
    pub fn edit_group(&self, author: ActorId, id: GroupId, edit: GroupEdit) -> ModerationResult<Group> {
        self.engine.require(author, Capability::EDIT_GROUP)?;
        let mut group = self.load(id)?;

        if let Some(name) = edit.name {
            group.name = group_name(&name)?;
        }
        if let Some(mode) = edit.mode {
            group.mode = mode;
        }
        if let Some(permissions) = edit.permissions {
            group.permissions = Capabilities::from_bits_checked(permissions.bits())?;
        }
        if let Some(is_default) = edit.is_default {
            group.is_default = is_default;
        }

        self.engine.store.update_group(group.clone()).map_err(name_taken)?;
        info!(group = %group.id, "group edited");
        Ok(group)
    }

    /// Delete a group, detaching it from every holder. Returns the holders.
    #[instrument(skip(self), err)]
    pub fn delete_group(&self, author: ActorId, id: GroupId) -> ModerationResult<(Group, Vec<ActorId>)> {
        self.engine.require(author, Capability::DELETE_GROUP)?;
        let (group, holders) = self.engine.store.delete_group(id).map_err(|e| match e {
            StoreError::NotFound(_) => ModerationError::not_found(format!("group {id}")),
            other => other.into(),
        })?;

        info!(group = %group.id, detached = holders.len(), "group deleted");
        Ok((group, holders))
    }

    /// Groups whose mask includes `capability`.
    pub fn groups_with_capability(&self, viewer: ActorId, capability: Capability) -> ModerationResult<Vec<Group>> {
        self.engine.require(viewer, Capability::VIEW_GROUPS_BY_FLAG)?;
        Ok(self
            .engine
            .store
            .list_groups()?
            .into_iter()
            .filter(|g| g.permissions.contains(capability))
            .collect())
    }

    pub fn actors_in_group(&self, viewer: ActorId, id: GroupId) -> ModerationResult<Vec<ActorId>> {
        self.engine.require(viewer, Capability::VIEW_USERS_BY_GROUP)?;
        self.load(id)?;
        Ok(self.engine.store.actors_in_group(id)?)
    }

    /// The capability registry as shown in the group editor.
    pub fn capability_catalog(&self, viewer: ActorId) -> ModerationResult<Vec<CapabilityDefinition>> {
        self.engine.require(viewer, Capability::VIEW_GROUPS)?;
        Ok(capability_definitions())
    }

    /// Groups assigned to every actor at registration.
    pub fn default_groups(&self) -> ModerationResult<Vec<Group>> {
        Ok(self
            .engine
            .store
            .list_groups()?
            .into_iter()
            .filter(|g| g.is_default)
            .collect())
    }

    fn load(&self, id: GroupId) -> ModerationResult<Group> {
        self.engine
            .store
            .load_group(id)?
            .ok_or_else(|| ModerationError::not_found(format!("group {id}")))
    }
}

fn group_name(raw: &str) -> ModerationResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(DomainError::validation("group name is required").into());
    }
    Ok(name.to_string())
}

fn name_taken(e: StoreError) -> ModerationError {
    match e {
        StoreError::Conflict(msg) => DomainError::conflict(msg).into(),
        StoreError::NotFound(msg) => ModerationError::NotFound(msg),
        other => other.into(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Accounts
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupChange {
    Add(GroupId),
    Remove(GroupId),
}

/// Administrative edit of another actor's account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminEdit {
    PasswordReset,
    /// Names of the changed detail fields.
    Details(Vec<String>),
}

/// An actor's edit of their own account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfEdit {
    Password,
    Email,
}

pub struct AccountAdmin<'a, S> {
    engine: &'a ModerationEngine<S>,
}

impl<'a, S> AccountAdmin<'a, S>
where
    S: ModerationBackend,
{
    /// Add or remove one group on `target`.
    #[instrument(skip(self), err)]
    pub fn change_groups(
        &self,
        author: ActorId,
        target: ActorId,
        change: GroupChange,
        now: DateTime<Utc>,
    ) -> ModerationResult<Vec<GroupId>> {
        self.engine.require(author, Capability::CHANGE_GROUP_BY_USER)?;
        let actor = self.engine.load_actor(target)?;

        let id = match change {
            GroupChange::Add(id) | GroupChange::Remove(id) => id,
        };
        let group = self
            .engine
            .store
            .load_group(id)?
            .ok_or_else(|| ModerationError::not_found(format!("group {id}")))?;

        let mut groups = actor.group_refs.clone();
        let reason = match change {
            GroupChange::Add(_) => {
                if actor.has_group(id) {
                    return Err(DomainError::conflict(format!("actor already in group '{}'", group.name)).into());
                }
                groups.push(id);
                format!("added to group '{}'", group.name)
            }
            GroupChange::Remove(_) => {
                if !actor.has_group(id) {
                    return Err(DomainError::conflict(format!("actor not in group '{}'", group.name)).into());
                }
                groups.retain(|g| *g != id);
                format!("removed from group '{}'", group.name)
            }
        };

        let entry = Sanction::new(SanctionKind::UpdateInfo, author, target, reason, now);
        self.engine.store.set_actor_groups(target, groups.clone(), entry)?;
        info!(target = %target, group = %id, change = ?change, "actor groups changed");
        Ok(groups)
    }

    /// Record a password reset or detail edit made by an administrator.
    #[instrument(skip(self), err)]
    pub fn record_admin_edit(
        &self,
        author: ActorId,
        target: ActorId,
        edit: AdminEdit,
        now: DateTime<Utc>,
    ) -> ModerationResult<Sanction> {
        let (required, reason) = match &edit {
            AdminEdit::PasswordReset => (
                Capability::CHANGE_PASSWORD_BY_USER,
                "password reset by administrator".to_string(),
            ),
            AdminEdit::Details(fields) => {
                if fields.is_empty() {
                    return Err(DomainError::validation("no detail fields changed").into());
                }
                (
                    Capability::CHANGE_DETAILS_BY_USER,
                    format!("details changed by administrator: {}", fields.join(", ")),
                )
            }
        };

        let author_mask = self.engine.require(author, required)?;
        let actor = self.engine.load_actor(target)?;
        self.engine.ensure_targetable(author_mask, &actor)?;

        let entry = Sanction::new(SanctionKind::UpdateInfo, author, target, reason, now);
        self.engine.store.create_sanction(entry.clone())?;
        Ok(entry)
    }

    /// Record an actor's change to their own password or email.
    #[instrument(skip(self), err)]
    pub fn record_self_edit(&self, actor: ActorId, edit: SelfEdit, now: DateTime<Utc>) -> ModerationResult<Sanction> {
        let (required, reason) = match edit {
            SelfEdit::Password => (Capability::CHANGE_CURRENT_ACCOUNT_PASSWORD, "changed own password"),
            SelfEdit::Email => (Capability::CHANGE_CURRENT_ACCOUNT_EMAIL, "changed own email"),
        };
        self.engine.require(actor, required)?;

        let entry = Sanction::new(SanctionKind::UpdateInfo, actor, actor, reason, now);
        self.engine.store.create_sanction(entry.clone())?;
        Ok(entry)
    }
}

impl<S> ModerationEngine<S>
where
    S: ModerationBackend,
{
    pub fn groups(&self) -> GroupAdmin<'_, S> {
        GroupAdmin { engine: self }
    }

    pub fn accounts(&self) -> AccountAdmin<'_, S> {
        AccountAdmin { engine: self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use helpdesk_auth::Actor;

    use crate::store::{GroupStore, InMemoryModerationStore};

    fn admin_setup() -> (Arc<InMemoryModerationStore>, ModerationEngine<InMemoryModerationStore>, Actor) {
        let store = InMemoryModerationStore::arc();
        let admins = Group::granting("admin", Capabilities::all());
        store.insert_group(admins.clone()).unwrap();
        let admin = Actor::new("root").with_groups([admins.id]);
        store.insert_actor(admin.clone()).unwrap();
        (Arc::clone(&store), ModerationEngine::new(store), admin)
    }

    fn new_group(name: &str, permissions: Capabilities) -> NewGroup {
        NewGroup {
            name: name.to_string(),
            mode: GroupMode::Add,
            permissions,
            is_default: false,
        }
    }

    #[test]
    fn group_names_are_unique() {
        let (_, engine, admin) = admin_setup();
        engine
            .groups()
            .create_group(admin.id, new_group("support", Capability::VIEW_TICKETS.mask()))
            .unwrap();
        let err = engine
            .groups()
            .create_group(admin.id, new_group(" support ", Capability::VIEW_TICKET.mask()))
            .unwrap_err();
        assert_eq!(err.status(), 409);
    }

    #[test]
    fn undefined_bits_are_rejected() {
        let (_, engine, admin) = admin_setup();
        let bogus = Capabilities::from_bits_retain(1 << 100);
        let err = engine
            .groups()
            .create_group(admin.id, new_group("bogus", bogus))
            .unwrap_err();
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn edit_and_query_by_capability() {
        let (_, engine, admin) = admin_setup();
        let group = engine
            .groups()
            .create_group(admin.id, new_group("helpers", Capability::VIEW_TICKET.mask()))
            .unwrap();
        let edited = engine
            .groups()
            .edit_group(
                admin.id,
                group.id,
                GroupEdit {
                    permissions: Some(Capability::VIEW_TICKET | Capability::REPLY_TO_TICKET),
                    is_default: Some(true),
                    ..GroupEdit::default()
                },
            )
            .unwrap();
        assert!(edited.permissions.contains(Capability::REPLY_TO_TICKET));
        assert_eq!(edited.name, "helpers");

        let found = engine
            .groups()
            .groups_with_capability(admin.id, Capability::REPLY_TO_TICKET)
            .unwrap();
        assert_eq!(found.len(), 2);
        let defaults = engine.groups().default_groups().unwrap();
        assert_eq!(defaults, vec![edited]);
    }

    #[test]
    fn capability_catalog_requires_view_groups() {
        let (store, engine, admin) = admin_setup();
        let catalog = engine.groups().capability_catalog(admin.id).unwrap();
        assert_eq!(catalog.len(), Capability::DEFINED.len());
        let immunity = catalog.iter().find(|d| d.name == "IMMUNITY").unwrap();
        assert_eq!(immunity.category, "moderation");

        let stranger = Actor::new("stranger");
        store.insert_actor(stranger.clone()).unwrap();
        assert!(matches!(
            engine.groups().capability_catalog(stranger.id).unwrap_err(),
            ModerationError::Unauthorized(c) if c == Capability::VIEW_GROUPS
        ));
    }

    #[test]
    fn group_change_rejects_redundant_moves_and_records_ledger() {
        let (store, engine, admin) = admin_setup();
        let group = engine
            .groups()
            .create_group(admin.id, new_group("support", Capability::VIEW_TICKETS.mask()))
            .unwrap();
        let user = Actor::new("u");
        store.insert_actor(user.clone()).unwrap();
        let now = Utc::now();

        let groups = engine
            .accounts()
            .change_groups(admin.id, user.id, GroupChange::Add(group.id), now)
            .unwrap();
        assert_eq!(groups, vec![group.id]);
        assert!(engine
            .accounts()
            .change_groups(admin.id, user.id, GroupChange::Add(group.id), now)
            .is_err());

        engine
            .accounts()
            .change_groups(admin.id, user.id, GroupChange::Remove(group.id), now)
            .unwrap();
        let err = engine
            .accounts()
            .change_groups(admin.id, user.id, GroupChange::Remove(group.id), now)
            .unwrap_err();
        assert_eq!(err.status(), 409);

        let ledger = store.ledger();
        assert_eq!(ledger.len(), 2);
        assert!(ledger.iter().all(|s| s.kind == SanctionKind::UpdateInfo && s.target == user.id));
        assert!(ledger[0].reason.contains("added"));
    }

    #[test]
    fn admin_edit_respects_immunity() {
        let (store, engine, admin) = admin_setup();
        let partial = Group::granting(
            "senior",
            Capability::CHANGE_PASSWORD_BY_USER | Capability::IMMUNITY,
        );
        let immune = Group::granting("staff", Capability::IMMUNITY);
        store.insert_group(partial.clone()).unwrap();
        store.insert_group(immune.clone()).unwrap();
        let senior = Actor::new("senior").with_groups([partial.id]);
        let staff = Actor::new("staff").with_groups([immune.id]);
        store.insert_actor(senior.clone()).unwrap();
        store.insert_actor(staff.clone()).unwrap();
        let now = Utc::now();

        let err = engine
            .accounts()
            .record_admin_edit(senior.id, staff.id, AdminEdit::PasswordReset, now)
            .unwrap_err();
        assert!(matches!(err, ModerationError::ImmuneTarget(id) if id == staff.id));

        let entry = engine
            .accounts()
            .record_admin_edit(admin.id, staff.id, AdminEdit::Details(vec!["email".into()]), now)
            .unwrap();
        assert!(entry.reason.contains("email"));
        assert_eq!(store.ledger(), vec![entry]);
    }

    #[test]
    fn deleting_a_group_reports_holders() {
        let (store, engine, admin) = admin_setup();
        let group = engine
            .groups()
            .create_group(admin.id, new_group("temp", Capability::VIEW_TICKET.mask()))
            .unwrap();
        let holder = Actor::new("h").with_groups([group.id]);
        store.insert_actor(holder.clone()).unwrap();

        assert_eq!(engine.groups().actors_in_group(admin.id, group.id).unwrap(), vec![holder.id]);
        let (_, detached) = engine.groups().delete_group(admin.id, group.id).unwrap();
        assert_eq!(detached, vec![holder.id]);
        assert_eq!(engine.groups().delete_group(admin.id, group.id).unwrap_err().status(), 404);
    }
}
