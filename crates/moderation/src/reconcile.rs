//! Access-time reconciliation: lazy expiry and the per-request authorization entry point.
//!
//! `authorize` runs on every authenticated request. It reverses anything that
//! has expired, re-derives IP blocks for the request address, rejects blocked
//! actors, and hands back a freshly resolved capability mask.
//!
//! A reversal that cannot be written leaves the actor's previous sanction
//! state enforced. Reconciliation never fails open.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use helpdesk_auth::{Actor, Capabilities, Capability, Track, allow, has_immunity, is_full_privilege};
use helpdesk_core::{ActorId, SanctionId};

use crate::config::IpExpiryPolicy;
use crate::engine::ModerationEngine;
use crate::error::{ModerationError, ModerationResult};
use crate::sanction::{Sanction, SanctionKind};
use crate::store::{ModerationBackend, PointerUpdate, RefGuard, StoreError};

/// Result of one reconciliation pass.
#[derive(Debug)]
pub struct Reconciliation {
    /// The actor with pointers as they stand after the pass.
    pub actor: Actor,
    /// Reversals appended by this pass.
    pub reversals: Vec<Sanction>,
    /// Reversals that could not be written; those sanctions stay enforced.
    pub faults: Vec<ReconcileFault>,
}

#[derive(Debug)]
pub struct ReconcileFault {
    pub track: Track,
    pub sanction: SanctionId,
    pub error: ModerationError,
}

/// An actor cleared to proceed with the current request.
#[derive(Debug)]
pub struct AuthorizedActor {
    actor: Actor,
    capabilities: Capabilities,
    muted: Option<Sanction>,
    reversals: Vec<Sanction>,
    faults: Vec<ReconcileFault>,
}

impl AuthorizedActor {
    pub fn id(&self) -> ActorId {
        self.actor.id
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn can(&self, capability: Capability) -> bool {
        allow(self.capabilities, capability)
    }

    pub fn require(&self, capability: Capability) -> ModerationResult<()> {
        if self.can(capability) {
            Ok(())
        } else {
            Err(ModerationError::Unauthorized(capability))
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted.is_some()
    }

    pub fn muted(&self) -> Option<&Sanction> {
        self.muted.as_ref()
    }

    /// Gate for operations that create content.
    pub fn require_unmuted(&self) -> ModerationResult<()> {
        match &self.muted {
            None => Ok(()),
            Some(mute) => Err(ModerationError::Muted {
                sanction: mute.id,
                reason: mute.reason.clone(),
                expires_at: mute.expires_at,
            }),
        }
    }

    pub fn reversals(&self) -> &[Sanction] {
        &self.reversals
    }

    pub fn faults(&self) -> &[ReconcileFault] {
        &self.faults
    }
}

enum Expiry {
    /// Pointer cleared; carries the reversal if this pass appended one.
    Cleared(Option<Sanction>),
    /// Pointer was moved by someone else; carries its current value.
    Superseded(Option<SanctionId>),
}

impl<S> ModerationEngine<S>
where
    S: ModerationBackend,
{
    /// Per-request entry point.
    ///
    /// `source_ip` is the address the request came from; when the actor is
    /// otherwise unblocked and an active IP block covers it, the block is
    /// derived onto the actor.
    #[instrument(skip(self), err)]
    pub fn authorize(
        &self,
        actor_id: ActorId,
        source_ip: Option<IpAddr>,
        now: DateTime<Utc>,
    ) -> ModerationResult<AuthorizedActor> {
        let Reconciliation {
            mut actor,
            reversals,
            faults,
        } = self.reconcile(actor_id, now)?;

        if actor.blocked.is_none() && self.config.derive_ip_blocks_on_access {
            if let Some(ip) = source_ip {
                self.derive_ip_block(&mut actor, ip, now)?;
            }
        }

        if let Some(block) = self.active_sanction(&actor, Track::Block)? {
            debug!(actor = %actor.id, sanction = %block.id, "request rejected: actor is blocked");
            return Err(ModerationError::Forbidden {
                sanction: block.id,
                reason: block.reason,
                expires_at: block.expires_at,
            });
        }

        let capabilities = self.capabilities_of(&actor)?;
        let muted = self.active_sanction(&actor, Track::Mute)?;

        Ok(AuthorizedActor {
            actor,
            capabilities,
            muted,
            reversals,
            faults,
        })
    }

    /// Reverse every expired sanction the actor currently carries.
    ///
    /// Read failures propagate. Write failures are collected in
    /// [`Reconciliation::faults`] and the sanction stays in place.
    #[instrument(skip(self), err)]
    pub fn reconcile(&self, actor_id: ActorId, now: DateTime<Utc>) -> ModerationResult<Reconciliation> {
        let actor = self.load_actor(actor_id)?;
        self.reconcile_actor(actor, now)
    }

    pub(crate) fn reconcile_actor(&self, mut actor: Actor, now: DateTime<Utc>) -> ModerationResult<Reconciliation> {
        let mut reversals = Vec::new();
        let mut faults = Vec::new();

        for track in [Track::Mute, Track::Block] {
            let Some(active) = self.active_sanction(&actor, track)? else {
                continue;
            };
            if !active.is_expired(now) {
                continue;
            }

            let through_ip_block = track == Track::Block
                && active.kind == SanctionKind::BlockIp
                && self.config.ip_expiry_policy == IpExpiryPolicy::Cascade;
            let result = if through_ip_block {
                self.expire_ip_derived(&actor, &active, now)
            } else {
                self.expire_direct(&actor, track, &active, now)
            };

            match result {
                Ok(Expiry::Cleared(reversal)) => {
                    actor.set_sanction_ref(track, None);
                    reversals.extend(reversal);
                }
                Ok(Expiry::Superseded(current)) => actor.set_sanction_ref(track, current),
                Err(error) => {
                    warn!(
                        actor = %actor.id,
                        track = %track,
                        sanction = %active.id,
                        error = %error,
                        "expiry reversal failed; sanction stays enforced"
                    );
                    faults.push(ReconcileFault {
                        track,
                        sanction: active.id,
                        error,
                    });
                }
            }
        }

        Ok(Reconciliation {
            actor,
            reversals,
            faults,
        })
    }

    /// Reverse one expired sanction on this actor only.
    fn expire_direct(
        &self,
        actor: &Actor,
        track: Track,
        active: &Sanction,
        now: DateTime<Utc>,
    ) -> ModerationResult<Expiry> {
        let mut reversal = active.expiry_reversal(track, now);
        // An IP-derived block reversed per actor names the actor it was cleared on.
        reversal.target = actor.id;

        let pointer = PointerUpdate {
            actor: actor.id,
            track,
            guard: RefGuard::Expect(Some(active.id)),
            new: None,
        };
        match self.store.record_sanction(reversal.clone(), pointer) {
            Ok(()) => {
                info!(
                    actor = %actor.id,
                    sanction = %active.id,
                    reversal = %reversal.id,
                    "expired sanction reversed"
                );
                Ok(Expiry::Cleared(Some(reversal)))
            }
            Err(StoreError::Conflict(_)) => self.current_pointer(actor.id, track).map(Expiry::Superseded),
            Err(e) => Err(e.into()),
        }
    }

    /// Reverse an expired IP-derived block through its IP block record.
    fn expire_ip_derived(&self, actor: &Actor, active: &Sanction, now: DateTime<Utc>) -> ModerationResult<Expiry> {
        let block = match self.store.ip_block_for_sanction(active.id)? {
            Some(block) if block.active => block,
            // Block already lifted; only this actor's pointer is left over.
            _ => return self.clear_leftover(actor, active),
        };

        let lift = active.expiry_reversal(Track::Block, now);
        let report = match self.lift_address(block, lift.clone()) {
            Ok(outcome) => outcome.report,
            Err(ModerationError::NotBlocked(_)) => return self.clear_leftover(actor, active),
            Err(e) => return Err(e),
        };
        self.log_cascade(&report);

        if report.updated.contains(&actor.id) {
            return Ok(Expiry::Cleared(Some(lift)));
        }
        if let Some((_, error)) = report.failed.iter().find(|(id, _)| *id == actor.id) {
            return Err(error.clone().into());
        }
        self.current_pointer(actor.id, Track::Block).map(Expiry::Superseded)
    }

    fn clear_leftover(&self, actor: &Actor, active: &Sanction) -> ModerationResult<Expiry> {
        match self
            .store
            .set_actor_sanction_ref(actor.id, Track::Block, RefGuard::Expect(Some(active.id)), None)
        {
            Ok(()) => Ok(Expiry::Cleared(None)),
            Err(StoreError::Conflict(_)) => self.current_pointer(actor.id, Track::Block).map(Expiry::Superseded),
            Err(e) => Err(e.into()),
        }
    }

    fn current_pointer(&self, actor: ActorId, track: Track) -> ModerationResult<Option<SanctionId>> {
        Ok(self.load_actor(actor)?.sanction_ref(track))
    }

    /// Point an unblocked actor at the active, unexpired block on `ip`.
    fn derive_ip_block(&self, actor: &mut Actor, ip: IpAddr, now: DateTime<Utc>) -> ModerationResult<()> {
        let Some(block) = self.store.active_ip_block(ip)? else {
            return Ok(());
        };
        let sanction = self.ip_sanction(&block)?;

        if sanction.is_expired(now) {
            if self.config.ip_expiry_policy == IpExpiryPolicy::Cascade {
                if let Err(error) = self.lift_expired_ip_block(ip, now) {
                    warn!(ip = %ip, sanction = %sanction.id, error = %error, "failed to lift expired ip block");
                }
            }
            return Ok(());
        }

        if has_immunity(self.capabilities_of(actor)?) && !self.authored_with_full_privilege(&sanction)? {
            return Ok(());
        }

        match self
            .store
            .set_actor_sanction_ref(actor.id, Track::Block, RefGuard::Expect(None), Some(sanction.id))
        {
            Ok(()) => info!(actor = %actor.id, ip = %ip, sanction = %sanction.id, "ip block derived on access"),
            // Pointer moved concurrently; this request is still refused.
            Err(StoreError::Conflict(_)) => {}
            Err(error) => {
                warn!(actor = %actor.id, ip = %ip, error = %error, "failed to persist derived ip block")
            }
        }
        actor.blocked = Some(sanction.id);
        Ok(())
    }

    fn authored_with_full_privilege(&self, sanction: &Sanction) -> ModerationResult<bool> {
        match self.store.load_actor(sanction.author)? {
            Some(author) => Ok(is_full_privilege(self.capabilities_of(&author)?)),
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Duration;
    use helpdesk_auth::Group;

    use crate::engine::SanctionCommand;
    use crate::store::{GroupStore, InMemoryModerationStore};

    fn setup() -> (Arc<InMemoryModerationStore>, ModerationEngine<InMemoryModerationStore>, Actor, Actor) {
        let store = InMemoryModerationStore::arc();
        let mods = Group::granting("moderators", Capability::MUTE_USER | Capability::BLOCK_USER);
        let users = Group::granting("user", Capability::CREATE_TICKET | Capability::VIEW_TICKET);
        store.insert_group(mods.clone()).unwrap();
        store.insert_group(users.clone()).unwrap();
        let moderator = Actor::new("mod").with_groups([mods.id]);
        let user = Actor::new("user").with_groups([users.id]);
        store.insert_actor(moderator.clone()).unwrap();
        store.insert_actor(user.clone()).unwrap();
        (Arc::clone(&store), ModerationEngine::new(store), moderator, user)
    }

    #[test]
    fn clean_actor_is_authorized_with_fresh_mask() {
        let (_, engine, _, user) = setup();
        let authorized = engine.authorize(user.id, None, Utc::now()).unwrap();
        assert!(authorized.can(Capability::CREATE_TICKET));
        assert!(authorized.require(Capability::BLOCK_USER).is_err());
        assert!(authorized.require_unmuted().is_ok());
        assert!(authorized.reversals().is_empty());
    }

    #[test]
    fn muted_actor_proceeds_but_cannot_create_content() {
        let (_, engine, moderator, user) = setup();
        let now = Utc::now();
        let mute = engine
            .apply_mute(SanctionCommand::new(moderator.id, user.id, "flooding", now))
            .unwrap();

        let authorized = engine.authorize(user.id, None, now).unwrap();
        assert!(authorized.is_muted());
        match authorized.require_unmuted().unwrap_err() {
            ModerationError::Muted { sanction, reason, expires_at } => {
                assert_eq!(sanction, mute.id);
                assert_eq!(reason, "flooding");
                assert_eq!(expires_at, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn blocked_actor_is_forbidden_with_reason() {
        let (_, engine, moderator, user) = setup();
        let now = Utc::now();
        let until = now + Duration::days(1);
        engine
            .apply_block(SanctionCommand::new(moderator.id, user.id, "spam", now).expiring(Some(until)))
            .unwrap();

        match engine.authorize(user.id, None, now).unwrap_err() {
            ModerationError::Forbidden { reason, expires_at, .. } => {
                assert_eq!(reason, "spam");
                assert_eq!(expires_at, Some(until));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn expired_mute_is_reversed_by_its_author() {
        let (store, engine, moderator, user) = setup();
        let now = Utc::now();
        let mute = engine
            .apply_mute(
                SanctionCommand::new(moderator.id, user.id, "cool off", now)
                    .expiring(Some(now + Duration::minutes(1))),
            )
            .unwrap();

        let rec = engine.reconcile(user.id, now + Duration::minutes(1)).unwrap();
        assert_eq!(rec.actor.muted, None);
        assert!(rec.faults.is_empty());
        let reversal = &rec.reversals[0];
        assert_eq!(reversal.kind, SanctionKind::Unmute);
        assert_eq!(reversal.author, moderator.id);
        assert!(reversal.reason.contains(&mute.id.to_string()));
        assert_eq!(store.actor(user.id).unwrap().muted, None);
    }

    #[test]
    fn unknown_actor_is_not_found() {
        let (_, engine, _, _) = setup();
        let err = engine.authorize(ActorId::new(), None, Utc::now()).unwrap_err();
        assert_eq!(err.status(), 404);
    }
}
