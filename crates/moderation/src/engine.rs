//! Moderation lifecycle engine.
//!
//! Applies block/unblock/mute/unmute transitions and IP-level blocks. Every
//! transition is one guarded store call: the precondition check the engine
//! makes up front is re-checked by the store's [`RefGuard`], so two concurrent
//! `apply_mute` calls against one target cannot both succeed.
//!
//! ```text
//! command
//!   ↓
//! 1. validate reason / expiry
//!   ↓
//! 2. resolve author capabilities
//!   ↓
//! 3. reconcile the target (lazy expiry)
//!   ↓
//! 4. check the track state, then immunity of the target
//!   ↓
//! 5. append sanction + move pointer (atomic, guarded)
//! ```
//!
//! IP cascades touch an unbounded set of actors and are applied as a bulk
//! update; a partial result surfaces as [`ModerationError::PartialCascade`].

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use helpdesk_auth::{
    Actor, Capabilities, Capability, Track, authorize, ensure_can_target, has_immunity,
    is_full_privilege, resolve_refs,
};
use helpdesk_core::ActorId;

use crate::cascade::{CascadeDirection, CascadeReport, IpBlockOutcome};
use crate::config::ModerationConfig;
use crate::error::{ModerationError, ModerationResult};
use crate::sanction::{IpBlock, Sanction, SanctionKind, ensure_future_expiry, validate_reason};
use crate::store::{ModerationBackend, PointerUpdate, RefGuard, StoreError};

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

/// Impose a sanction on one actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanctionCommand {
    pub author: ActorId,
    pub target: ActorId,
    pub reason: String,
    /// `None` means indefinite.
    pub expires_at: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

impl SanctionCommand {
    pub fn new(
        author: ActorId,
        target: ActorId,
        reason: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            author,
            target,
            reason: reason.into(),
            expires_at: None,
            occurred_at,
        }
    }

    pub fn expiring(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }
}

/// Lift an actor's sanction on one track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiftCommand {
    pub author: ActorId,
    pub target: ActorId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

impl LiftCommand {
    pub fn new(
        author: ActorId,
        target: ActorId,
        reason: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            author,
            target,
            reason: reason.into(),
            occurred_at,
        }
    }
}

/// Block a network address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpSanctionCommand {
    pub author: ActorId,
    pub ip: IpAddr,
    pub reason: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

impl IpSanctionCommand {
    pub fn new(author: ActorId, ip: IpAddr, reason: impl Into<String>, occurred_at: DateTime<Utc>) -> Self {
        Self {
            author,
            ip,
            reason: reason.into(),
            expires_at: None,
            occurred_at,
        }
    }

    pub fn expiring(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }
}

/// Lift the active block on a network address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpLiftCommand {
    pub author: ActorId,
    pub ip: IpAddr,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

impl IpLiftCommand {
    pub fn new(author: ActorId, ip: IpAddr, reason: impl Into<String>, occurred_at: DateTime<Utc>) -> Self {
        Self {
            author,
            ip,
            reason: reason.into(),
            occurred_at,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Request-scoped moderation engine over a shared backing store.
///
/// Holds no mutable state of its own; all coordination goes through the store.
pub struct ModerationEngine<S> {
    pub(crate) store: Arc<S>,
    pub(crate) config: ModerationConfig,
}

impl<S> Clone for ModerationEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

impl<S> ModerationEngine<S>
where
    S: ModerationBackend,
{
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, ModerationConfig::default())
    }

    pub fn with_config(store: Arc<S>, config: ModerationConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ModerationConfig {
        &self.config
    }

    // ─── Block / mute tracks ────────────────────────────────────────────────

    #[instrument(skip(self, cmd), fields(author = %cmd.author, target = %cmd.target), err)]
    pub fn apply_block(&self, cmd: SanctionCommand) -> ModerationResult<Sanction> {
        self.impose(Track::Block, SanctionKind::Block, Capability::BLOCK_USER, cmd)
    }

    #[instrument(skip(self, cmd), fields(author = %cmd.author, target = %cmd.target), err)]
    pub fn apply_unblock(&self, cmd: LiftCommand) -> ModerationResult<Sanction> {
        self.lift(Track::Block, Capability::UNBLOCK_USER, cmd)
    }

    #[instrument(skip(self, cmd), fields(author = %cmd.author, target = %cmd.target), err)]
    pub fn apply_mute(&self, cmd: SanctionCommand) -> ModerationResult<Sanction> {
        self.impose(Track::Mute, SanctionKind::Mute, Capability::MUTE_USER, cmd)
    }

    #[instrument(skip(self, cmd), fields(author = %cmd.author, target = %cmd.target), err)]
    pub fn apply_unmute(&self, cmd: LiftCommand) -> ModerationResult<Sanction> {
        self.lift(Track::Mute, Capability::UNMUTE_USER, cmd)
    }

    fn impose(
        &self,
        track: Track,
        kind: SanctionKind,
        required: Capability,
        cmd: SanctionCommand,
    ) -> ModerationResult<Sanction> {
        let reason = self.validated_reason(&cmd.reason)?;
        ensure_future_expiry(cmd.expires_at, cmd.occurred_at)?;

        let author_mask = self.require(cmd.author, required)?;
        let target = self.load_actor(cmd.target)?;

        let target = self.reconcile_actor(target, cmd.occurred_at)?.actor;
        let already = ModerationError::AlreadySanctioned {
            target: target.id,
            track,
        };
        if target.sanction_ref(track).is_some() {
            return Err(already);
        }
        self.ensure_targetable(author_mask, &target)?;

        let sanction = Sanction::new(kind, cmd.author, target.id, reason, cmd.occurred_at)
            .expiring(cmd.expires_at);
        let pointer = PointerUpdate {
            actor: target.id,
            track,
            guard: RefGuard::Expect(None),
            new: Some(sanction.id),
        };
        self.store
            .record_sanction(sanction.clone(), pointer)
            .map_err(|e| match e {
                StoreError::Conflict(_) => already,
                other => other.into(),
            })?;

        info!(
            sanction = %sanction.id,
            kind = %kind,
            target = %target.id,
            expires_at = ?sanction.expires_at,
            "sanction applied"
        );
        Ok(sanction)
    }

    fn lift(&self, track: Track, required: Capability, cmd: LiftCommand) -> ModerationResult<Sanction> {
        let reason = self.validated_reason(&cmd.reason)?;
        self.require(cmd.author, required)?;

        let target = self.load_actor(cmd.target)?;
        let target = self.reconcile_actor(target, cmd.occurred_at)?.actor;
        let not_sanctioned = ModerationError::NotSanctioned {
            target: target.id,
            track,
        };
        let Some(active) = self.active_sanction(&target, track)? else {
            return Err(not_sanctioned);
        };

        // An IP-derived block is lifted through the address while the block is
        // active; otherwise the next request would derive it again.
        if active.kind == SanctionKind::BlockIp {
            let lifted = self
                .store
                .ip_block_for_sanction(active.id)?
                .is_none_or(|block| !block.active);
            if !lifted {
                return Err(ModerationError::BlockedByIp {
                    target: target.id,
                    sanction: active.id,
                });
            }
        }

        let reversal = Sanction::new(
            SanctionKind::reversal_for(track),
            cmd.author,
            target.id,
            reason,
            cmd.occurred_at,
        );
        let pointer = PointerUpdate {
            actor: target.id,
            track,
            guard: RefGuard::Expect(Some(active.id)),
            new: None,
        };
        self.store
            .record_sanction(reversal.clone(), pointer)
            .map_err(|e| match e {
                StoreError::Conflict(_) => not_sanctioned,
                other => other.into(),
            })?;

        info!(
            sanction = %reversal.id,
            kind = %reversal.kind,
            target = %target.id,
            lifted = %active.id,
            "sanction lifted"
        );
        Ok(reversal)
    }

    // ─── IP blocks ──────────────────────────────────────────────────────────

    /// Block `ip` and every actor ever observed there.
    #[instrument(skip(self, cmd), fields(author = %cmd.author, ip = %cmd.ip), err)]
    pub fn apply_block_ip(&self, cmd: IpSanctionCommand) -> ModerationResult<IpBlockOutcome> {
        let reason = self.validated_reason(&cmd.reason)?;
        ensure_future_expiry(cmd.expires_at, cmd.occurred_at)?;
        let author_mask = self.require(cmd.author, Capability::BLOCK_USERS_BY_IP)?;

        self.block_address(
            cmd.author,
            author_mask,
            cmd.ip,
            None,
            reason,
            cmd.expires_at,
            cmd.occurred_at,
        )
    }

    /// Block the address `cmd.target` used most recently.
    #[instrument(skip(self, cmd), fields(author = %cmd.author, target = %cmd.target), err)]
    pub fn apply_block_ip_for_actor(&self, cmd: SanctionCommand) -> ModerationResult<IpBlockOutcome> {
        let reason = self.validated_reason(&cmd.reason)?;
        ensure_future_expiry(cmd.expires_at, cmd.occurred_at)?;
        let author_mask = self.require(cmd.author, Capability::BLOCK_IP_BY_USER)?;

        let target = self.load_actor(cmd.target)?;
        self.ensure_targetable(author_mask, &target)?;
        let ip = self
            .store
            .ips_by_actor(target.id)?
            .last()
            .copied()
            .ok_or(ModerationError::NoIpHistory(target.id))?;

        self.block_address(
            cmd.author,
            author_mask,
            ip,
            Some(target.id),
            reason,
            cmd.expires_at,
            cmd.occurred_at,
        )
    }

    /// Lift the active block on `ip` and clear every actor it cascaded onto.
    #[instrument(skip(self, cmd), fields(author = %cmd.author, ip = %cmd.ip), err)]
    pub fn apply_unblock_ip(&self, cmd: IpLiftCommand) -> ModerationResult<IpBlockOutcome> {
        let reason = self.validated_reason(&cmd.reason)?;
        self.require(cmd.author, Capability::UNBLOCK_USERS_BY_IP)?;

        let block = self
            .store
            .active_ip_block(cmd.ip)?
            .ok_or(ModerationError::NotBlocked(cmd.ip))?;
        let original = self.ip_sanction(&block)?;
        let lift = Sanction::new(
            SanctionKind::Unblock,
            cmd.author,
            original.target,
            reason,
            cmd.occurred_at,
        );

        let outcome = self.lift_address(block, lift)?;
        self.settle(outcome)
    }

    /// Lift the active block on `ip` if its sanction has expired.
    ///
    /// The reversal is attributed to the author of the original `BLOCK_IP`.
    /// Returns `None` when there is no active block or it has not expired.
    pub fn lift_expired_ip_block(
        &self,
        ip: IpAddr,
        now: DateTime<Utc>,
    ) -> ModerationResult<Option<IpBlockOutcome>> {
        let Some(block) = self.store.active_ip_block(ip)? else {
            return Ok(None);
        };
        let original = self.ip_sanction(&block)?;
        if !original.is_expired(now) {
            return Ok(None);
        }

        let lift = original.expiry_reversal(Track::Block, now);
        let outcome = self.lift_address(block, lift)?;
        self.settle(outcome).map(Some)
    }

    /// Retry the failed actors of a partially applied cascade.
    #[instrument(skip(self, report), fields(ip = %report.ip, sanction = %report.sanction), err)]
    pub fn resume_cascade(&self, mut report: CascadeReport) -> ModerationResult<CascadeReport> {
        let pending = report.failed_actors();
        report.failed.clear();

        let (guard, new) = match report.direction {
            CascadeDirection::Block => {
                let still_active = self
                    .store
                    .ip_block_for_sanction(report.sanction)?
                    .is_some_and(|block| block.active);
                if !still_active {
                    // Lifted since; there is nothing left to propagate.
                    report.skipped.extend(pending);
                    return Ok(report);
                }
                (RefGuard::Any, Some(report.sanction))
            }
            CascadeDirection::Unblock => (RefGuard::Expect(Some(report.sanction)), None),
        };

        report.absorb(
            self.store
                .bulk_set_actor_sanction_ref(&pending, Track::Block, guard, new),
        );
        if self.log_cascade(&report) {
            Ok(report)
        } else {
            Err(ModerationError::PartialCascade(Box::new(report)))
        }
    }

    /// Place a block on `ip` and cascade it. The sanction targets `named`
    /// when it is eligible, otherwise the first eligible actor seen there.
    #[allow(clippy::too_many_arguments)]
    fn block_address(
        &self,
        author: ActorId,
        author_mask: Capabilities,
        ip: IpAddr,
        named: Option<ActorId>,
        reason: String,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> ModerationResult<IpBlockOutcome> {
        if self.store.active_ip_block(ip)?.is_some() {
            // A lapsed block still flagged active is lifted before a new one is placed.
            match self.lift_expired_ip_block(ip, now) {
                Ok(Some(_))
                | Err(ModerationError::PartialCascade(_))
                | Err(ModerationError::NotBlocked(_)) => {}
                Ok(None) => return Err(ModerationError::AlreadyBlocked(ip)),
                Err(e) => return Err(e),
            }
        }

        let seen = self.store.actors_by_ip(ip)?;
        let actors = self.store.load_actors(&seen)?;

        let bypass_immunity = is_full_privilege(author_mask);
        let mut eligible = Vec::with_capacity(actors.len());
        let mut immune = Vec::new();
        for actor in &actors {
            if !bypass_immunity && has_immunity(self.capabilities_of(actor)?) {
                immune.push(actor.id);
            } else {
                eligible.push(actor.id);
            }
        }

        let representative = named
            .filter(|id| eligible.contains(id))
            .or_else(|| eligible.first().copied());
        let Some(representative) = representative else {
            return Err(match immune.first() {
                Some(&actor) => ModerationError::ImmuneTarget(actor),
                None => ModerationError::NoUsersForIp(ip),
            });
        };

        let sanction = Sanction::new(SanctionKind::BlockIp, author, representative, reason, now)
            .expiring(expires_at);
        let block = IpBlock::new(ip, sanction.id, now);
        self.store
            .create_ip_block(block.clone(), sanction.clone())
            .map_err(|e| match e {
                StoreError::Conflict(_) => ModerationError::AlreadyBlocked(ip),
                other => other.into(),
            })?;

        let mut report = CascadeReport::new(&block, CascadeDirection::Block);
        report.skipped_immune = immune;
        report.absorb(self.store.bulk_set_actor_sanction_ref(
            &eligible,
            Track::Block,
            RefGuard::Any,
            Some(sanction.id),
        ));

        self.settle(IpBlockOutcome {
            ip_block: block,
            sanction,
            report,
        })
    }

    /// Deactivate `block` with `lift` as the ledger entry, then clear every
    /// actor still pointing at the block's sanction.
    pub(crate) fn lift_address(&self, mut block: IpBlock, lift: Sanction) -> ModerationResult<IpBlockOutcome> {
        self.store
            .set_ip_block_active(block.id, false, lift.clone())
            .map_err(|e| match e {
                StoreError::Conflict(_) => ModerationError::NotBlocked(block.ip),
                other => other.into(),
            })?;
        block.active = false;

        let mut report = CascadeReport::new(&block, CascadeDirection::Unblock);
        let affected = self.store.actors_referencing(Track::Block, block.sanction)?;
        report.absorb(self.store.bulk_set_actor_sanction_ref(
            &affected,
            Track::Block,
            RefGuard::Expect(Some(block.sanction)),
            None,
        ));

        Ok(IpBlockOutcome {
            ip_block: block,
            sanction: lift,
            report,
        })
    }

    fn settle(&self, outcome: IpBlockOutcome) -> ModerationResult<IpBlockOutcome> {
        if self.log_cascade(&outcome.report) {
            Ok(outcome)
        } else {
            Err(ModerationError::PartialCascade(Box::new(outcome.report)))
        }
    }

    /// Log a cascade result; returns whether it was complete.
    pub(crate) fn log_cascade(&self, report: &CascadeReport) -> bool {
        if report.is_complete() {
            info!(
                ip = %report.ip,
                sanction = %report.sanction,
                direction = ?report.direction,
                updated = report.updated.len(),
                skipped = report.skipped.len(),
                immune = report.skipped_immune.len(),
                "ip cascade applied"
            );
            true
        } else {
            warn!(
                ip = %report.ip,
                sanction = %report.sanction,
                direction = ?report.direction,
                updated = report.updated.len(),
                failed = ?report.failed_actors(),
                "ip cascade partially applied"
            );
            false
        }
    }

    // ─── Shared lookups ─────────────────────────────────────────────────────

    pub(crate) fn load_actor(&self, id: ActorId) -> ModerationResult<Actor> {
        self.store
            .load_actor(id)?
            .ok_or_else(|| ModerationError::not_found(format!("actor {id}")))
    }

    /// Freshly resolved mask; never cached between calls.
    pub(crate) fn capabilities_of(&self, actor: &Actor) -> ModerationResult<Capabilities> {
        Ok(resolve_refs(&*self.store, &actor.group_refs)?)
    }

    /// Load `actor_id` and require `capability` of them; returns their mask.
    pub(crate) fn require(&self, actor_id: ActorId, capability: Capability) -> ModerationResult<Capabilities> {
        let actor = self.load_actor(actor_id)?;
        let mask = self.capabilities_of(&actor)?;
        authorize(mask, capability).map_err(|_| ModerationError::Unauthorized(capability))?;
        Ok(mask)
    }

    pub(crate) fn ensure_targetable(&self, author_mask: Capabilities, target: &Actor) -> ModerationResult<()> {
        let target_mask = self.capabilities_of(target)?;
        ensure_can_target(author_mask, target_mask).map_err(|_| ModerationError::ImmuneTarget(target.id))
    }

    /// The sanction an actor's pointer references on `track`.
    ///
    /// A pointer to a sanction that does not exist is a corrupt store, not a
    /// clear track.
    pub(crate) fn active_sanction(&self, actor: &Actor, track: Track) -> ModerationResult<Option<Sanction>> {
        let Some(id) = actor.sanction_ref(track) else {
            return Ok(None);
        };
        match self.store.load_sanction(id)? {
            Some(sanction) => Ok(Some(sanction)),
            None => Err(ModerationError::corrupt(format!(
                "actor {} {track} pointer references missing sanction {id}",
                actor.id
            ))),
        }
    }

    pub(crate) fn ip_sanction(&self, block: &IpBlock) -> ModerationResult<Sanction> {
        self.store.load_sanction(block.sanction)?.ok_or_else(|| {
            ModerationError::corrupt(format!(
                "ip block {} references missing sanction {}",
                block.id, block.sanction
            ))
        })
    }

    pub(crate) fn validated_reason(&self, raw: &str) -> ModerationResult<String> {
        Ok(validate_reason(raw, self.config.max_reason_len)?)
    }
}
