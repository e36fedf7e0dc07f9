//! Read-only audit queries over the ledger and IP history.

use std::collections::BTreeSet;
use std::net::IpAddr;

use helpdesk_auth::Capability;
use helpdesk_core::{ActorId, SanctionId};

use crate::engine::ModerationEngine;
use crate::error::{ModerationError, ModerationResult};
use crate::sanction::{IpBlock, Sanction};
use crate::store::ModerationBackend;

pub struct ModerationQueries<'a, S> {
    engine: &'a ModerationEngine<S>,
}

impl<'a, S> ModerationQueries<'a, S>
where
    S: ModerationBackend,
{
    /// Ledger entries targeting `target`, oldest first.
    pub fn sanctions_for_target(&self, viewer: ActorId, target: ActorId) -> ModerationResult<Vec<Sanction>> {
        self.engine.require(viewer, Capability::VIEW_MODERATIONS_BY_USER)?;
        self.engine.load_actor(target)?;
        Ok(self.engine.store.sanctions_for_target(target)?)
    }

    /// Ledger entries authored by `author`, oldest first.
    pub fn sanctions_by_author(&self, viewer: ActorId, author: ActorId) -> ModerationResult<Vec<Sanction>> {
        self.engine.require(viewer, Capability::VIEW_MODERATIONS_BY_AUTHOR)?;
        self.engine.load_actor(author)?;
        Ok(self.engine.store.sanctions_by_author(author)?)
    }

    pub fn sanction(&self, viewer: ActorId, id: SanctionId) -> ModerationResult<Sanction> {
        self.engine.require(viewer, Capability::VIEW_MODERATION)?;
        self.engine
            .store
            .load_sanction(id)?
            .ok_or_else(|| ModerationError::not_found(format!("sanction {id}")))
    }

    /// Addresses `target` was seen at, least recently used first.
    pub fn ips_of_actor(&self, viewer: ActorId, target: ActorId) -> ModerationResult<Vec<IpAddr>> {
        let viewer_mask = self.engine.require(viewer, Capability::VIEW_IPS_BY_USER)?;
        let actor = self.engine.load_actor(target)?;
        self.engine.ensure_targetable(viewer_mask, &actor)?;
        Ok(self.engine.store.ips_by_actor(target)?)
    }

    /// Other actors seen at any address `target` used.
    pub fn actors_sharing_ips(&self, viewer: ActorId, target: ActorId) -> ModerationResult<Vec<ActorId>> {
        let viewer_mask = self.engine.require(viewer, Capability::VIEW_SAMEIP_BY_USER)?;
        let actor = self.engine.load_actor(target)?;
        self.engine.ensure_targetable(viewer_mask, &actor)?;

        let mut shared = BTreeSet::new();
        for ip in self.engine.store.ips_by_actor(target)? {
            shared.extend(
                self.engine
                    .store
                    .actors_by_ip(ip)?
                    .into_iter()
                    .filter(|id| *id != target),
            );
        }
        Ok(shared.into_iter().collect())
    }

    /// Every block record for `ip`, active or lifted, oldest first.
    pub fn ip_block_history(&self, viewer: ActorId, ip: IpAddr) -> ModerationResult<Vec<IpBlock>> {
        self.engine.require(viewer, Capability::VIEW_USERS_BY_IP)?;
        Ok(self.engine.store.ip_blocks(ip)?)
    }
}

impl<S> ModerationEngine<S>
where
    S: ModerationBackend,
{
    pub fn queries(&self) -> ModerationQueries<'_, S> {
        ModerationQueries { engine: self }
    }
}
